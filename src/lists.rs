use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{ImportError, Result};

pub(crate) const COMMENT_PREFIX: &str = "#";

/// Identifiers from a newline-delimited list: trimmed, skipping blanks and `#` comments.
pub(crate) fn read_identifier_list(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|e| ImportError::io(path, e))?;
    Ok(parse_identifier_list(&text))
}

pub(crate) fn parse_identifier_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(COMMENT_PREFIX))
        .map(str::to_string)
        .collect()
}

/// A single argument is either one identifier or, when it ends in `.txt`, a list file.
pub(crate) fn resolve_import_input(input: &str) -> Result<Vec<String>> {
    if input.ends_with(".txt") {
        read_identifier_list(Path::new(input))
    } else {
        Ok(vec![input.trim().to_string()])
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct DedupeReport {
    pub(crate) original: usize,
    pub(crate) unique: usize,
    /// Entry -> number of extra occurrences removed.
    pub(crate) duplicates: BTreeMap<String, usize>,
}

impl DedupeReport {
    pub(crate) fn removed(&self) -> usize {
        self.original - self.unique
    }
}

/// Remove exact duplicate lines and rewrite the file sorted case-insensitively.
pub(crate) fn dedupe_identifier_list(path: &Path) -> Result<DedupeReport> {
    let text = fs::read_to_string(path).map_err(|e| ImportError::io(path, e))?;
    let (lines, report) = dedupe_lines(&text);
    fs::write(path, lines.join("\n")).map_err(|e| ImportError::io(path, e))?;
    Ok(report)
}

pub(crate) fn dedupe_lines(text: &str) -> (Vec<String>, DedupeReport) {
    let lines: Vec<&str> = text.lines().collect();
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for line in &lines {
        *counts.entry(*line).or_default() += 1;
    }
    let duplicates = counts
        .iter()
        .filter(|(_, n)| **n > 1)
        .map(|(line, n)| (line.to_string(), n - 1))
        .collect();

    let mut unique: Vec<String> = counts.into_keys().map(str::to_string).collect();
    unique.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)));

    let report = DedupeReport {
        original: lines.len(),
        unique: unique.len(),
        duplicates,
    };
    (unique, report)
}
