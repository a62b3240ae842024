use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::{ImportError, Result};
use crate::tags::filter_tags;

/// Upper bound on stored version history entries.
pub(crate) const MAX_VERSION_HISTORY: usize = 6;

pub(crate) const MARKETPLACE_BASE_URL: &str = "https://marketplace.visualstudio.com";

// ── ExtensionIdentifier ──────────────────────────────────────────────────

/// A `publisher.name` pair as used by the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ExtensionIdentifier {
    publisher: String,
    name: String,
}

impl ExtensionIdentifier {
    pub(crate) fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let Some((publisher, name)) = trimmed.split_once('.') else {
            return Err(ImportError::validation(format!(
                "expected publisher.name, got {raw:?}"
            )));
        };
        if publisher.is_empty()
            || name.is_empty()
            || name.contains('.')
            || trimmed.chars().any(char::is_whitespace)
        {
            return Err(ImportError::validation(format!(
                "expected publisher.name, got {raw:?}"
            )));
        }
        Ok(Self {
            publisher: publisher.to_string(),
            name: name.to_string(),
        })
    }

    pub(crate) fn publisher(&self) -> &str {
        &self.publisher
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn full_name(&self) -> String {
        format!("{}.{}", self.publisher, self.name)
    }

    /// Package path relative to the gallery API root. The version goes in verbatim.
    pub(crate) fn package_path(&self, version: &str) -> String {
        format!(
            "publishers/{}/vsextensions/{}/{version}/vspackage",
            urlencoding::encode(self.publisher()),
            urlencoding::encode(self.name()),
        )
    }

    pub(crate) fn download_url(&self, version: &str) -> String {
        format!(
            "{MARKETPLACE_BASE_URL}/_apis/public/gallery/{}",
            self.package_path(version)
        )
    }

    pub(crate) fn filename(&self, version: &str) -> String {
        format!("{}-{version}.vsix", self.full_name())
    }

    pub(crate) fn marketplace_url(&self) -> String {
        format!(
            "{MARKETPLACE_BASE_URL}/items?itemName={}",
            urlencoding::encode(&self.full_name())
        )
    }
}

impl fmt::Display for ExtensionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.publisher, self.name)
    }
}

// ── VersionEntry ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VersionEntry {
    pub(crate) version: String,
    pub(crate) last_updated: String,
}

// ── ExtensionRecord ──────────────────────────────────────────────────────

/// Normalized catalog entry. Only constructed through [`ExtensionRecord::from_parts`]
/// or deserialization, both of which enforce the record invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RecordFile", try_from = "RecordFile")]
pub(crate) struct ExtensionRecord {
    pub(crate) extension_id: String,
    pub(crate) extension_name: String,
    pub(crate) extension_full_name: String,
    pub(crate) display_name: String,
    pub(crate) short_description: Option<String>,
    pub(crate) latest_version: String,
    pub(crate) last_updated: String,
    pub(crate) version_history: Vec<VersionEntry>,
    pub(crate) categories: Vec<String>,
    pub(crate) tags: Vec<String>,
    pub(crate) download_url: String,
    pub(crate) filename: String,
    pub(crate) marketplace_url: String,
}

/// Unvalidated fields gathered from a catalog response or a record file.
#[derive(Debug, Clone, Default)]
pub(crate) struct RecordParts {
    pub(crate) extension_id: String,
    pub(crate) extension_name: String,
    pub(crate) display_name: String,
    pub(crate) short_description: Option<String>,
    pub(crate) versions: Vec<VersionEntry>,
    pub(crate) categories: Vec<String>,
    pub(crate) tags: Vec<String>,
}

impl ExtensionRecord {
    pub(crate) fn from_parts(identifier: &ExtensionIdentifier, parts: RecordParts) -> Result<Self> {
        let RecordParts {
            extension_id,
            extension_name,
            display_name,
            short_description,
            mut versions,
            categories,
            tags,
        } = parts;

        if extension_id.trim().is_empty() {
            return Err(ImportError::validation(format!(
                "{identifier}: missing extension id"
            )));
        }
        if extension_name.trim().is_empty() {
            return Err(ImportError::validation(format!(
                "{identifier}: missing extension name"
            )));
        }
        if display_name.trim().is_empty() {
            return Err(ImportError::validation(format!(
                "{identifier}: missing display name"
            )));
        }

        versions.truncate(MAX_VERSION_HISTORY);
        let Some(latest) = versions.first().cloned() else {
            return Err(ImportError::validation(format!(
                "{identifier}: no versions published"
            )));
        };
        for entry in &versions {
            if entry.version.trim().is_empty() {
                return Err(ImportError::validation(format!(
                    "{identifier}: empty version string"
                )));
            }
            // Versions become a URL path segment and part of a file name.
            if entry
                .version
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '/' | '\\' | '?' | '#' | '%'))
            {
                return Err(ImportError::validation(format!(
                    "{identifier}: version {:?} is not usable in a package URL",
                    entry.version
                )));
            }
            if DateTime::parse_from_rfc3339(&entry.last_updated).is_err() {
                return Err(ImportError::validation(format!(
                    "{identifier}: bad timestamp {:?} for version {}",
                    entry.last_updated, entry.version
                )));
            }
        }

        Ok(Self {
            extension_id,
            extension_name,
            extension_full_name: identifier.full_name(),
            display_name,
            short_description,
            download_url: identifier.download_url(&latest.version),
            filename: identifier.filename(&latest.version),
            marketplace_url: identifier.marketplace_url(),
            latest_version: latest.version,
            last_updated: latest.last_updated,
            version_history: versions,
            categories,
            tags: filter_tags(&tags),
        })
    }
}

// ── RecordFile (wire shape) ──────────────────────────────────────────────

/// On-disk and snapshot JSON layout, shared with the browsing front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RecordFile {
    pub(crate) extension_id: String,
    pub(crate) extension_name: String,
    pub(crate) extension_full_name: String,
    pub(crate) display_name: String,
    #[serde(default)]
    pub(crate) short_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) marketplace_url: Option<String>,
    #[serde(default)]
    pub(crate) categories: Option<Vec<String>>,
    #[serde(default)]
    pub(crate) tags: Option<Vec<String>>,
    #[serde(rename = "latest_version")]
    pub(crate) latest_version: VersionEntry,
    #[serde(rename = "version_history")]
    pub(crate) version_history: Vec<VersionEntry>,
}

impl TryFrom<RecordFile> for ExtensionRecord {
    type Error = ImportError;

    fn try_from(file: RecordFile) -> Result<Self> {
        let identifier = ExtensionIdentifier::parse(&file.extension_full_name)?;
        match file.version_history.first() {
            Some(first) if *first == file.latest_version => {}
            Some(first) => {
                return Err(ImportError::validation(format!(
                    "{identifier}: latest_version {} does not match newest history entry {}",
                    file.latest_version.version, first.version
                )));
            }
            None => {
                return Err(ImportError::validation(format!(
                    "{identifier}: empty version_history"
                )));
            }
        }
        Self::from_parts(
            &identifier,
            RecordParts {
                extension_id: file.extension_id,
                extension_name: file.extension_name,
                display_name: file.display_name,
                short_description: file.short_description,
                versions: file.version_history,
                categories: file.categories.unwrap_or_default(),
                tags: file.tags.unwrap_or_default(),
            },
        )
    }
}

impl From<ExtensionRecord> for RecordFile {
    fn from(record: ExtensionRecord) -> Self {
        Self {
            extension_id: record.extension_id,
            extension_name: record.extension_name,
            extension_full_name: record.extension_full_name,
            display_name: record.display_name,
            short_description: record.short_description,
            download_url: Some(record.download_url),
            filename: Some(record.filename),
            marketplace_url: Some(record.marketplace_url),
            categories: Some(record.categories),
            tags: Some(record.tags),
            latest_version: VersionEntry {
                version: record.latest_version,
                last_updated: record.last_updated,
            },
            version_history: record.version_history,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) fn version(v: &str, day: u32) -> VersionEntry {
        VersionEntry {
            version: v.to_string(),
            last_updated: format!("2024-01-{day:02}T10:00:00.000Z"),
        }
    }

    /// A valid record for `full_name` with a single published version.
    pub(crate) fn record(full_name: &str, extension_id: &str) -> ExtensionRecord {
        let identifier = ExtensionIdentifier::parse(full_name).unwrap();
        ExtensionRecord::from_parts(
            &identifier,
            RecordParts {
                extension_id: extension_id.to_string(),
                extension_name: identifier.name().to_string(),
                display_name: format!("{} display", identifier.name()),
                short_description: Some("test extension".to_string()),
                versions: vec![version("1.0.0", 1)],
                categories: vec!["Other".to_string()],
                tags: vec!["__web".to_string(), "keyword".to_string()],
            },
        )
        .unwrap()
    }
}
