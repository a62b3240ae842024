use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::error::{ImportError, Result};
use crate::store::ExtensionStore;
use crate::types::ExtensionRecord;

#[derive(Debug)]
pub(crate) struct SnapshotReport {
    pub(crate) records: usize,
    pub(crate) categories: Vec<String>,
}

/// Distinct categories across `records`, sorted.
pub(crate) fn collect_categories(records: &[ExtensionRecord]) -> Vec<String> {
    records
        .iter()
        .flat_map(|r| r.categories.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Write the whole table as the JSON array the browsing front-end loads.
pub(crate) fn export_snapshot(store: &ExtensionStore, out: &Path) -> Result<SnapshotReport> {
    let records = store.fetch_all()?;
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| ImportError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(&records)?;
    let tmp = out.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| ImportError::io(&tmp, e))?;
    fs::rename(&tmp, out).map_err(|e| ImportError::io(out, e))?;

    let report = SnapshotReport {
        records: records.len(),
        categories: collect_categories(&records),
    };
    tracing::info!(
        records = report.records,
        categories = report.categories.len(),
        out = %out.display(),
        "snapshot written"
    );
    Ok(report)
}
