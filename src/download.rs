//! Package download: resolve each identifier's latest version and save its
//! `.vsix` as `<publisher.name>-<version>.vsix`, one identifier at a time.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ImportError, Result};
use crate::importer::{ImportRun, ImportStats, ItemOutcome};
use crate::marketplace::{ExtensionSource, MarketplaceClient};
use crate::types::ExtensionIdentifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DownloadResult {
    Downloaded { path: PathBuf, bytes: u64 },
    /// A file with the target name was already there; nothing was fetched.
    AlreadyPresent(PathBuf),
}

pub(crate) fn download_extension(
    client: &MarketplaceClient,
    identifier: &str,
    out_dir: &Path,
) -> Result<DownloadResult> {
    let record = client.fetch_extension_info(identifier)?;
    let path = out_dir.join(&record.filename);
    if path.exists() {
        return Ok(DownloadResult::AlreadyPresent(path));
    }
    let canonical = ExtensionIdentifier::parse(&record.extension_full_name)?;
    let url = client.package_url(&canonical, &record.latest_version)?;
    let bytes = client.download_package(&canonical, &url, &path)?;
    Ok(DownloadResult::Downloaded { path, bytes })
}

/// Download every identifier into `out_dir`. Per-item failures are reported
/// and counted; only an unusable output directory fails the run.
pub(crate) fn download_all<R>(
    client: &MarketplaceClient,
    identifiers: &[String],
    out_dir: &Path,
    mut report: R,
) -> Result<ImportStats>
where
    R: FnMut(&ItemOutcome, &ImportStats),
{
    fs::create_dir_all(out_dir).map_err(|e| ImportError::io(out_dir, e))?;

    let mut run = ImportRun::new();
    run.start(identifiers.len());
    info!(total = identifiers.len(), out = %out_dir.display(), "starting package download");

    for identifier in identifiers {
        let outcome = match download_extension(client, identifier, out_dir) {
            Ok(DownloadResult::Downloaded { path, bytes }) => {
                debug!(%identifier, file = %path.display(), bytes, "downloaded");
                ItemOutcome::success(file_label(&path))
            }
            Ok(DownloadResult::AlreadyPresent(path)) => {
                debug!(%identifier, file = %path.display(), "already present");
                ItemOutcome::success(format!("{} (already present)", file_label(&path)))
            }
            Err(err) => {
                warn!(%identifier, kind = err.kind(), error = %err, "download failed");
                ItemOutcome::failure(identifier.as_str(), &err)
            }
        };
        run.record(&outcome);
        report(&outcome, run.stats());
    }

    Ok(run.complete())
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
