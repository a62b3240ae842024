//! Batch import orchestration.
//!
//! Sequential mode fetches and stores one identifier at a time, in input order.
//! Parallel mode walks a list of work items in fixed-size batches: each item in
//! a batch gets its own scoped thread, results come back over a channel in
//! arrival order, and the next batch only starts once every worker of the
//! current one has finished. Per-item failures are recorded, never propagated.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{ImportError, Result};
use crate::marketplace::ExtensionSource;
use crate::store::ExtensionStore;
use crate::types::ExtensionRecord;

pub(crate) const DEFAULT_WORKERS: usize = 4;
const RECORD_FILE_EXTENSION: &str = "json";

// ── Outcomes & aggregation ───────────────────────────────────────────────

/// What a single work item reports back: its key and, on failure, the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ItemOutcome {
    pub(crate) key: String,
    pub(crate) error: Option<String>,
}

impl ItemOutcome {
    pub(crate) fn success(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            error: None,
        }
    }

    pub(crate) fn failure(key: impl Into<String>, error: &ImportError) -> Self {
        Self {
            key: key.into(),
            error: Some(error.to_string()),
        }
    }

    pub(crate) fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ImportStats {
    pub(crate) succeeded: usize,
    pub(crate) failed: usize,
    pub(crate) completed: usize,
    pub(crate) total: usize,
    pub(crate) batches: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ImportSummary {
    pub(crate) stats: ImportStats,
    pub(crate) stored_total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunPhase {
    Idle,
    SchemaEnsured,
    Running { completed: usize, total: usize },
    Completed,
}

/// Progress of one import run. Owned by the orchestrator and returned to the
/// caller; nothing about a run outlives it.
#[derive(Debug)]
pub(crate) struct ImportRun {
    phase: RunPhase,
    stats: ImportStats,
}

impl ImportRun {
    pub(crate) fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            stats: ImportStats::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> RunPhase {
        self.phase
    }

    pub(crate) fn stats(&self) -> &ImportStats {
        &self.stats
    }

    pub(crate) fn ensure_schema(&mut self, store: &ExtensionStore) -> Result<()> {
        debug_assert_eq!(self.phase, RunPhase::Idle);
        store.ensure_schema()?;
        self.phase = RunPhase::SchemaEnsured;
        Ok(())
    }

    /// Runs without a store (pre-fetch) start straight from `Idle`.
    pub(crate) fn start(&mut self, total: usize) {
        debug_assert!(matches!(self.phase, RunPhase::Idle | RunPhase::SchemaEnsured));
        self.stats.total = total;
        self.phase = RunPhase::Running {
            completed: 0,
            total,
        };
    }

    pub(crate) fn begin_batch(&mut self) {
        self.stats.batches += 1;
    }

    pub(crate) fn record(&mut self, outcome: &ItemOutcome) {
        if outcome.is_success() {
            self.stats.succeeded += 1;
        } else {
            self.stats.failed += 1;
        }
        self.stats.completed += 1;
        self.phase = RunPhase::Running {
            completed: self.stats.completed,
            total: self.stats.total,
        };
    }

    pub(crate) fn complete(mut self) -> ImportStats {
        self.phase = RunPhase::Completed;
        self.stats
    }

    pub(crate) fn finish(self, store: &ExtensionStore) -> Result<ImportSummary> {
        let stats = self.complete();
        Ok(ImportSummary {
            stats,
            stored_total: store.count()?,
        })
    }
}

// ── Sequential mode ──────────────────────────────────────────────────────

/// Fetch and upsert each identifier in order. Only schema setup can fail the run.
pub(crate) fn import_sequential<S, R>(
    source: &S,
    store: &ExtensionStore,
    identifiers: &[String],
    mut report: R,
) -> Result<ImportSummary>
where
    S: ExtensionSource + ?Sized,
    R: FnMut(&ItemOutcome, &ImportStats),
{
    let mut run = ImportRun::new();
    run.ensure_schema(store)?;
    run.start(identifiers.len());
    info!(
        total = identifiers.len(),
        db = %store.path().display(),
        "starting sequential import"
    );

    for identifier in identifiers {
        let result = source
            .fetch_extension_info(identifier)
            .and_then(|record| {
                store.upsert(&record)?;
                Ok(record.extension_full_name)
            });
        let outcome = match result {
            Ok(full_name) => {
                debug!(%identifier, %full_name, "stored");
                ItemOutcome::success(full_name)
            }
            Err(err) => {
                warn!(%identifier, kind = err.kind(), error = %err, "import failed");
                ItemOutcome::failure(identifier.as_str(), &err)
            }
        };
        run.record(&outcome);
        report(&outcome, run.stats());
    }

    let summary = run.finish(store)?;
    info!(
        succeeded = summary.stats.succeeded,
        failed = summary.stats.failed,
        stored = summary.stored_total,
        "sequential import finished"
    );
    Ok(summary)
}

// ── Batched worker pool ──────────────────────────────────────────────────

/// Consecutive index ranges of at most `width` items covering `0..total`.
pub(crate) fn plan_batches(total: usize, width: usize) -> Vec<Range<usize>> {
    let width = width.max(1);
    (0..total)
        .step_by(width)
        .map(|start| start..(start + width).min(total))
        .collect()
}

/// Run `work` over `items`, one scoped thread per item, `width` items per batch.
fn dispatch_batches<T, W, K, R>(
    items: &[T],
    width: usize,
    run: &mut ImportRun,
    work: W,
    key_of: K,
    report: &mut R,
) where
    T: Sync,
    W: Fn(&T) -> ItemOutcome + Sync,
    K: Fn(&T) -> String,
    R: FnMut(&ItemOutcome, &ImportStats),
{
    for (batch_index, range) in plan_batches(items.len(), width).into_iter().enumerate() {
        let batch = &items[range];
        run.begin_batch();
        debug!(batch = batch_index + 1, size = batch.len(), "dispatching batch");

        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel::<ItemOutcome>();
            let mut handles = Vec::with_capacity(batch.len());
            for (slot, item) in batch.iter().enumerate() {
                let tx = tx.clone();
                let work = &work;
                let spawned = thread::Builder::new()
                    .name(format!("import-worker-{slot}"))
                    .spawn_scoped(scope, move || {
                        let _ = tx.send(work(item));
                    });
                match spawned {
                    Ok(handle) => handles.push((item, handle)),
                    Err(err) => {
                        let outcome = ItemOutcome {
                            key: key_of(item),
                            error: Some(format!("could not start worker: {err}")),
                        };
                        run.record(&outcome);
                        report(&outcome, run.stats());
                    }
                }
            }
            drop(tx);

            for outcome in rx {
                run.record(&outcome);
                report(&outcome, run.stats());
            }

            // A worker that panicked never sent anything.
            for (item, handle) in handles {
                if handle.join().is_err() {
                    let key = key_of(item);
                    warn!(%key, "worker panicked");
                    let outcome = ItemOutcome {
                        key,
                        error: Some("worker panicked".to_string()),
                    };
                    run.record(&outcome);
                    report(&outcome, run.stats());
                }
            }
        });
    }
}

// ── Parallel mode: pre-fetched record files ──────────────────────────────

/// `.json` files directly inside `dir`, sorted by name.
pub(crate) fn collect_record_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ImportError::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
            ImportError::io(dir, source)
        })?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(RECORD_FILE_EXTENSION))
        {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn load_record_file(path: &Path) -> Result<ExtensionRecord> {
    let text = fs::read_to_string(path).map_err(|e| ImportError::io(path, e))?;
    serde_json::from_str(&text)
        .map_err(|e| ImportError::validation(format!("{}: {e}", path.display())))
}

/// Worker body: own connection, one upsert.
fn import_record_file(path: &Path, db_path: &Path) -> ItemOutcome {
    let result = load_record_file(path).and_then(|record| {
        let store = ExtensionStore::open(db_path)?;
        store.upsert(&record)?;
        Ok(record.extension_full_name)
    });
    match result {
        Ok(full_name) => {
            debug!(file = %path.display(), %full_name, "stored");
            ItemOutcome::success(full_name)
        }
        Err(err) => {
            warn!(file = %path.display(), kind = err.kind(), error = %err, "import failed");
            ItemOutcome::failure(path.display().to_string(), &err)
        }
    }
}

/// Upsert every record file in `dir` using `workers` isolated workers per batch.
pub(crate) fn import_json_dir<R>(
    dir: &Path,
    db_path: &Path,
    workers: usize,
    mut report: R,
) -> Result<ImportSummary>
where
    R: FnMut(&ItemOutcome, &ImportStats),
{
    let store = ExtensionStore::open_or_create(db_path)?;
    let files = collect_record_files(dir)?;

    let mut run = ImportRun::new();
    run.ensure_schema(&store)?;
    run.start(files.len());
    info!(
        files = files.len(),
        workers,
        dir = %dir.display(),
        db = %db_path.display(),
        "starting parallel import"
    );

    dispatch_batches(
        &files,
        workers,
        &mut run,
        |path| import_record_file(path, db_path),
        |path| path.display().to_string(),
        &mut report,
    );

    let summary = run.finish(&store)?;
    info!(
        succeeded = summary.stats.succeeded,
        failed = summary.stats.failed,
        batches = summary.stats.batches,
        stored = summary.stored_total,
        "parallel import finished"
    );
    Ok(summary)
}

// ── Pre-fetch mode ───────────────────────────────────────────────────────

/// Write `record` as `<out_dir>/<publisher.name>.json`.
pub(crate) fn write_record_file(out_dir: &Path, record: &ExtensionRecord) -> Result<PathBuf> {
    let path = out_dir.join(format!(
        "{}.{RECORD_FILE_EXTENSION}",
        record.extension_full_name
    ));
    let json = serde_json::to_string_pretty(record)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| ImportError::io(&tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| ImportError::io(&path, e))?;
    Ok(path)
}

/// Fetch each identifier through the batch pool and save it as a record file.
pub(crate) fn prefetch_to_dir<S, R>(
    source: &S,
    identifiers: &[String],
    out_dir: &Path,
    workers: usize,
    mut report: R,
) -> Result<ImportStats>
where
    S: ExtensionSource + Sync + ?Sized,
    R: FnMut(&ItemOutcome, &ImportStats),
{
    fs::create_dir_all(out_dir).map_err(|e| ImportError::io(out_dir, e))?;

    let mut run = ImportRun::new();
    run.start(identifiers.len());
    info!(
        total = identifiers.len(),
        workers,
        out = %out_dir.display(),
        "starting pre-fetch"
    );

    dispatch_batches(
        identifiers,
        workers,
        &mut run,
        |identifier| {
            let result = source
                .fetch_extension_info(identifier)
                .and_then(|record| write_record_file(out_dir, &record).map(|_| record.extension_full_name));
            match result {
                Ok(full_name) => ItemOutcome::success(full_name),
                Err(err) => {
                    warn!(%identifier, kind = err.kind(), error = %err, "fetch failed");
                    ItemOutcome::failure(identifier.as_str(), &err)
                }
            }
        },
        String::clone,
        &mut report,
    );

    Ok(run.complete())
}

// ── Console output ───────────────────────────────────────────────────────

pub(crate) fn print_progress(outcome: &ItemOutcome, stats: &ImportStats) {
    match &outcome.error {
        None => println!(
            "Imported [{}/{}]: {}",
            stats.completed, stats.total, outcome.key
        ),
        Some(error) => println!(
            "Failed [{}/{}] {}: {error}",
            stats.completed, stats.total, outcome.key
        ),
    }
}

pub(crate) fn print_summary(stats: &ImportStats, stored_total: Option<u64>) {
    println!();
    println!("Import finished:");
    println!("  succeeded: {}", stats.succeeded);
    println!("  failed:    {}", stats.failed);
    if let Some(total) = stored_total {
        println!("  extensions in database: {total}");
    }
}
