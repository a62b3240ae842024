//! SQLite-backed extension table.
//!
//! Every operation goes straight to the database file; nothing is cached.
//! Nested fields (`version_history`, `categories`, `tags`) are stored as JSON
//! text and decoded on read.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{ImportError, Result};
use crate::types::{ExtensionRecord, VersionEntry};

// ── Schema SQL ───────────────────────────────────────────────────────────

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS extensions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    extension_id TEXT NOT NULL UNIQUE,
    extension_name TEXT NOT NULL,
    extension_full_name TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    short_description TEXT,
    latest_version TEXT NOT NULL,
    last_updated DATETIME NOT NULL,
    version_history TEXT NOT NULL,
    categories TEXT,
    tags TEXT,
    download_url TEXT NOT NULL,
    filename TEXT NOT NULL,
    marketplace_url TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_extension_full_name ON extensions(extension_full_name);
CREATE INDEX IF NOT EXISTS idx_last_updated ON extensions(last_updated);
CREATE INDEX IF NOT EXISTS idx_display_name ON extensions(display_name);
";

const SELECT_COLUMNS: &str = "extension_id, extension_name, extension_full_name, display_name,
    short_description, latest_version, last_updated, version_history, categories, tags,
    download_url, filename, marketplace_url";

// INSERT OR REPLACE deletes every row conflicting on either unique column,
// then inserts; a fresh id is assigned.
const UPSERT_SQL: &str = "INSERT OR REPLACE INTO extensions (
    extension_id, extension_name, extension_full_name, display_name,
    short_description, latest_version, last_updated, version_history,
    categories, tags, download_url, filename, marketplace_url
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

// ═════════════════════════════════════════════════════════════════════════
// ExtensionStore
// ═════════════════════════════════════════════════════════════════════════

pub(crate) struct ExtensionStore {
    conn: Connection,
    path: PathBuf,
}

impl ExtensionStore {
    /// Open an existing database. Errors if the file doesn't exist.
    pub(crate) fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ImportError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "database not found"),
            ));
        }
        let store = Self {
            conn: Connection::open(path)?,
            path: path.to_path_buf(),
        };
        store.apply_pragmas()?;
        Ok(store)
    }

    /// Open or create a database file and make sure the schema exists.
    pub(crate) fn open_or_create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ImportError::io(parent, e))?;
        }
        let store = Self {
            conn: Connection::open(path)?,
            path: path.to_path_buf(),
        };
        store.apply_pragmas()?;
        store.ensure_schema()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> Result<()> {
        // busy_timeout first so the journal_mode switch can wait on other writers.
        self.conn.execute_batch(
            "PRAGMA busy_timeout = 5000;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Ok(())
    }

    /// Idempotent; safe on every startup.
    pub(crate) fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Insert or wholesale-replace the row keyed by full name / extension id.
    pub(crate) fn upsert(&self, record: &ExtensionRecord) -> Result<()> {
        let version_history = serde_json::to_string(&record.version_history)?;
        let categories = serde_json::to_string(&record.categories)?;
        let tags = serde_json::to_string(&crate::tags::filter_tags(&record.tags))?;
        self.conn.execute(
            UPSERT_SQL,
            params![
                record.extension_id,
                record.extension_name,
                record.extension_full_name,
                record.display_name,
                record.short_description,
                record.latest_version,
                record.last_updated,
                version_history,
                categories,
                tags,
                record.download_url,
                record.filename,
                record.marketplace_url,
            ],
        )?;
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub(crate) fn count(&self) -> Result<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM extensions", [], |row| row.get::<_, i64>(0))?;
        Ok(count as u64)
    }

    /// Full table contents ordered by full name; the snapshot the browsing UI consumes.
    pub(crate) fn fetch_all(&self) -> Result<Vec<ExtensionRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM extensions ORDER BY extension_full_name");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], StoredRow::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.decode()?);
        }
        Ok(records)
    }

    pub(crate) fn get(&self, full_name: &str) -> Result<Option<ExtensionRecord>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM extensions WHERE extension_full_name = ?1");
        let row = self
            .conn
            .query_row(&sql, params![full_name], StoredRow::from_row)
            .optional()?;
        row.map(StoredRow::decode).transpose()
    }

    /// Row id for `full_name`, if present.
    #[cfg(test)]
    pub(crate) fn row_id(&self, full_name: &str) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM extensions WHERE extension_full_name = ?1",
                params![full_name],
                |row| row.get(0),
            )
            .optional()?)
    }
}

/// Raw column values before JSON decoding.
struct StoredRow {
    extension_id: String,
    extension_name: String,
    extension_full_name: String,
    display_name: String,
    short_description: Option<String>,
    latest_version: String,
    last_updated: String,
    version_history: String,
    categories: Option<String>,
    tags: Option<String>,
    download_url: String,
    filename: String,
    marketplace_url: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            extension_id: row.get(0)?,
            extension_name: row.get(1)?,
            extension_full_name: row.get(2)?,
            display_name: row.get(3)?,
            short_description: row.get(4)?,
            latest_version: row.get(5)?,
            last_updated: row.get(6)?,
            version_history: row.get(7)?,
            categories: row.get(8)?,
            tags: row.get(9)?,
            download_url: row.get(10)?,
            filename: row.get(11)?,
            marketplace_url: row.get(12)?,
        })
    }

    fn decode(self) -> Result<ExtensionRecord> {
        let context = |column: &str, e: serde_json::Error| {
            ImportError::validation(format!(
                "{}: column {column} is not valid JSON: {e}",
                self.extension_full_name
            ))
        };
        let version_history: Vec<VersionEntry> =
            serde_json::from_str(&self.version_history).map_err(|e| context("version_history", e))?;
        let categories = decode_list(self.categories.as_deref()).map_err(|e| context("categories", e))?;
        let tags = decode_list(self.tags.as_deref()).map_err(|e| context("tags", e))?;
        Ok(ExtensionRecord {
            extension_id: self.extension_id,
            extension_name: self.extension_name,
            extension_full_name: self.extension_full_name,
            display_name: self.display_name,
            short_description: self.short_description,
            latest_version: self.latest_version,
            last_updated: self.last_updated,
            version_history,
            categories,
            tags,
            download_url: self.download_url,
            filename: self.filename,
            marketplace_url: self.marketplace_url,
        })
    }
}

fn decode_list(raw: Option<&str>) -> serde_json::Result<Vec<String>> {
    match raw {
        Some(text) if !text.trim().is_empty() => serde_json::from_str(text),
        _ => Ok(Vec::new()),
    }
}
