//! Error taxonomy for the import pipeline.

use std::path::PathBuf;

pub(crate) type Result<T> = std::result::Result<T, ImportError>;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ImportError {
    /// The catalog returned no match for the identifier.
    #[error("extension not found in marketplace: {identifier}")]
    NotFound { identifier: String },

    /// Transport failure or non-2xx status from the catalog. Never retried here.
    #[error("marketplace request failed for {identifier}: {message}")]
    Transient { identifier: String, message: String },

    /// A fetched or stored record does not have the required shape.
    #[error("invalid record: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl ImportError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short label used in per-item log lines.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Transient { .. } => "transient",
            Self::Validation(_) => "validation",
            Self::Storage(_) => "storage",
            Self::Io { .. } => "io",
            Self::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_errors_become_validation() {
        let err: ImportError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn io_error_message_names_path() {
        let err = ImportError::io(
            "/tmp/missing.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert_eq!(err.to_string(), "/tmp/missing.json: no such file");
    }
}
