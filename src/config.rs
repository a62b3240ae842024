//! Layered settings: built-in defaults < JSON config file < environment < CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ImportError, Result};
use crate::importer::DEFAULT_WORKERS;
use crate::marketplace::{DEFAULT_QUERY_ENDPOINT, DEFAULT_USER_AGENT};
use crate::util::{env_optional, parse_setting};

pub(crate) const DEFAULT_CONFIG_FILE: &str = "extcatalog.json";
pub(crate) const DEFAULT_DATA_DIR: &str = "data";
pub(crate) const DEFAULT_DB_FILE: &str = "extensions.db";
// Relative to the data directory's parent, where the front-end serves `/data/extensions.json`.
pub(crate) const DEFAULT_SNAPSHOT_PATH: &str = "public/data/extensions.json";
pub(crate) const DEFAULT_PACKAGE_DIR: &str = "extensions";

pub(crate) const ENV_DB: &str = "EXTCATALOG_DB";
pub(crate) const ENV_DATA_DIR: &str = "EXTCATALOG_DATA_DIR";
pub(crate) const ENV_WORKERS: &str = "EXTCATALOG_WORKERS";
pub(crate) const ENV_ENDPOINT: &str = "EXTCATALOG_ENDPOINT";
pub(crate) const ENV_USER_AGENT: &str = "EXTCATALOG_USER_AGENT";
pub(crate) const ENV_TIMEOUT_SECS: &str = "EXTCATALOG_TIMEOUT_SECS";
pub(crate) const ENV_SNAPSHOT: &str = "EXTCATALOG_SNAPSHOT";
pub(crate) const ENV_PACKAGE_DIR: &str = "EXTCATALOG_PACKAGE_DIR";

/// On-disk config. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct FileConfig {
    pub(crate) db_path: Option<PathBuf>,
    pub(crate) data_dir: Option<PathBuf>,
    pub(crate) snapshot_path: Option<PathBuf>,
    pub(crate) package_dir: Option<PathBuf>,
    pub(crate) workers: Option<usize>,
    pub(crate) endpoint: Option<String>,
    pub(crate) user_agent: Option<String>,
    pub(crate) timeout_secs: Option<u64>,
}

/// Values given on the command line; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub(crate) struct ConfigOverrides {
    pub(crate) db_path: Option<PathBuf>,
    pub(crate) workers: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settings {
    pub(crate) db_path: PathBuf,
    /// Pre-fetched record files live directly in here.
    pub(crate) data_dir: PathBuf,
    /// Default export target. Never inside `data_dir`, which holds only record files.
    pub(crate) snapshot_path: PathBuf,
    /// Default destination for downloaded `.vsix` packages.
    pub(crate) package_dir: PathBuf,
    pub(crate) workers: usize,
    pub(crate) endpoint: String,
    pub(crate) user_agent: String,
    /// `None` waits forever on the marketplace.
    pub(crate) timeout: Option<Duration>,
}

/// Read `path`, or the default config file when `path` is `None`.
/// A missing default file is fine; a missing explicit one is not.
pub(crate) fn load_file_config(path: Option<&Path>) -> Result<FileConfig> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    let data = match std::fs::read_to_string(&path) {
        Ok(data) => data,
        Err(err) if !explicit && err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(FileConfig::default());
        }
        Err(err) => return Err(ImportError::io(path, err)),
    };
    serde_json::from_str(&data)
        .map_err(|e| ImportError::Config(format!("{}: {e}", path.display())))
}

impl Settings {
    /// Merge every layer. `env` is the variable lookup, normally [`env_optional`].
    pub(crate) fn resolve<E>(file: FileConfig, env: E, overrides: &ConfigOverrides) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let data_dir = env(ENV_DATA_DIR)
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let db_path = overrides
            .db_path
            .clone()
            .or_else(|| env(ENV_DB).map(PathBuf::from))
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join(DEFAULT_DB_FILE));

        let snapshot_path = env(ENV_SNAPSHOT)
            .map(PathBuf::from)
            .or(file.snapshot_path)
            .unwrap_or_else(|| {
                data_dir
                    .parent()
                    .unwrap_or_else(|| Path::new(""))
                    .join(DEFAULT_SNAPSHOT_PATH)
            });

        let package_dir = env(ENV_PACKAGE_DIR)
            .map(PathBuf::from)
            .or(file.package_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PACKAGE_DIR));

        let workers = match overrides.workers {
            Some(n) => n,
            None => parse_setting::<usize>(ENV_WORKERS, env(ENV_WORKERS))?
                .or(file.workers)
                .unwrap_or(DEFAULT_WORKERS),
        };
        if workers == 0 {
            return Err(ImportError::Config("worker count must be at least 1".into()));
        }

        let endpoint = env(ENV_ENDPOINT)
            .or(file.endpoint)
            .unwrap_or_else(|| DEFAULT_QUERY_ENDPOINT.to_string());
        let parsed = url::Url::parse(&endpoint)
            .map_err(|e| ImportError::Config(format!("invalid endpoint {endpoint:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ImportError::Config(format!(
                "endpoint must be http(s): {endpoint}"
            )));
        }

        let user_agent = env(ENV_USER_AGENT)
            .or(file.user_agent)
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let timeout = parse_setting::<u64>(ENV_TIMEOUT_SECS, env(ENV_TIMEOUT_SECS))?
            .or(file.timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            db_path,
            data_dir,
            snapshot_path,
            package_dir,
            workers,
            endpoint,
            user_agent,
            timeout,
        })
    }

    pub(crate) fn from_environment(config: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let file = load_file_config(config)?;
        Self::resolve(file, env_optional, overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults() {
        let settings =
            Settings::resolve(FileConfig::default(), no_env, &ConfigOverrides::default()).unwrap();
        assert_eq!(settings.db_path, PathBuf::from("data/extensions.db"));
        assert_eq!(settings.workers, DEFAULT_WORKERS);
        assert_eq!(settings.endpoint, DEFAULT_QUERY_ENDPOINT);
        assert_eq!(settings.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(settings.timeout, None);
        assert_eq!(
            settings.snapshot_path,
            PathBuf::from("public/data/extensions.json")
        );
        assert_eq!(settings.package_dir, PathBuf::from("extensions"));
    }

    #[test]
    fn layers_in_order() {
        let file = FileConfig {
            db_path: Some("file.db".into()),
            workers: Some(2),
            timeout_secs: Some(30),
            ..Default::default()
        };
        let vars: HashMap<&str, &str> = [(ENV_DB, "env.db"), (ENV_WORKERS, "6")].into();
        let env = |name: &str| vars.get(name).map(|v| v.to_string());

        let settings = Settings::resolve(file.clone(), env, &ConfigOverrides::default()).unwrap();
        assert_eq!(settings.db_path, PathBuf::from("env.db"));
        assert_eq!(settings.workers, 6);
        assert_eq!(settings.timeout, Some(Duration::from_secs(30)));

        let cli = ConfigOverrides {
            db_path: Some("cli.db".into()),
            workers: Some(9),
        };
        let settings = Settings::resolve(file, env, &cli).unwrap();
        assert_eq!(settings.db_path, PathBuf::from("cli.db"));
        assert_eq!(settings.workers, 9);
    }

    #[test]
    fn snapshot_follows_data_dir_but_stays_outside_it() {
        let env = |name: &str| (name == ENV_DATA_DIR).then(|| "/srv/catalog/data".to_string());
        let settings = Settings::resolve(FileConfig::default(), env, &ConfigOverrides::default()).unwrap();
        assert_eq!(
            settings.snapshot_path,
            PathBuf::from("/srv/catalog/public/data/extensions.json")
        );
        assert_ne!(settings.snapshot_path.parent(), Some(settings.data_dir.as_path()));

        let file = FileConfig {
            snapshot_path: Some("site/extensions.json".into()),
            ..Default::default()
        };
        let settings = Settings::resolve(file, no_env, &ConfigOverrides::default()).unwrap();
        assert_eq!(settings.snapshot_path, PathBuf::from("site/extensions.json"));
    }

    #[test]
    fn rejects_zero_workers_and_bad_endpoint() {
        let zero = ConfigOverrides {
            workers: Some(0),
            ..Default::default()
        };
        assert!(Settings::resolve(FileConfig::default(), no_env, &zero).is_err());

        let file = FileConfig {
            endpoint: Some("ftp://example.com/q".into()),
            ..Default::default()
        };
        assert!(Settings::resolve(file, no_env, &ConfigOverrides::default()).is_err());

        let env = |name: &str| (name == ENV_WORKERS).then(|| "lots".to_string());
        assert!(Settings::resolve(FileConfig::default(), env, &ConfigOverrides::default()).is_err());
    }

    #[test]
    fn config_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extcatalog.json");
        std::fs::write(&path, r#"{"workers": 3, "data_dir": "out"}"#).unwrap();
        let file = load_file_config(Some(&path)).unwrap();
        assert_eq!(file.workers, Some(3));
        assert_eq!(file.data_dir, Some(PathBuf::from("out")));

        std::fs::write(&path, r#"{"wrokers": 3}"#).unwrap();
        assert!(matches!(load_file_config(Some(&path)), Err(ImportError::Config(_))));

        let missing = dir.path().join("missing.json");
        assert!(load_file_config(Some(&missing)).is_err());
    }
}
