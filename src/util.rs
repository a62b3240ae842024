use std::env;
use std::str::FromStr;

use crate::error::{ImportError, Result};

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Parse an optional setting value, naming the source in the error.
pub(crate) fn parse_setting<T: FromStr>(name: &str, value: Option<String>) -> Result<Option<T>> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ImportError::Config(format!("invalid {name}: {raw:?}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_setting_values() {
        assert_eq!(parse_setting::<usize>("W", Some(" 8 ".into())).unwrap(), Some(8));
        assert_eq!(parse_setting::<usize>("W", None).unwrap(), None);
        let err = parse_setting::<usize>("EXTCATALOG_WORKERS", Some("many".into())).unwrap_err();
        assert!(err.to_string().contains("EXTCATALOG_WORKERS"));
    }

    #[test]
    fn blank_env_is_unset() {
        assert_eq!(env_optional("EXTCATALOG_TEST_SURELY_UNSET_VARIABLE"), None);
    }
}
