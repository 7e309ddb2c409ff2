//! Application configuration management.
//!
//! The core consumes these values but does not own where they come from.
//! They are loaded from `~/.config/reefcache/config.json` when present and
//! then overridden by `REEFCACHE_*` environment variables. Durations are
//! stored in milliseconds.

use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::DEFAULT_PREFIX;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "reefcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Prefix of environment variable overrides
const ENV_PREFIX: &str = "REEFCACHE_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not find {0} directory")]
    NoDirectory(&'static str),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_ms: u64,
    pub upload_timeout_ms: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    /// Default staleness window for cached API results; 0 disables expiry.
    pub cache_ttl_ms: u64,
    pub storage_prefix: String,
    pub change_history: usize,
    pub message_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            request_timeout_ms: 30_000,
            upload_timeout_ms: 120_000,
            retry_count: 3,
            retry_delay_ms: 1_000,
            cache_ttl_ms: 5 * 60 * 1000,
            storage_prefix: DEFAULT_PREFIX.to_string(),
            change_history: crate::events::DEFAULT_CHANGE_HISTORY,
            message_history: crate::events::DEFAULT_MESSAGE_HISTORY,
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults when the
    /// file does not exist, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::config_path()?)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `REEFCACHE_<FIELD>` variables, as read by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    name: name.to_string(),
                    value,
                })
        }

        let var = |suffix: &str| {
            let name = format!("{}{}", ENV_PREFIX, suffix);
            lookup(&name).map(|value| (name, value))
        };

        if let Some((_, value)) = var("API_BASE_URL") {
            self.api_base_url = value;
        }
        if let Some((name, value)) = var("REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse(&name, value)?;
        }
        if let Some((name, value)) = var("UPLOAD_TIMEOUT_MS") {
            self.upload_timeout_ms = parse(&name, value)?;
        }
        if let Some((name, value)) = var("RETRY_COUNT") {
            self.retry_count = parse(&name, value)?;
        }
        if let Some((name, value)) = var("RETRY_DELAY_MS") {
            self.retry_delay_ms = parse(&name, value)?;
        }
        if let Some((name, value)) = var("CACHE_TTL_MS") {
            self.cache_ttl_ms = parse(&name, value)?;
        }
        if let Some((_, value)) = var("STORAGE_PREFIX") {
            self.storage_prefix = value;
        }
        Ok(())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoDirectory("config"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Where the directory-backed storage medium lives.
    pub fn storage_dir(&self) -> Result<PathBuf, ConfigError> {
        let cache_dir = dirs::cache_dir().ok_or(ConfigError::NoDirectory("cache"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }

    pub fn upload_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_delay_ms)
    }

    /// `None` when cached API results should never expire.
    pub fn cache_ttl(&self) -> Option<Duration> {
        match self.cache_ttl_ms {
            0 => None,
            ms => {
                let ms = i64::try_from(ms).unwrap_or(i64::MAX);
                Some(Duration::try_milliseconds(ms).unwrap_or(Duration::MAX))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_file(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let json = r#"{"apiBaseUrl": "https://reef.example/api", "retryCount": 5}"#;
        std::fs::write(&path, json).unwrap();

        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.api_base_url, "https://reef.example/api");
        assert_eq!(config.retry_count, 5);
        assert_eq!(config.request_timeout_ms, 30_000);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(Config::load_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("REEFCACHE_API_BASE_URL", "https://env.example"),
            ("REEFCACHE_CACHE_TTL_MS", "0"),
            ("REEFCACHE_RETRY_DELAY_MS", " 250 "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.api_base_url, "https://env.example");
        assert_eq!(config.cache_ttl(), None);
        assert_eq!(config.retry_delay(), std::time::Duration::from_millis(250));
    }

    #[test]
    fn test_bad_env_value_is_reported() {
        let mut config = Config::default();
        let err = config
            .apply_env(|name| (name == "REEFCACHE_RETRY_COUNT").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("REEFCACHE_RETRY_COUNT"));
    }

    #[test]
    fn test_default_ttl_is_five_minutes() {
        assert_eq!(Config::default().cache_ttl(), Some(Duration::minutes(5)));
    }
}
