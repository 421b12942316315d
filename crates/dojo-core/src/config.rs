//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! backend URL, response cache size, storage location, request timeout and
//! the last email used to sign in.
//!
//! Configuration is stored at `~/.config/dojo/config.json`. Environment
//! variables (`DOJO_API_URL`, `DOJO_STORAGE_DIR`, `DOJO_CACHE_SIZE`,
//! `DOJO_TIMEOUT_SECS`) override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::{BoundedCache, DEFAULT_MAX_SIZE};

/// Application name used for config/storage directory paths
const APP_NAME: &str = "dojo";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Backend used when nothing is configured (the local mock server).
const DEFAULT_API_BASE_URL: &str = "http://localhost:3001";

/// HTTP request timeout in seconds when not configured.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub cache_size: Option<usize>,
    pub storage_dir: Option<PathBuf>,
    pub request_timeout_secs: Option<u64>,
    pub last_email: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `DOJO_*` environment variables on top of the file values.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(url) = lookup("DOJO_API_URL") {
            self.api_base_url = Some(url);
        }
        if let Some(dir) = lookup("DOJO_STORAGE_DIR") {
            self.storage_dir = Some(PathBuf::from(dir));
        }
        if let Some(size) = lookup("DOJO_CACHE_SIZE") {
            let size = size
                .trim()
                .parse::<usize>()
                .with_context(|| format!("DOJO_CACHE_SIZE is not a number: {:?}", size))?;
            self.cache_size = Some(size);
        }
        if let Some(secs) = lookup("DOJO_TIMEOUT_SECS") {
            let secs = secs
                .trim()
                .parse::<u64>()
                .with_context(|| format!("DOJO_TIMEOUT_SECS is not a number: {:?}", secs))?;
            self.request_timeout_secs = Some(secs);
        }
        Ok(self)
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL)
    }

    /// Response cache capacity; a configured size of zero is rejected.
    pub fn cache_size(&self) -> Result<usize> {
        let size = self.cache_size.unwrap_or(DEFAULT_MAX_SIZE);
        BoundedCache::<()>::new(size).context("Invalid cache_size in configuration")?;
        Ok(size)
    }

    pub fn storage_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.storage_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME).join("storage"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_base_url(), DEFAULT_API_BASE_URL);
        assert_eq!(config.cache_size().unwrap(), 20);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_zero_cache_size_is_rejected() {
        let config = Config {
            cache_size: Some(0),
            ..Config::default()
        };
        let err = config.cache_size().unwrap_err();
        assert!(format!("{:#}", err).contains("capacity must be at least 1"));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let config = Config {
            api_base_url: Some("http://file".to_string()),
            ..Config::default()
        }
        .with_overrides(env(&[
            ("DOJO_API_URL", "http://env:8080/api"),
            ("DOJO_CACHE_SIZE", "50"),
            ("DOJO_STORAGE_DIR", "/tmp/dojo-test"),
            ("DOJO_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.api_base_url(), "http://env:8080/api");
        assert_eq!(config.cache_size().unwrap(), 50);
        assert_eq!(config.storage_dir().unwrap(), PathBuf::from("/tmp/dojo-test"));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_bad_numeric_override_is_an_error() {
        let result = Config::default().with_overrides(env(&[("DOJO_CACHE_SIZE", "lots")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = Config {
            last_email: Some("ana@dojo.test".to_string()),
            cache_size: Some(40),
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }
}
