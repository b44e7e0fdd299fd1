//! Store configuration via `runstore.toml`
//!
//! On first open, a default `runstore.toml` is created next to the caller's
//! data. To change settings, edit the file and reopen the store.

use std::path::{Path, PathBuf};

use runstore_core::{Error, Result};
use serde::{Deserialize, Serialize};

use super::retry::RetryConfig;

/// Config file name placed in the store's working directory.
pub const CONFIG_FILE_NAME: &str = "runstore.toml";

/// Store configuration loaded from `runstore.toml`.
///
/// # Example
///
/// ```toml
/// max_attempts = 25
/// min_backoff_ms = 1000
/// first_backoff_ms = 10000
/// max_backoff_ms = 60000
///
/// update_job_stats = true
/// update_run_stats = true
/// add_log_records = true
///
/// batch_size = 50
/// large_result_warning = 500
/// # run_cache_dir = "~/.runstore/cache"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Attempts per remote call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Fixed part of every retry wait.
    #[serde(default = "default_min_backoff_ms")]
    pub min_backoff_ms: u64,
    /// Random spread added to the first retry wait.
    #[serde(default = "default_first_backoff_ms")]
    pub first_backoff_ms: u64,
    /// Random spread added to every later retry wait.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Maintain job counters and job status.
    #[serde(default = "default_true")]
    pub update_job_stats: bool,
    /// Maintain run fields (status, hparams, metrics, durations).
    #[serde(default = "default_true")]
    pub update_run_stats: bool,
    /// Append every run event to `log_records`.
    #[serde(default = "default_true")]
    pub add_log_records: bool,
    /// Documents fetched per cursor round trip on sorted queries.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Counted result size above which a pagination warning is logged.
    #[serde(default = "default_large_result_warning")]
    pub large_result_warning: u64,
    /// Root of the local run summary cache (`<dir>/<ws>/`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_cache_dir: Option<PathBuf>,
}

fn default_max_attempts() -> usize {
    25
}

fn default_min_backoff_ms() -> u64 {
    1_000
}

fn default_first_backoff_ms() -> u64 {
    10_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    50
}

fn default_large_result_warning() -> u64 {
    500
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_backoff_ms: default_min_backoff_ms(),
            first_backoff_ms: default_first_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            update_job_stats: true,
            update_run_stats: true,
            add_log_records: true,
            batch_size: default_batch_size(),
            large_result_warning: default_large_result_warning(),
            run_cache_dir: None,
        }
    }
}

impl StoreConfig {
    /// Retry settings derived from this config.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.max_attempts)
            .with_min_backoff_ms(self.min_backoff_ms)
            .with_first_backoff_ms(self.first_backoff_ms)
            .with_max_backoff_ms(self.max_backoff_ms)
    }

    /// Set the run cache directory
    pub fn with_run_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.run_cache_dir = Some(dir.into());
        self
    }

    /// Retry immediately, without sleeping between attempts.
    pub fn without_backoff(mut self) -> Self {
        self.min_backoff_ms = 0;
        self.first_backoff_ms = 0;
        self.max_backoff_ms = 0;
        self
    }

    /// Reject values the store cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_attempts` or `batch_size` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "max_attempts must be at least 1 in runstore.toml".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::Config(
                "batch_size must be at least 1 in runstore.toml".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# runstore configuration
#
# Retry policy for remote calls. The first retry waits
# min_backoff_ms + random(0..first_backoff_ms); later retries wait
# min_backoff_ms + random(0..max_backoff_ms).
max_attempts = 25
min_backoff_ms = 1000
first_backoff_ms = 10000
max_backoff_ms = 60000

# Record keeping switches
update_job_stats = true
update_run_stats = true
add_log_records = true

# Cursor batch size for sorted queries, and the result count above which
# a pagination hint is logged
batch_size = 50
large_result_warning = 500

# Local run summary cache, removed per workspace on deletion
# run_cache_dir = "/var/cache/runstore"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: StoreConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_toml_parses_to_default() {
        let config: StoreConfig = toml::from_str(StoreConfig::default_toml()).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn empty_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "").unwrap();

        let config = StoreConfig::from_file(&path).unwrap();
        assert_eq!(config.max_attempts, 25);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.large_result_warning, 500);
        assert!(config.add_log_records);
        assert!(config.run_cache_dir.is_none());
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        StoreConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());
        assert_eq!(StoreConfig::from_file(&path).unwrap(), StoreConfig::default());
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "max_attempts = 3\nadd_log_records = false\n").unwrap();

        StoreConfig::write_default_if_missing(&path).unwrap();

        let config = StoreConfig::from_file(&path).unwrap();
        assert_eq!(config.max_attempts, 3);
        assert!(!config.add_log_records);
    }

    #[test]
    fn round_trip_with_cache_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = StoreConfig::default()
            .with_run_cache_dir(dir.path().join("cache"))
            .without_backoff();

        config.write_to_file(&path).unwrap();
        assert_eq!(StoreConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "batch_size = 0\n").unwrap();

        let err = StoreConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn unparsable_file_names_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "max_attempts = \"lots\"\n").unwrap();

        let err = StoreConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains(CONFIG_FILE_NAME));
    }

    #[test]
    fn retry_config_follows_fields() {
        let config = StoreConfig {
            max_attempts: 4,
            ..StoreConfig::default()
        }
        .without_backoff();
        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.max_backoff_ms, 0);
    }
}
