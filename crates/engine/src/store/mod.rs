//! MetadataStore struct and open/close logic
//!
//! `MetadataStore` owns everything process-wide:
//! - the backend handle
//! - the retry executor and its call diagnostics
//! - the configuration
//!
//! Operations are grouped into short-lived views borrowed from the store:
//! `runs()`, `jobs()`, `sequences()`, `query()` and `workspaces()`.
//! The store is `Send + Sync` and can be shared across threads in an `Arc`.

pub mod config;
pub mod retry;

pub use config::{StoreConfig, CONFIG_FILE_NAME};
pub use retry::{CallStat, CallStats, RetryConfig, RetryExecutor};

use std::path::Path;
use std::sync::Arc;

use runstore_core::{Error, Result};
use runstore_storage::{DocumentBackend, MemoryBackend};
use tracing::info;

use crate::job::JobManager;
use crate::query::QueryLayer;
use crate::run::RunManager;
use crate::sequence::Sequences;
use crate::workspace::Workspaces;

// ============================================================================
// Container names
// ============================================================================

/// Container holding every job record
pub const JOBS_CONTAINER: &str = "__jobs__";
/// Container holding counter records
pub const COUNTERS_CONTAINER: &str = "ws_counters";
/// Container holding the store info record
pub const STORE_INFO_CONTAINER: &str = "__store_info__";
/// `_id` of the global job counter record
pub const JOB_COUNTER_ID: &str = "__jobs__";
/// Suffix of the pre-counter-record `end_id` layout (`<ws>-end_id`)
pub const LEGACY_END_ID_SUFFIX: &str = "-end_id";

/// Check that a workspace name can serve as a container and counter id
pub(crate) fn validate_ws_name(ws_name: &str) -> Result<()> {
    if ws_name.is_empty() {
        return Err(Error::InvalidInput("workspace name is empty".to_string()));
    }
    if ws_name.contains('/') || ws_name.starts_with('$') {
        return Err(Error::InvalidInput(format!(
            "invalid workspace name '{}'",
            ws_name
        )));
    }
    if [JOBS_CONTAINER, COUNTERS_CONTAINER, STORE_INFO_CONTAINER].contains(&ws_name)
        || ws_name.ends_with(LEGACY_END_ID_SUFFIX)
    {
        return Err(Error::InvalidInput(format!(
            "workspace name '{}' is reserved",
            ws_name
        )));
    }
    Ok(())
}

// ============================================================================
// MetadataStore
// ============================================================================

/// Retry-hardened client for run and job metadata
pub struct MetadataStore {
    pub(crate) backend: Arc<dyn DocumentBackend>,
    pub(crate) retry: RetryExecutor,
    pub(crate) config: StoreConfig,
}

impl MetadataStore {
    /// Create a store over `backend`
    pub fn new(backend: Arc<dyn DocumentBackend>, config: StoreConfig) -> Self {
        info!(
            target: "runstore::store",
            max_attempts = config.max_attempts,
            update_job_stats = config.update_job_stats,
            update_run_stats = config.update_run_stats,
            add_log_records = config.add_log_records,
            "Opening metadata store"
        );
        Self {
            backend,
            retry: RetryExecutor::new(config.retry_config()),
            config,
        }
    }

    /// Create a store over a fresh in-memory backend with default settings
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), StoreConfig::default())
    }

    /// Create a store configured from `<dir>/runstore.toml`
    ///
    /// A default config file is written first if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written, read or parsed.
    pub fn open(backend: Arc<dyn DocumentBackend>, dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        StoreConfig::write_default_if_missing(&path)?;
        let config = StoreConfig::from_file(&path)?;
        Ok(Self::new(backend, config))
    }

    /// The configuration in effect
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The underlying backend
    pub fn backend(&self) -> &dyn DocumentBackend {
        self.backend.as_ref()
    }

    /// The retry executor used for every backend call
    pub fn retry(&self) -> &RetryExecutor {
        &self.retry
    }

    /// Run record operations
    pub fn runs(&self) -> RunManager<'_> {
        RunManager::new(self)
    }

    /// Job record operations
    pub fn jobs(&self) -> JobManager<'_> {
        JobManager::new(self)
    }

    /// Id allocation
    pub fn sequences(&self) -> Sequences<'_> {
        Sequences::new(self)
    }

    /// Filtered, sorted retrieval
    pub fn query(&self) -> QueryLayer<'_> {
        QueryLayer::new(self)
    }

    /// Workspace teardown, cache invalidation and store info
    pub fn workspaces(&self) -> Workspaces<'_> {
        Workspaces::new(self)
    }

    /// Snapshot of per-operation call statistics
    pub fn call_stats(&self) -> CallStats {
        self.retry.call_stats()
    }

    /// Number of calls that needed at least one retry
    pub fn retry_errors(&self) -> u64 {
        self.retry.retry_errors()
    }

    /// Log per-operation call statistics
    pub fn log_call_stats(&self) {
        self.retry.log_call_stats();
    }

    /// Close the store, logging its call statistics
    pub fn close(self) {
        self.log_call_stats();
        info!(
            target: "runstore::store",
            calls = self.retry.call_stats().total_calls(),
            retry_errors = self.retry.retry_errors(),
            "Closed metadata store"
        );
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("config", &self.config)
            .field("retry_errors", &self.retry.retry_errors())
            .finish_non_exhaustive()
    }
}
