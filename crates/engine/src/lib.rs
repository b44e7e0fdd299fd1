//! Metadata store engine for runstore
//!
//! This crate orchestrates the lower layers:
//! - MetadataStore: owns the backend, retry executor and configuration
//! - Retry executor: bounded, randomized-backoff retries for every call
//! - Sequences: atomic id allocation per workspace, run and job
//! - Run and job lifecycle managers
//! - Query layer: filtered, sorted retrieval with field-name translation
//! - Workspaces: teardown and local cache invalidation
//!
//! Correctness never depends on client-side locking: every counter
//! increment and job transition is one atomic single-document update.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod job;
pub mod query;
pub mod run;
pub mod sequence;
pub mod store;
pub mod workspace;

pub use job::JobManager;
pub use query::{QueryLayer, RecordQuery};
pub use run::{RunEnd, RunManager, RunStart};
pub use sequence::{child_run_name, run_name, CounterRecord, Sequences};
pub use store::{
    CallStat, CallStats, MetadataStore, RetryConfig, RetryExecutor, StoreConfig,
    CONFIG_FILE_NAME, COUNTERS_CONTAINER, JOBS_CONTAINER, JOB_COUNTER_ID, LEGACY_END_ID_SUFFIX,
    STORE_INFO_CONTAINER,
};
pub use workspace::Workspaces;
