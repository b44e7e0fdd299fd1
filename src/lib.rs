//! runstore - Retry-hardened metadata store for experiment runs and jobs
//!
//! runstore keeps one record per run and per job in a document database,
//! allocates run, child-run, end and job ids atomically, and folds the
//! event stream of running workers into the records.
//!
//! # Quick Start
//!
//! ```ignore
//! use runstore::{ComputeTarget, MetadataStore, RunEvent, RunExit, RunSpec};
//!
//! let store = MetadataStore::in_memory();
//!
//! let run_name = store.sequences().next_run_name("ws1")?;
//! store.runs().create(&RunSpec::new("ws1", &run_name, ComputeTarget::local("laptop")))?;
//! store.runs().start("ws1", &run_name)?;
//! store.runs().process_event("ws1", &run_name, &RunEvent::new("metrics", metrics))?;
//! store.runs().exit("ws1", &run_name, &RunExit::from_exit_code(0))?;
//! ```
//!
//! # Architecture
//!
//! - `runstore-core`: record types, documents, update/query builders, errors
//! - `runstore-storage`: the [`DocumentBackend`] seam, an in-memory backend
//!   and fault injection
//! - `runstore-engine`: [`MetadataStore`] with retries, id allocation, run
//!   and job lifecycles, queries and workspace teardown

pub use runstore_core::*;
pub use runstore_engine::*;
pub use runstore_storage::{Cursor, DocumentBackend, Fault, FaultyBackend, MemoryBackend};
