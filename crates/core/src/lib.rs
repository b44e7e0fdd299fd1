//! Core types for runstore
//!
//! This crate defines the foundational types used throughout the system:
//! - Document: schemaless record plus dotted-path helpers
//! - FieldValue: tagged (scalar | map) view for flattening hparams/metrics
//! - Update / FindOptions: backend request types
//! - RunStatus / JobStatus / RunSpec / RunEvent / RunExit: domain types
//! - Error / BackendError / ErrorClass: error hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod error;
pub mod fields;
pub mod ops;
pub mod run_types;
pub mod time;

pub use document::{doc, get_path, id_filter, remove_path, set_path, Document, PathConflict, ID_FIELD};
pub use error::{BackendError, BackendResult, Error, ErrorClass, Result};
pub use fields::{flatten, flatten_into, unflatten, FieldValue};
pub use ops::{DeleteResult, FindOptions, ReturnDocument, SortOrder, Update, UpdateResult};
pub use run_types::{
    ComputeTarget, EventKind, JobStatus, RunEvent, RunExit, RunSpec, RunStatus,
    EVENT_ENVELOPE_FIELDS,
};
pub use serde_json::Value;
