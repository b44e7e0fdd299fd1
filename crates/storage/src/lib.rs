//! Storage layer for runstore
//!
//! This crate is the backend-adapter boundary:
//! - DocumentBackend: the remote document database protocol
//! - MemoryBackend: in-process implementation with atomic single-document ops
//! - FaultyBackend: failure-injecting wrapper for exercising retries
//! - Filter matching, update application and projection shared by adapters

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod faults;
pub mod matcher;
pub mod memory;
pub mod projection;
pub mod update;

pub use backend::{Cursor, DocumentBackend};
pub use faults::{Fault, FaultyBackend};
pub use memory::{MemoryBackend, DEFAULT_BATCH_SIZE};
