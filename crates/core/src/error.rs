//! Error types for runstore
//!
//! Two layers of errors live here:
//! - [`BackendError`]: what a document backend reports for a single call,
//!   already classified into an [`ErrorClass`] at the adapter boundary
//! - [`Error`]: what store operations return to callers
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for a single backend call
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Classified outcome of a failed backend call
///
/// The retry executor switches on this and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Timeouts, connection resets, rate limiting. Worth retrying.
    Transient,
    /// Malformed filter or update, caller misuse. Never retried.
    Permanent,
    /// Duplicate key, missing record. Suppressible when the caller opts in.
    Ignorable,
}

impl ErrorClass {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Ignorable => "ignorable",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error reported by a document backend for one call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class} backend error: {message}")]
pub struct BackendError {
    /// Classification assigned by the adapter
    pub class: ErrorClass,
    /// Backend-provided detail
    pub message: String,
}

impl BackendError {
    /// Create a backend error with an explicit class
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    /// Timeout, connection reset or similar
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Transient, message)
    }

    /// "Request rate is large" style throttling
    pub fn rate_limited() -> Self {
        Self::transient("request rate is large")
    }

    /// Malformed request
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Permanent, message)
    }

    /// Duplicate `_id` on insert
    pub fn duplicate_key(id: &str) -> Self {
        Self::new(ErrorClass::Ignorable, format!("duplicate key: {}", id))
    }

    /// Record not found
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ErrorClass::Ignorable, format!("not found: {}", what.into()))
    }

    /// Check if this error is worth retrying
    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }
}

/// Error types returned by store operations
#[derive(Debug, Error)]
pub enum Error {
    /// A backend call failed with a non-retryable error
    #[error("{operation} failed: {source}")]
    Backend {
        /// Name of the store operation
        operation: String,
        /// Error reported by the backend
        #[source]
        source: BackendError,
    },

    /// A backend call kept failing transiently until the attempt budget ran out
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Name of the store operation
        operation: String,
        /// Number of attempts made
        attempts: usize,
        /// Last error reported by the backend
        #[source]
        source: BackendError,
    },

    /// Caller supplied an invalid argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Record expected to exist was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// An exit/decrement had no matching start
    #[error("Unmatched transition: {0}")]
    UnmatchedTransition(String),

    /// Configuration could not be read or is invalid
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error (cache files, config files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Wrap a backend error that ended a call
    pub fn backend(operation: impl Into<String>, source: BackendError) -> Self {
        Error::Backend {
            operation: operation.into(),
            source,
        }
    }

    /// Backend error carried by this error, if any
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Error::Backend { source, .. } | Error::RetriesExhausted { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Check if this error came from an ignorable backend outcome
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Error::Backend { source, .. } if source.class == ErrorClass::Ignorable)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::rate_limited();
        let msg = err.to_string();
        assert!(msg.contains("transient"));
        assert!(msg.contains("request rate is large"));
    }

    #[test]
    fn test_backend_error_classes() {
        assert!(BackendError::transient("timeout").is_transient());
        assert!(!BackendError::permanent("bad filter").is_transient());
        assert_eq!(BackendError::duplicate_key("run1").class, ErrorClass::Ignorable);
        assert_eq!(BackendError::not_found("run1").class, ErrorClass::Ignorable);
    }

    #[test]
    fn test_retries_exhausted_names_operation() {
        let err = Error::RetriesExhausted {
            operation: "run_start".to_string(),
            attempts: 25,
            source: BackendError::transient("connection reset"),
        };
        let msg = err.to_string();
        assert!(msg.contains("run_start"));
        assert!(msg.contains("25"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_is_ignorable() {
        let err = Error::backend("create_run", BackendError::duplicate_key("run3"));
        assert!(err.is_ignorable());

        let err = Error::backend("find", BackendError::permanent("unknown operator $foo"));
        assert!(!err.is_ignorable());

        assert!(!Error::NotFound("job9".to_string()).is_ignorable());
    }

    #[test]
    fn test_backend_error_accessor() {
        let err = Error::backend("x", BackendError::permanent("bad"));
        assert_eq!(err.backend_error().map(|e| e.class), Some(ErrorClass::Permanent));
        assert!(Error::InvalidInput("x".into()).backend_error().is_none());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: Error = result.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
