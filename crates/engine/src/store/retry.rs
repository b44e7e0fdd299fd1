//! Retry executor for remote calls
//!
//! Every backend call made by the store goes through [`RetryExecutor`]:
//! - transient failures are retried with a randomized backoff
//! - permanent and ignorable failures propagate on the first attempt
//! - cursor results are materialized inside the retry loop
//! - per-operation call counts and elapsed time are kept for diagnostics

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use runstore_core::{BackendResult, Document, Error, Result};
use runstore_storage::Cursor;
use tracing::{debug, info, warn};

// ============================================================================
// Retry Configuration
// ============================================================================

/// Configuration for remote call retry behavior
///
/// The first retry waits `min_backoff_ms + random(0..=first_backoff_ms)`;
/// every later retry waits `min_backoff_ms + random(0..=max_backoff_ms)`.
/// The defaults ride out sustained rate limiting from a shared database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (minimum 1)
    pub max_attempts: usize,
    /// Fixed part of every wait
    pub min_backoff_ms: u64,
    /// Random spread of the first wait
    pub first_backoff_ms: u64,
    /// Random spread of later waits
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 25,
            min_backoff_ms: 1_000,
            first_backoff_ms: 10_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// Create a new RetryConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryConfig that makes a single attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the fixed part of every wait
    pub fn with_min_backoff_ms(mut self, min_backoff_ms: u64) -> Self {
        self.min_backoff_ms = min_backoff_ms;
        self
    }

    /// Set the random spread of the first wait
    pub fn with_first_backoff_ms(mut self, first_backoff_ms: u64) -> Self {
        self.first_backoff_ms = first_backoff_ms;
        self
    }

    /// Set the random spread of later waits
    pub fn with_max_backoff_ms(mut self, max_backoff_ms: u64) -> Self {
        self.max_backoff_ms = max_backoff_ms;
        self
    }

    /// Calculate the wait before retry number `retry` (0 = first retry)
    pub(crate) fn calculate_delay(&self, retry: usize) -> Duration {
        let spread = if retry == 0 {
            self.first_backoff_ms
        } else {
            self.max_backoff_ms
        };
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        Duration::from_millis(self.min_backoff_ms.saturating_add(jitter))
    }
}

// ============================================================================
// Call statistics
// ============================================================================

/// Totals for one operation name
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CallStat {
    /// Calls made, including ones that failed
    pub count: u64,
    /// Time spent across all calls, retries and backoff included
    pub elapsed: Duration,
}

impl CallStat {
    /// Mean time per call
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(self.elapsed.as_secs_f64() / self.count as f64)
        }
    }
}

/// Per-operation call statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallStats {
    by_name: BTreeMap<String, CallStat>,
}

impl CallStats {
    fn record(&mut self, name: &str, elapsed: Duration) {
        let stat = self.by_name.entry(name.to_string()).or_default();
        stat.count += 1;
        stat.elapsed += elapsed;
    }

    /// Totals for one operation
    pub fn get(&self, name: &str) -> Option<&CallStat> {
        self.by_name.get(name)
    }

    /// All operations, ordered by name
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CallStat)> {
        self.by_name.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Check if no calls were recorded
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Calls across all operations
    pub fn total_calls(&self) -> u64 {
        self.by_name.values().map(|s| s.count).sum()
    }

    /// Time across all operations
    pub fn total_elapsed(&self) -> Duration {
        self.by_name.values().map(|s| s.elapsed).sum()
    }

    /// Multi-line report: one line per operation, then a total line
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (name, stat) in &self.by_name {
            let _ = writeln!(
                out,
                "  {}x {}: avg={:.4}",
                stat.count,
                name,
                stat.mean().as_secs_f64()
            );
        }
        let _ = writeln!(
            out,
            "  {}x CALLS: total={:.4} secs",
            self.total_calls(),
            self.total_elapsed().as_secs_f64()
        );
        out
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Runs backend calls under the retry policy and keeps call diagnostics
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    stats: Mutex<CallStats>,
    retry_errors: AtomicU64,
}

impl RetryExecutor {
    /// Create an executor with the given policy
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(CallStats::default()),
            retry_errors: AtomicU64::new(0),
        }
    }

    /// The retry policy
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op`, retrying transient failures
    ///
    /// # Errors
    ///
    /// - [`Error::Backend`] for a permanent or ignorable failure
    /// - [`Error::RetriesExhausted`] when every attempt failed transiently
    pub fn call<T, F>(&self, name: &str, op: F) -> Result<T>
    where
        F: FnMut() -> BackendResult<T>,
    {
        let started = Instant::now();
        let result = self.attempt(name, op);
        self.stats.lock().record(name, started.elapsed());
        result
    }

    /// Like [`call`](Self::call), but a terminal failure is logged and
    /// swallowed. Transient failures are still retried first.
    pub fn call_ignoring<T, F>(&self, name: &str, op: F) -> Option<T>
    where
        F: FnMut() -> BackendResult<T>,
    {
        match self.call(name, op) {
            Ok(value) => Some(value),
            Err(e) => {
                info!(target: "runstore::retry", operation = name, error = %e, "Ignoring backend error");
                None
            }
        }
    }

    /// Run a find and collect every document
    ///
    /// Iteration happens inside the retry loop, so a cursor that breaks
    /// part-way restarts the whole find.
    pub fn records<F>(&self, name: &str, mut op: F) -> Result<Vec<Document>>
    where
        F: FnMut() -> BackendResult<Cursor>,
    {
        self.call(name, || op()?.collect::<BackendResult<Vec<_>>>())
    }

    /// Snapshot of the per-operation statistics
    pub fn call_stats(&self) -> CallStats {
        self.stats.lock().clone()
    }

    /// Number of calls that needed at least one retry
    pub fn retry_errors(&self) -> u64 {
        self.retry_errors.load(Ordering::Relaxed)
    }

    /// Log the call statistics at debug level
    pub fn log_call_stats(&self) {
        let stats = self.call_stats();
        for (name, stat) in stats.iter() {
            debug!(
                target: "runstore::retry",
                operation = name,
                calls = stat.count,
                avg_secs = stat.mean().as_secs_f64(),
                "Call stats"
            );
        }
        debug!(
            target: "runstore::retry",
            calls = stats.total_calls(),
            total_secs = stats.total_elapsed().as_secs_f64(),
            retry_errors = self.retry_errors(),
            "Call stats total"
        );
    }

    fn attempt<T, F>(&self, name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> BackendResult<T>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match op() {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_transient() {
                return Err(Error::backend(name, err));
            }
            if attempt >= max_attempts {
                warn!(
                    target: "runstore::retry",
                    operation = name,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(Error::RetriesExhausted {
                    operation: name.to_string(),
                    attempts: attempt,
                    source: err,
                });
            }

            if attempt == 1 {
                self.retry_errors.fetch_add(1, Ordering::Relaxed);
            }
            let delay = self.config.calculate_delay(attempt - 1);
            warn!(
                target: "runstore::retry",
                operation = name,
                attempt,
                max_attempts,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying backend call"
            );
            std::thread::sleep(delay);
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runstore_core::{doc, BackendError, ErrorClass};
    use serde_json::json;

    fn immediate(max_attempts: usize) -> RetryExecutor {
        RetryExecutor::new(
            RetryConfig::new()
                .with_max_attempts(max_attempts)
                .with_min_backoff_ms(0)
                .with_first_backoff_ms(0)
                .with_max_backoff_ms(0),
        )
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 25);
        assert_eq!(config.min_backoff_ms, 1_000);
    }

    #[test]
    fn test_delay_ranges() {
        let config = RetryConfig::default();
        for _ in 0..50 {
            let first = config.calculate_delay(0);
            assert!(first >= Duration::from_millis(1_000));
            assert!(first <= Duration::from_millis(11_000));

            let later = config.calculate_delay(5);
            assert!(later >= Duration::from_millis(1_000));
            assert!(later <= Duration::from_millis(61_000));
        }
    }

    #[test]
    fn test_zero_spread_is_fixed() {
        let config = RetryConfig::new()
            .with_min_backoff_ms(7)
            .with_first_backoff_ms(0)
            .with_max_backoff_ms(0);
        assert_eq!(config.calculate_delay(0), Duration::from_millis(7));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(7));
    }

    #[test]
    fn test_transient_then_success() {
        let exec = immediate(5);
        let mut calls = 0;
        let value = exec
            .call("find", || {
                calls += 1;
                if calls < 3 {
                    Err(BackendError::rate_limited())
                } else {
                    Ok(42)
                }
            })
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls, 3);
        assert_eq!(exec.retry_errors(), 1);
        assert_eq!(exec.call_stats().get("find").unwrap().count, 1);
    }

    #[test]
    fn test_permanent_not_retried() {
        let exec = immediate(5);
        let mut calls = 0;
        let err = exec
            .call::<(), _>("update_run_info", || {
                calls += 1;
                Err(BackendError::permanent("unknown operator $foo"))
            })
            .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, Error::Backend { .. }));
        assert!(err.to_string().contains("update_run_info"));
        assert_eq!(exec.retry_errors(), 0);
    }

    #[test]
    fn test_ignorable_not_retried() {
        let exec = immediate(5);
        let mut calls = 0;
        let err = exec
            .call::<(), _>("create_run", || {
                calls += 1;
                Err(BackendError::duplicate_key("run1"))
            })
            .unwrap_err();
        assert_eq!(calls, 1);
        assert!(err.is_ignorable());
    }

    #[test]
    fn test_exhausted() {
        let exec = immediate(3);
        let mut calls = 0;
        let err = exec
            .call::<(), _>("run_start", || {
                calls += 1;
                Err(BackendError::transient("connection reset"))
            })
            .unwrap_err();

        assert_eq!(calls, 3);
        match err {
            Error::RetriesExhausted {
                operation,
                attempts,
                source,
            } => {
                assert_eq!(operation, "run_start");
                assert_eq!(attempts, 3);
                assert_eq!(source.class, ErrorClass::Transient);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_no_retry_makes_one_attempt() {
        let exec = RetryExecutor::new(RetryConfig::no_retry());
        let mut calls = 0;
        let result = exec.call::<(), _>("find", || {
            calls += 1;
            Err(BackendError::transient("timeout"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_call_ignoring() {
        let exec = immediate(2);
        assert_eq!(
            exec.call_ignoring::<(), _>("delete", || Err(BackendError::not_found("ws1"))),
            None
        );
        assert_eq!(
            exec.call_ignoring::<(), _>("delete", || Err(BackendError::transient("timeout"))),
            None
        );
        assert_eq!(exec.call_ignoring("delete", || Ok(1)), Some(1));
        assert_eq!(exec.call_stats().get("delete").unwrap().count, 3);
    }

    #[test]
    fn test_records_restart_after_broken_cursor() {
        let exec = immediate(3);
        let mut calls = 0;
        let records = exec
            .records("get_ws_runs", || {
                calls += 1;
                let items: Vec<BackendResult<Document>> = if calls == 1 {
                    vec![
                        Ok(doc(json!({"_id": "run1"}))),
                        Err(BackendError::transient("cursor lost")),
                    ]
                } else {
                    vec![Ok(doc(json!({"_id": "run1"}))), Ok(doc(json!({"_id": "run2"})))]
                };
                let cursor: Cursor = Box::new(items.into_iter());
                Ok(cursor)
            })
            .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_summary() {
        let exec = immediate(1);
        exec.call("a", || Ok(())).unwrap();
        exec.call("a", || Ok(())).unwrap();
        exec.call("b", || Ok(())).unwrap();

        let stats = exec.call_stats();
        assert_eq!(stats.total_calls(), 3);
        let summary = stats.summary();
        assert!(summary.contains("2x a"));
        assert!(summary.contains("1x b"));
        assert!(summary.contains("3x CALLS"));
    }

    #[test]
    fn test_mean_over_large_counts() {
        assert_eq!(CallStat::default().mean(), Duration::ZERO);

        let stat = CallStat {
            count: 4,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(stat.mean(), Duration::from_millis(500));

        // A count that is a multiple of 2^32 must not divide by zero
        let count = 1u64 << 32;
        let stat = CallStat {
            count,
            elapsed: Duration::from_millis(count),
        };
        let nanos = stat.mean().as_nanos() as i128;
        assert!((nanos - 1_000_000).abs() <= 1, "mean was {}ns", nanos);
    }
}
