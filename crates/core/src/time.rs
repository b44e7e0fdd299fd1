//! Timestamps stored on run records
//!
//! Times are persisted as RFC 3339 strings; durations as seconds (`f64`).

use chrono::{DateTime, SecondsFormat, Utc};

/// Current time
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a time the way it is persisted
pub fn format(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a persisted time. Returns `None` for anything unparseable.
pub fn parse(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Seconds from `earlier` to `later`, never negative
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let micros = (later - earlier).num_microseconds().unwrap_or(i64::MAX);
    (micros.max(0) as f64) / 1_000_000.0
}
