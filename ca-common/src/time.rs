//! Timestamp utilities
//!
//! All timestamps are stored as fixed-width UTC strings so that SQL
//! comparisons and `ORDER BY` on TEXT columns follow time order.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::{Error, Result};

const DB_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.format(DB_FORMAT).to_string()
}

/// Parse a stored timestamp
///
/// Accepts the storage format, any RFC 3339 string, and SQLite's
/// `CURRENT_TIMESTAMP` format (`YYYY-MM-DD HH:MM:SS`, UTC).
pub fn from_db(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::InvalidInput(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Whole days from `earlier` to `later`, rounded toward negative infinity
pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    let seconds = (later - earlier).num_seconds();
    seconds.div_euclid(86_400)
}
