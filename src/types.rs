//! Core data types used throughout the crate
//!
//! # Key Types
//!
//! - **`Timestamp`**: Unix time in milliseconds, UTC
//! - **`TimeRange`**: Half-open window `[start, end)` used by jobs and bins
//! - **`Sample`**: A timestamp with a numeric value, as pulled from an event source
//!
//! # Example
//!
//! ```rust
//! use eventgrid::types::{Sample, TimeRange};
//!
//! let range = TimeRange::new(1000, 2000).unwrap();
//! assert!(range.contains(1000));
//! assert!(!range.contains(2000)); // end is exclusive
//!
//! let sample = Sample::new(1500, 3.0);
//! assert!(range.contains(sample.timestamp));
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Unix timestamp in milliseconds since 1970-01-01 00:00:00 UTC
pub type Timestamp = i64;

/// Milliseconds in one day
pub const MS_PER_DAY: i64 = 86_400_000;

/// A single timestamped value
///
/// Log events carry an implicit value of `1.0` per occurrence; metric
/// events carry the measured value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix timestamp in milliseconds
    pub timestamp: Timestamp,

    /// Measurement value
    pub value: f64,
}

impl Sample {
    /// Create a new sample
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// A single occurrence of a log event
    pub fn occurrence(timestamp: Timestamp) -> Self {
        Self::new(timestamp, 1.0)
    }
}

/// Time range `[start, end)` in milliseconds
///
/// The start is inclusive and the end is exclusive, so consecutive ranges
/// with `a.end == b.start` never share a timestamp.
///
/// # Example
///
/// ```rust
/// use eventgrid::types::TimeRange;
///
/// let range = TimeRange::new(0, 86_400_000).unwrap();
/// assert_eq!(range.duration_ms(), 86_400_000);
/// assert!(TimeRange::new(10, 10).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds (inclusive)
    pub start: Timestamp,

    /// End timestamp in milliseconds (exclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range, rejecting empty or inverted ranges
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self> {
        if start >= end {
            return Err(Error::Configuration(format!(
                "Invalid time range: start {} >= end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Create a range starting at `start` spanning `width`
    pub fn starting_at(start: Timestamp, width: Duration) -> Result<Self> {
        let width_ms = duration_ms(width)?;
        let end = start.checked_add(width_ms).ok_or_else(|| {
            Error::Configuration(format!("Time range starting at {} overflows", start))
        })?;
        Self::new(start, end)
    }

    /// Check if a timestamp falls within this range (`start <= t < end`)
    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Width of the range in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }

    /// True when both bounds fall on a UTC midnight
    pub fn is_whole_days(&self) -> bool {
        is_midnight(self.start) && is_midnight(self.end)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", format_timestamp(self.start), format_timestamp(self.end))
    }
}

/// Convert a duration to whole milliseconds, rejecting values beyond `i64`
pub fn duration_ms(d: Duration) -> Result<i64> {
    i64::try_from(d.as_millis())
        .map_err(|_| Error::Configuration(format!("Duration {:?} is too large", d)))
}

/// True if the timestamp is exactly 00:00:00.000 UTC
pub fn is_midnight(timestamp: Timestamp) -> bool {
    timestamp.rem_euclid(MS_PER_DAY) == 0
}

/// Convert a millisecond timestamp to a UTC datetime
pub fn to_datetime(timestamp: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
}

/// Human-readable rendering, `YYYY-MM-DD HH:MM:SS` (milliseconds appended when non-zero)
pub fn format_timestamp(timestamp: Timestamp) -> String {
    match to_datetime(timestamp) {
        Some(dt) if dt.nanosecond() == 0 => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => timestamp.to_string(),
    }
}

/// Parse `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS` or RFC 3339 into a UTC timestamp
pub fn parse_timestamp(s: &str) -> Result<Timestamp> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(ndt.and_utc().timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(ndt.and_utc().timestamp_millis());
        }
    }
    Err(Error::Configuration(format!("Invalid datetime '{}'", s)))
}
