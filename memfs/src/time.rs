use std::time::{SystemTime, UNIX_EPOCH};

use crate::fs::{FsError, Result};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Nanoseconds since the Unix epoch.
pub type Timestamp = i64;

const NANOS_PER_MILLI: i64 = 1_000_000;
const NANOS_PER_SEC: f64 = 1e9;

/// The current wall clock time.
pub fn now() -> Timestamp {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_nanos() as Timestamp,
        Err(before) => -(before.duration().as_nanos() as Timestamp),
    }
}

/// A point in time as supplied by a caller to `utimes`.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeArg {
    /// Raw nanoseconds since the epoch.
    Nanos(i64),
    /// Seconds since the epoch, possibly fractional.
    Seconds(f64),
    /// A date string, or an integer count of milliseconds.
    Text(String),
    Date(DateTime<Utc>),
}

impl TimeArg {
    pub fn to_nanos(&self) -> Result<Timestamp> {
        match self {
            TimeArg::Nanos(nanos) => Ok(*nanos),
            TimeArg::Seconds(secs) => {
                let nanos = secs * NANOS_PER_SEC;
                if !nanos.is_finite() || nanos.abs() >= i64::MAX as f64 {
                    return Err(FsError::InvalidArgument(format!("invalid time: {}", secs)));
                }
                Ok(nanos as Timestamp)
            }
            TimeArg::Text(text) => parse_text(text),
            TimeArg::Date(date) => date
                .timestamp_nanos_opt()
                .ok_or_else(|| FsError::InvalidArgument(format!("time out of range: {}", date))),
        }
    }
}

fn parse_text(text: &str) -> Result<Timestamp> {
    let trimmed = text.trim();
    let parsed = DateTime::parse_from_rfc3339(trimmed)
        .or_else(|_| DateTime::parse_from_rfc2822(trimmed))
        .map(|date| date.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
                .or_else(|| {
                    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                        .ok()
                        .and_then(|date| date.and_hms_opt(0, 0, 0))
                })
                .map(|naive| naive.and_utc())
        });

    if let Some(date) = parsed {
        return date
            .timestamp_nanos_opt()
            .ok_or_else(|| FsError::InvalidArgument(format!("time out of range: {:?}", text)));
    }

    // Anything else must be a plain millisecond count.
    trimmed
        .parse::<i64>()
        .ok()
        .and_then(|millis| millis.checked_mul(NANOS_PER_MILLI))
        .ok_or_else(|| FsError::InvalidArgument(format!("invalid time: {:?}", text)))
}

impl From<i64> for TimeArg {
    fn from(nanos: i64) -> Self {
        TimeArg::Nanos(nanos)
    }
}

impl From<f64> for TimeArg {
    fn from(secs: f64) -> Self {
        TimeArg::Seconds(secs)
    }
}

impl From<&str> for TimeArg {
    fn from(text: &str) -> Self {
        TimeArg::Text(text.to_string())
    }
}

impl From<String> for TimeArg {
    fn from(text: String) -> Self {
        TimeArg::Text(text)
    }
}

impl From<DateTime<Utc>> for TimeArg {
    fn from(date: DateTime<Utc>) -> Self {
        TimeArg::Date(date)
    }
}

impl From<SystemTime> for TimeArg {
    fn from(time: SystemTime) -> Self {
        TimeArg::Date(DateTime::<Utc>::from(time))
    }
}
