//! UTC time bucketing and accuracy trimming
//!
//! Timestamps are carried as UTC epoch milliseconds. UTC knows no daylight
//! saving, so hour/quarter-day/day/week buckets all have a fixed width and
//! bucketing reduces to floor division. Weeks start on Monday.

use crate::error::{MetricsError, MetricsResult};
use serde::{Deserialize, Serialize};

/// UTC epoch milliseconds
pub type TimestampMs = i64;

pub const MILLIS_PER_SECOND: i64 = 1_000;
pub const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SECOND;
pub const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
pub const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;
pub const MILLIS_PER_WEEK: i64 = 7 * MILLIS_PER_DAY;

const MILLIS_PER_QUARTER_DAY: i64 = MILLIS_PER_DAY / 4;

// 1970-01-01 was a Thursday; the first Monday after the epoch is day 4.
const EPOCH_TO_MONDAY_MS: i64 = 4 * MILLIS_PER_DAY;

/// Granularity to which recorded timestamps are rounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeAccuracy {
    Hour,
    QuarterDay,
    Day,
    Week,
}

impl TimeAccuracy {
    /// Width of one bucket of this granularity in milliseconds
    pub fn bucket_millis(&self) -> i64 {
        match self {
            TimeAccuracy::Hour => MILLIS_PER_HOUR,
            TimeAccuracy::QuarterDay => MILLIS_PER_QUARTER_DAY,
            TimeAccuracy::Day => MILLIS_PER_DAY,
            TimeAccuracy::Week => MILLIS_PER_WEEK,
        }
    }

    /// Start of the bucket containing `timestamp_ms`.
    ///
    /// Week buckets are aligned to the Monday of the UTC week.
    pub fn bucket_start(&self, timestamp_ms: TimestampMs) -> TimestampMs {
        match self {
            TimeAccuracy::Week => {
                floor_to(timestamp_ms - EPOCH_TO_MONDAY_MS, MILLIS_PER_WEEK) + EPOCH_TO_MONDAY_MS
            }
            _ => floor_to(timestamp_ms, self.bucket_millis()),
        }
    }
}

fn floor_to(value: i64, step: i64) -> i64 {
    value.div_euclid(step) * step
}

/// Unit of a duration accuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DurationUnit {
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
}

impl DurationUnit {
    /// Milliseconds in one unit
    pub fn millis(&self) -> f64 {
        match self {
            DurationUnit::Seconds => MILLIS_PER_SECOND as f64,
            DurationUnit::Minutes => MILLIS_PER_MINUTE as f64,
            DurationUnit::Hours => MILLIS_PER_HOUR as f64,
            DurationUnit::Days => MILLIS_PER_DAY as f64,
        }
    }
}

/// Accuracy of a duration measurement: a magnitude of a unit,
/// e.g. 5 seconds or 2 hours
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationAccuracy {
    pub magnitude: f64,
    pub unit: DurationUnit,
}

impl DurationAccuracy {
    pub fn new(magnitude: f64, unit: DurationUnit) -> Self {
        Self { magnitude, unit }
    }

    /// The accuracy expressed in milliseconds
    pub fn millis(&self) -> f64 {
        self.magnitude * self.unit.millis()
    }
}

/// Floor `value` to a multiple of `accuracy`
pub fn trim_value(value: f64, accuracy: f64) -> f64 {
    (value / accuracy).floor() * accuracy
}

/// Floor a millisecond duration to a multiple of the accuracy, if one is set
pub fn trim_duration(duration_ms: f64, accuracy: Option<&DurationAccuracy>) -> f64 {
    match accuracy {
        Some(accuracy) => trim_value(duration_ms, accuracy.millis()),
        None => duration_ms,
    }
}

/// Bucket a timestamp, failing when a bucket is needed but no accuracy is
/// configured
pub fn bucket_timestamp(
    timestamp_ms: TimestampMs,
    accuracy: Option<TimeAccuracy>,
) -> MetricsResult<TimestampMs> {
    let accuracy = accuracy.ok_or(MetricsError::TimestampRequired)?;
    Ok(accuracy.bucket_start(timestamp_ms))
}
