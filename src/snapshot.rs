//! Snapshot data model

use crate::time::TimestampMs;
use serde::{Deserialize, Serialize};

/// Incremental aggregate state carried on a snapshot.
///
/// Exactly the fields required by the metric's aggregate operation are
/// present; a metric without aggregation carries none. Carrying this state
/// on the snapshot lets every observation be folded in without re-reading
/// the raw history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateHelpers {
    /// Count of observations folded into this snapshot (all operations)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_measurements: Option<u64>,
    /// Running sum (average, sum, variance)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum_of_measurements: Option<f64>,
    /// Welford running mean (variance)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub welford_mean: Option<f64>,
    /// Welford sum of squared deviations (variance)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub welford_m2: Option<f64>,
    /// Running minimum (min)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_min: Option<f64>,
    /// Running maximum (max)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_max: Option<f64>,
}

impl AggregateHelpers {
    /// True if no helper field is present
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One stored measurement entry for a (metric, context) key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Monotonic per-(metric, context) position; a new snapshot gets the
    /// previous index plus one, merging keeps the index.
    pub index: u64,
    /// The (possibly aggregated, possibly rounded) value
    pub value: f64,
    /// Bucketed UTC timestamp of the measurement period, if the metric
    /// records timestamps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_of_measurement: Option<TimestampMs>,
    #[serde(flatten)]
    pub helpers: AggregateHelpers,
}

impl Snapshot {
    /// Snapshot without aggregate state
    pub fn new(index: u64, value: f64, start_of_measurement: Option<TimestampMs>) -> Self {
        Self {
            index,
            value,
            start_of_measurement,
            helpers: AggregateHelpers::default(),
        }
    }

    /// Snapshot carrying aggregate state
    pub fn with_helpers(
        index: u64,
        value: f64,
        start_of_measurement: Option<TimestampMs>,
        helpers: AggregateHelpers,
    ) -> Self {
        Self {
            index,
            value,
            start_of_measurement,
            helpers,
        }
    }
}
