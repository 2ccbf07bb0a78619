//! Metric definitions
//!
//! A [`MetricDefinition`] is immutable configuration: it is validated once
//! when the metric is constructed and never changes afterwards. The
//! definition is a sum type over the metric kind; shared configuration lives
//! in [`MetricCommon`].

use crate::aggregate::AggregateOp;
use crate::context::AssignmentKind;
use crate::time::{DurationAccuracy, TimeAccuracy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How many snapshots are retained per (metric, context) key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotRetention {
    /// Keep the complete history
    #[default]
    #[serde(rename = "inf")]
    Unlimited,
    /// Keep at most this many snapshots, evicting the oldest first.
    /// A cap of zero is rejected at validation.
    #[serde(untagged)]
    Limited(u32),
}

/// Time range over which a single snapshot aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationWindow {
    /// One running snapshot over the whole history
    All,
    /// One snapshot per time bucket of the given granularity
    #[serde(untagged)]
    Bucketed(TimeAccuracy),
}

/// Aggregation configuration of a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Statistic maintained over the observations
    pub operation: AggregateOp,
    /// Window the statistic is maintained over
    pub time: AggregationWindow,
    /// Accuracy the aggregate value is floored to (number/meta metrics)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Accuracy the aggregate duration is floored to (duration metrics)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_accuracy: Option<DurationAccuracy>,
}

impl Aggregation {
    pub fn new(operation: AggregateOp, time: AggregationWindow) -> Self {
        Self {
            operation,
            time,
            accuracy: None,
            duration_accuracy: None,
        }
    }
}

/// Configuration shared by every metric kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricCommon {
    /// Globally unique metric name
    pub name: String,
    /// Context id kinds this metric requires from its callers
    #[serde(default)]
    pub assignment: Vec<AssignmentKind>,
    /// Retention cap for the snapshot history
    #[serde(default)]
    pub snapshots: SnapshotRetention,
    /// Aggregation configuration; mutually exclusive with `timestamp`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg: Option<Aggregation>,
    /// Accuracy for recording plain observation timestamps;
    /// mutually exclusive with `agg`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<TimeAccuracy>,
    /// Clear points: events that wipe this metric's history
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete_snapshots_events: Vec<String>,
    /// Private metrics are excluded from exports
    #[serde(default)]
    pub private: bool,
}

impl MetricCommon {
    /// Whether observations of this metric carry a bucketed timestamp:
    /// true when aggregating over time buckets or when a plain timestamp
    /// accuracy is configured.
    pub fn records_timestamps(&self) -> bool {
        self.timestamp.is_some()
            || matches!(
                self.agg,
                Some(Aggregation {
                    time: AggregationWindow::Bucketed(_),
                    ..
                })
            )
    }

    /// The accuracy used to bucket observation timestamps, if any
    pub fn recording_time_accuracy(&self) -> Option<TimeAccuracy> {
        match &self.agg {
            Some(Aggregation {
                time: AggregationWindow::Bucketed(accuracy),
                ..
            }) => Some(*accuracy),
            _ => self.timestamp,
        }
    }
}

/// Numeric kind of a number metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberKind {
    Int,
    Float,
}

impl NumberKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NumberKind::Int => "int",
            NumberKind::Float => "float",
        }
    }
}

/// A constant recorded instead of a caller-supplied value.
///
/// The enum makes "constValue and constValueMap at the same time"
/// unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstValue {
    /// The same constant for every record point
    Fixed(f64),
    /// One constant per record point; keys must cover the record points
    /// exactly
    PerPoint(BTreeMap<String, f64>),
}

/// Definition of a metric recording supplied or constant numeric values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberMetricDefinition {
    #[serde(flatten)]
    pub common: MetricCommon,
    pub kind: NumberKind,
    /// Events at which this metric records
    pub record_points: Vec<String>,
    /// Accuracy recorded values are floored to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub const_value: Option<ConstValue>,
}

/// Strategy for a start event arriving while an interval is already open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleIncomplete {
    /// Discard the stale start silently
    Ignore,
    /// Treat the stale start as stopped now, recording that duration first
    Truncate,
}

/// Definition of a metric measuring durations between a start and a stop
/// event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationMetricDefinition {
    #[serde(flatten)]
    pub common: MetricCommon,
    /// Event opening the interval
    pub record_start: String,
    /// Event closing the interval and recording the duration
    pub record_stop: String,
    /// Events that discard open intervals (metric-wide)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clear_incomplete_events: Vec<String>,
    pub handle_incomplete: HandleIncomplete,
    /// Accuracy measured durations are floored to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_accuracy: Option<DurationAccuracy>,
}

/// Definition of a metric derived from another metric's snapshot history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaMetricDefinition {
    #[serde(flatten)]
    pub common: MetricCommon,
    /// Name of the metric this one derives from
    pub meta_reference: String,
    /// Events at which this metric recomputes
    pub record_points: Vec<String>,
}

/// Definition of a metric, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricDefinition {
    Number(NumberMetricDefinition),
    Duration(DurationMetricDefinition),
    Meta(MetaMetricDefinition),
}

impl MetricDefinition {
    /// Shared configuration of the definition
    pub fn common(&self) -> &MetricCommon {
        match self {
            MetricDefinition::Number(def) => &def.common,
            MetricDefinition::Duration(def) => &def.common,
            MetricDefinition::Meta(def) => &def.common,
        }
    }

    /// Metric name
    pub fn name(&self) -> &str {
        &self.common().name
    }

    /// Aggregation configuration, if any
    pub fn agg(&self) -> Option<&Aggregation> {
        self.common().agg.as_ref()
    }

    /// Whether observations of this metric carry a bucketed timestamp
    pub fn records_timestamps(&self) -> bool {
        self.common().records_timestamps()
    }

    /// The accuracy used to bucket observation timestamps, if any
    pub fn recording_time_accuracy(&self) -> Option<TimeAccuracy> {
        self.common().recording_time_accuracy()
    }

    /// Name of the metric kind, as used in messages
    pub fn type_name(&self) -> &'static str {
        match self {
            MetricDefinition::Number(def) => def.kind.as_str(),
            MetricDefinition::Duration(_) => "duration",
            MetricDefinition::Meta(_) => "meta",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_serde_accepts_inf_and_numbers() {
        let unlimited: SnapshotRetention = serde_json::from_str("\"inf\"").unwrap();
        assert_eq!(unlimited, SnapshotRetention::Unlimited);

        let limited: SnapshotRetention = serde_json::from_str("12").unwrap();
        assert_eq!(limited, SnapshotRetention::Limited(12));

        assert_eq!(
            serde_json::to_string(&SnapshotRetention::Unlimited).unwrap(),
            "\"inf\""
        );
        assert_eq!(
            serde_json::to_string(&SnapshotRetention::Limited(3)).unwrap(),
            "3"
        );
    }

    #[test]
    fn aggregation_window_serde() {
        let all: AggregationWindow = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(all, AggregationWindow::All);

        let day: AggregationWindow = serde_json::from_str("\"day\"").unwrap();
        assert_eq!(day, AggregationWindow::Bucketed(TimeAccuracy::Day));
    }

    #[test]
    fn records_timestamps_for_bucketed_agg_or_timestamp_field() {
        let mut def = NumberMetricDefinition {
            common: MetricCommon {
                name: "m".into(),
                ..MetricCommon::default()
            },
            kind: NumberKind::Int,
            record_points: vec!["p".into()],
            accuracy: None,
            const_value: None,
        };
        assert!(!MetricDefinition::Number(def.clone()).records_timestamps());

        def.common.agg = Some(Aggregation::new(
            AggregateOp::Sum,
            AggregationWindow::All,
        ));
        assert!(!MetricDefinition::Number(def.clone()).records_timestamps());

        def.common.agg = Some(Aggregation::new(
            AggregateOp::Sum,
            AggregationWindow::Bucketed(TimeAccuracy::Week),
        ));
        let bucketed = MetricDefinition::Number(def.clone());
        assert!(bucketed.records_timestamps());
        assert_eq!(
            bucketed.recording_time_accuracy(),
            Some(TimeAccuracy::Week)
        );

        def.common.agg = None;
        def.common.timestamp = Some(TimeAccuracy::Hour);
        assert!(MetricDefinition::Number(def).records_timestamps());
    }
}
