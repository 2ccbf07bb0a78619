//! Metric abstraction
//!
//! [`Metric`] is the common surface of all metric kinds: definition
//! validation, record/clear point guards, context verify-and-trim, and the
//! shared create-or-merge snapshot algorithm. Concrete kinds supply their
//! record points, the record operations and the aggregate rounding rule.
//!
//! The engine performs no locking of its own: the read-modify-write inside
//! [`update_snapshots`] spans store calls, so callers must not overlap
//! record calls for the same (metric, context) key. The
//! [`MetricRecorder`](crate::recorder::MetricRecorder) dispatch service
//! awaits each affected metric in turn and therefore satisfies this when
//! used as the single entry point.

pub mod duration;
pub mod factory;
pub mod meta;
pub mod number;

pub use duration::DurationMetric;
pub use factory::create_metric;
pub use meta::MetaMetric;
pub use number::NumberMetric;

use crate::aggregate;
use crate::clock::Clock;
use crate::context::{AssignmentKind, Context};
use crate::definition::{
    Aggregation, AggregationWindow, MetricCommon, MetricDefinition, SnapshotRetention,
};
use crate::error::{MetricsError, MetricsResult};
use crate::snapshot::Snapshot;
use crate::store::MetricStore;
use crate::time::{bucket_timestamp, trim_value, TimestampMs};
use async_trait::async_trait;
use std::collections::HashSet;

/// Common surface of all metric kinds
#[async_trait]
pub trait Metric: std::fmt::Debug + Send + Sync {
    /// Shared configuration of this metric's definition
    fn common(&self) -> &MetricCommon;

    /// Store this metric persists through
    fn store(&self) -> &dyn MetricStore;

    /// Clock supplying observation times
    fn clock(&self) -> &dyn Clock;

    /// Record points this metric listens on
    fn record_points(&self) -> Vec<String>;

    /// Record an observation without an explicit value
    async fn record(&self, record_point: &str, context: &Context) -> MetricsResult<()>;

    /// Floor an aggregate value to the configured accuracy
    fn round_aggregate(&self, value: f64) -> f64;

    /// Clear points: events wiping this metric's history
    fn clear_points(&self) -> Vec<String> {
        self.common().delete_snapshots_events.clone()
    }

    /// Names of metrics this metric derives from
    fn metric_dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Check the definitions of the declared dependencies at registration
    fn verify_dependency_definitions(
        &self,
        _definitions: &[MetricDefinition],
    ) -> MetricsResult<()> {
        Ok(())
    }

    /// Record an observation with an explicit value. Only metric kinds that
    /// accept one override this.
    async fn record_value(
        &self,
        record_point: &str,
        context: &Context,
        value: f64,
    ) -> MetricsResult<()> {
        let _ = (record_point, context, value);
        Err(MetricsError::RecordValueUnsupported {
            metric: self.common().name.clone(),
        })
    }

    /// Delete all snapshots of this metric, across every context
    async fn clear_snapshots(&self, clear_point: &str) -> MetricsResult<()> {
        self.assert_valid_clear_point(clear_point)?;
        self.store().delete_snapshots(&self.common().name).await
    }

    /// Guard: fail unless the metric listens on this record point
    fn assert_valid_record_point(&self, record_point: &str) -> MetricsResult<()> {
        if self.record_points().iter().any(|point| point == record_point) {
            Ok(())
        } else {
            Err(MetricsError::UnknownRecordPoint {
                point: record_point.to_string(),
            })
        }
    }

    /// Guard: fail unless the metric clears on this clear point
    fn assert_valid_clear_point(&self, clear_point: &str) -> MetricsResult<()> {
        if self.clear_points().iter().any(|point| point == clear_point) {
            Ok(())
        } else {
            Err(MetricsError::UnknownClearPoint {
                point: clear_point.to_string(),
            })
        }
    }

    /// The id kinds the definition requires, in canonical order
    fn required_kinds(&self) -> Vec<AssignmentKind> {
        let assignment = &self.common().assignment;
        AssignmentKind::ALL
            .into_iter()
            .filter(|kind| assignment.contains(kind))
            .collect()
    }

    /// Single authority for what identifies an observation: fails when a
    /// required id is missing, and returns a context carrying only the
    /// required ids (everything else is dropped).
    fn verify_and_trim_context(&self, context: &Context) -> MetricsResult<Context> {
        let required = self.required_kinds();
        if required.iter().any(|kind| !context.provides(*kind)) {
            let required = required
                .iter()
                .map(|kind| kind.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(MetricsError::MissingAssignments {
                required,
                supplied: context.to_string(),
            });
        }
        Ok(context.project(&required))
    }
}

/// Run the shared constraint checks, then the kind-specific check, and fail
/// with the first violated constraint
pub(crate) fn verify_constraints(
    common: &MetricCommon,
    record_points: &[String],
    kind_error: impl FnOnce() -> Option<String>,
) -> MetricsResult<()> {
    if let Some(reason) = basic_constraint_error(common, record_points).or_else(kind_error) {
        return Err(MetricsError::validation(&common.name, reason));
    }
    Ok(())
}

fn basic_constraint_error(common: &MetricCommon, record_points: &[String]) -> Option<String> {
    if common.name.trim().is_empty() {
        return Some("Metric name should not be empty!".into());
    }
    if common.name.trim() != common.name {
        return Some("Metric name should not be padded with whitespaces.".into());
    }
    if record_points.is_empty() {
        return Some("No record points.".into());
    }
    let mut seen = HashSet::new();
    for (index, point) in record_points.iter().enumerate() {
        let prefix = format!("RecordPoint with name \"{point}\" at index {index} ");
        if point.trim() != point {
            return Some(format!("{prefix}should not be padded with whitespaces."));
        }
        if point.is_empty() {
            return Some(format!("{prefix}should have length > 0."));
        }
        if !seen.insert(point.as_str()) {
            return Some(format!("{prefix}has already been specified as RecordPoint."));
        }
    }
    if common.snapshots == SnapshotRetention::Limited(0) {
        return Some("Number of snapshots has to be integer > 0 or \"inf\".".into());
    }
    if common.agg.is_some() && common.timestamp.is_some() {
        return Some(
            "The attributes \"agg\" and \"timestamp\" are mutually exclusive and can not be used together."
                .into(),
        );
    }
    None
}

/// Floor a value to `agg.accuracy` when configured; shared by the number and
/// meta rounding rules
pub(crate) fn round_aggregate_accuracy(agg: Option<&Aggregation>, value: f64) -> f64 {
    match agg.and_then(|agg| agg.accuracy) {
        Some(accuracy) => trim_value(value, accuracy),
        None => value,
    }
}

/// The create-or-merge snapshot algorithm shared by all metric kinds.
///
/// Trims the context, buckets `now_ms` when the metric records timestamps,
/// fetches the latest snapshot and either appends a new one (evicting the
/// oldest first when the retention cap is reached) or folds the value into
/// the existing one, recomputing the aggregate from helper state alone.
pub(crate) async fn update_snapshots(
    metric: &dyn Metric,
    context: &Context,
    value: f64,
    value_is_aggregate: bool,
    now_ms: TimestampMs,
) -> MetricsResult<()> {
    let common = metric.common();
    let context = metric.verify_and_trim_context(context)?;

    let bucketed = if common.records_timestamps() {
        Some(bucket_timestamp(now_ms, common.recording_time_accuracy())?)
    } else {
        None
    };

    let last = metric.store().get_last_snapshot(&common.name, &context).await?;

    if new_snapshot_required(common, last.as_ref(), bucketed)? {
        let index = last.as_ref().map_or(0, |snapshot| snapshot.index + 1);
        if last.is_some() && should_evict_oldest(metric, &context).await? {
            metric
                .store()
                .remove_oldest_snapshot(&common.name, &context)
                .await?;
        }
        let snapshot = make_new_snapshot(metric, index, bucketed, value, value_is_aggregate)?;
        metric
            .store()
            .store_new_snapshot(&common.name, &context, snapshot)
            .await
    } else {
        let last = last.ok_or(MetricsError::MergeWithoutSnapshot)?;
        let merged = merge_snapshot(metric, &last, value, bucketed, value_is_aggregate)?;
        metric
            .store()
            .overwrite_snapshot(&common.name, &context, merged)
            .await
    }
}

fn new_snapshot_required(
    common: &MetricCommon,
    last: Option<&Snapshot>,
    bucketed: Option<TimestampMs>,
) -> MetricsResult<bool> {
    let Some(last) = last else {
        // No snapshot recorded yet
        return Ok(true);
    };
    let Some(agg) = &common.agg else {
        // Without aggregation every observation is a fresh snapshot
        return Ok(true);
    };
    if agg.time == AggregationWindow::All {
        // Everything merges into the single running snapshot
        return Ok(false);
    }
    let bucketed = bucketed.ok_or(MetricsError::TimestampRequired)?;
    Ok(last.start_of_measurement != Some(bucketed))
}

async fn should_evict_oldest(metric: &dyn Metric, context: &Context) -> MetricsResult<bool> {
    let common = metric.common();
    match common.snapshots {
        SnapshotRetention::Unlimited => Ok(false),
        SnapshotRetention::Limited(cap) => {
            let count = metric
                .store()
                .get_snapshot_count(&common.name, context)
                .await?;
            Ok(count >= cap as usize)
        }
    }
}

fn make_new_snapshot(
    metric: &dyn Metric,
    index: u64,
    bucketed: Option<TimestampMs>,
    value: f64,
    value_is_aggregate: bool,
) -> MetricsResult<Snapshot> {
    match &metric.common().agg {
        Some(agg) => {
            let helpers = aggregate::initial_helpers(agg.operation, value, value_is_aggregate);
            let aggregate_value = if value_is_aggregate {
                value
            } else {
                aggregate::aggregate_incremental(agg.operation, &helpers)?
            };
            Ok(Snapshot::with_helpers(
                index,
                metric.round_aggregate(aggregate_value),
                bucketed,
                helpers,
            ))
        }
        None => Ok(Snapshot::new(index, value, bucketed)),
    }
}

fn merge_snapshot(
    metric: &dyn Metric,
    last: &Snapshot,
    value: f64,
    bucketed: Option<TimestampMs>,
    value_is_aggregate: bool,
) -> MetricsResult<Snapshot> {
    let helpers = aggregate::advance_helpers(&last.helpers, value);
    let merged_value = match &metric.common().agg {
        Some(agg) => {
            let aggregate_value = if value_is_aggregate {
                value
            } else {
                aggregate::aggregate_incremental(agg.operation, &helpers)?
            };
            metric.round_aggregate(aggregate_value)
        }
        None => value,
    };
    Ok(Snapshot::with_helpers(
        last.index,
        merged_value,
        bucketed,
        helpers,
    ))
}
