//! Aggregate statistics
//!
//! Two families of functions maintain the same statistics:
//! complete-history aggregation over a value list (used when a meta metric
//! recomputes from another metric's snapshots) and incremental aggregation
//! that reads nothing but the helper state carried on the previous snapshot.
//! Variance uses Welford's online update in the incremental path and the
//! population formula (no Bessel correction) in both.

use crate::error::{MetricsError, MetricsResult};
use crate::snapshot::AggregateHelpers;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Statistic maintained over a sequence of observations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Average,
    Max,
    Min,
    Median,
    Sum,
    Variance,
}

impl AggregateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::Average => "average",
            AggregateOp::Max => "max",
            AggregateOp::Min => "min",
            AggregateOp::Median => "median",
            AggregateOp::Sum => "sum",
            AggregateOp::Variance => "variance",
        }
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn needs_sum(op: AggregateOp) -> bool {
    matches!(op, AggregateOp::Average | AggregateOp::Variance | AggregateOp::Sum)
}

fn needs_welford(op: AggregateOp) -> bool {
    matches!(op, AggregateOp::Variance)
}

fn needs_min(op: AggregateOp) -> bool {
    matches!(op, AggregateOp::Min)
}

fn needs_max(op: AggregateOp) -> bool {
    matches!(op, AggregateOp::Max)
}

/// Helper state for the first observation of a snapshot.
///
/// Every operation tracks the observation count. When the value is itself a
/// precomputed aggregate (meta metrics), the remaining helpers stay absent:
/// there is no single raw observation to seed them from.
pub fn initial_helpers(
    op: AggregateOp,
    value: f64,
    value_is_aggregate: bool,
) -> AggregateHelpers {
    let mut helpers = AggregateHelpers {
        number_of_measurements: Some(1),
        ..AggregateHelpers::default()
    };
    if !value_is_aggregate {
        if needs_min(op) {
            helpers.last_min = Some(value);
        }
        if needs_max(op) {
            helpers.last_max = Some(value);
        }
        if needs_sum(op) {
            helpers.sum_of_measurements = Some(value);
        }
        if needs_welford(op) {
            helpers.welford_mean = Some(value);
            helpers.welford_m2 = Some(0.0);
        }
    }
    helpers
}

/// Fold one observation into the helper state of the previous snapshot.
///
/// Only helpers present on the previous snapshot are advanced, so the shape
/// chosen at initialization is preserved through every merge.
pub fn advance_helpers(last: &AggregateHelpers, value: f64) -> AggregateHelpers {
    let mut helpers = AggregateHelpers::default();
    if let Some(count) = last.number_of_measurements {
        helpers.number_of_measurements = Some(count + 1);
    }
    if let Some(sum) = last.sum_of_measurements {
        helpers.sum_of_measurements = Some(sum + value);
    }
    if let (Some(mean), Some(m2), Some(count)) = (
        last.welford_mean,
        last.welford_m2,
        last.number_of_measurements,
    ) {
        let (mean, m2) = welford_update(mean, m2, count, value);
        helpers.welford_mean = Some(mean);
        helpers.welford_m2 = Some(m2);
    }
    if let Some(min) = last.last_min {
        helpers.last_min = Some(value.min(min));
    }
    if let Some(max) = last.last_max {
        helpers.last_max = Some(value.max(max));
    }
    helpers
}

// Welford's online algorithm, see
// https://en.wikipedia.org/wiki/Algorithms_for_calculating_variance
fn welford_update(mean: f64, m2: f64, count_before: u64, value: f64) -> (f64, f64) {
    let count = (count_before + 1) as f64;
    let delta = value - mean;
    let mean = mean + delta / count;
    let delta2 = value - mean;
    (mean, m2 + delta * delta2)
}

/// Compute the aggregate value from helper state alone, without touching
/// raw history
pub fn aggregate_incremental(
    op: AggregateOp,
    helpers: &AggregateHelpers,
) -> MetricsResult<f64> {
    let missing = |operation| MetricsError::MissingAggregateHelpers { operation };
    match op {
        AggregateOp::Average => {
            let count = helpers
                .number_of_measurements
                .ok_or_else(|| missing("average"))?;
            let sum = helpers
                .sum_of_measurements
                .ok_or_else(|| missing("average"))?;
            Ok(sum / count as f64)
        }
        AggregateOp::Max => helpers.last_max.ok_or_else(|| missing("max")),
        AggregateOp::Min => helpers.last_min.ok_or_else(|| missing("min")),
        AggregateOp::Median => Err(MetricsError::MedianNotIncremental),
        AggregateOp::Sum => helpers.sum_of_measurements.ok_or_else(|| missing("sum")),
        AggregateOp::Variance => {
            let count = helpers
                .number_of_measurements
                .ok_or_else(|| missing("variance"))?;
            let m2 = helpers.welford_m2.ok_or_else(|| missing("variance"))?;
            helpers.welford_mean.ok_or_else(|| missing("variance"))?;
            Ok(m2 / count as f64)
        }
    }
}

/// Compute the aggregate over a complete list of values.
///
/// An empty list yields NaN.
pub fn aggregate_complete(op: AggregateOp, values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    match op {
        AggregateOp::Average => mean(values),
        AggregateOp::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregateOp::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregateOp::Median => median(values),
        AggregateOp::Sum => values.iter().sum(),
        AggregateOp::Variance => {
            let mean = mean(values);
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let middle = (sorted.len() - 1) / 2;
    if sorted.len() % 2 == 1 {
        sorted[middle]
    } else {
        (sorted[middle] + sorted[middle + 1]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold_incrementally(op: AggregateOp, values: &[f64]) -> (AggregateHelpers, f64) {
        let mut helpers = initial_helpers(op, values[0], false);
        for value in &values[1..] {
            helpers = advance_helpers(&helpers, *value);
        }
        let value = aggregate_incremental(op, &helpers).unwrap();
        (helpers, value)
    }

    #[test]
    fn incremental_average_matches_complete() {
        let values = [2.0, 4.0, 6.0];
        let (helpers, incremental) = fold_incrementally(AggregateOp::Average, &values);
        assert_eq!(incremental, 4.0);
        assert_eq!(helpers.number_of_measurements, Some(3));
        assert_eq!(helpers.sum_of_measurements, Some(12.0));
        assert_eq!(aggregate_complete(AggregateOp::Average, &values), 4.0);
    }

    #[test]
    fn incremental_variance_matches_complete() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let (_, incremental) = fold_incrementally(AggregateOp::Variance, &values);
        let complete = aggregate_complete(AggregateOp::Variance, &values);
        assert!((incremental - complete).abs() < 1e-9);
        assert!((complete - 4.0).abs() < 1e-9);
    }

    #[test]
    fn incremental_min_max_sum() {
        let values = [3.0, -1.0, 7.0, 2.0];
        assert_eq!(fold_incrementally(AggregateOp::Min, &values).1, -1.0);
        assert_eq!(fold_incrementally(AggregateOp::Max, &values).1, 7.0);
        assert_eq!(fold_incrementally(AggregateOp::Sum, &values).1, 11.0);
    }

    #[test]
    fn median_uses_numeric_ordering() {
        // A lexicographic comparator would sort 10 before 2
        assert_eq!(
            aggregate_complete(AggregateOp::Median, &[10.0, 2.0, 33.0]),
            10.0
        );
        assert_eq!(
            aggregate_complete(AggregateOp::Median, &[4.0, 1.0, 3.0, 2.0]),
            2.5
        );
        assert_eq!(aggregate_complete(AggregateOp::Median, &[5.0]), 5.0);
    }

    #[test]
    fn median_has_no_incremental_form() {
        let helpers = initial_helpers(AggregateOp::Median, 1.0, false);
        assert_eq!(
            aggregate_incremental(AggregateOp::Median, &helpers),
            Err(MetricsError::MedianNotIncremental)
        );
    }

    #[test]
    fn complete_aggregate_of_empty_list_is_nan() {
        assert!(aggregate_complete(AggregateOp::Average, &[]).is_nan());
        assert!(aggregate_complete(AggregateOp::Sum, &[]).is_nan());
    }

    #[test]
    fn initial_helpers_shapes_follow_operation() {
        let average = initial_helpers(AggregateOp::Average, 5.0, false);
        assert_eq!(average.number_of_measurements, Some(1));
        assert_eq!(average.sum_of_measurements, Some(5.0));
        assert_eq!(average.welford_mean, None);
        assert_eq!(average.last_min, None);

        let variance = initial_helpers(AggregateOp::Variance, 5.0, false);
        assert_eq!(variance.welford_mean, Some(5.0));
        assert_eq!(variance.welford_m2, Some(0.0));
        assert_eq!(variance.sum_of_measurements, Some(5.0));

        let min = initial_helpers(AggregateOp::Min, 5.0, false);
        assert_eq!(min.last_min, Some(5.0));
        assert_eq!(min.last_max, None);
        assert_eq!(min.sum_of_measurements, None);
    }

    #[test]
    fn aggregate_seeded_value_tracks_count_only() {
        let helpers = initial_helpers(AggregateOp::Average, 5.0, true);
        assert_eq!(helpers.number_of_measurements, Some(1));
        assert!(helpers.sum_of_measurements.is_none());
        assert!(helpers.welford_mean.is_none());
        assert!(helpers.last_min.is_none());
        assert!(helpers.last_max.is_none());
    }

    #[test]
    fn advance_preserves_helper_shape() {
        let helpers = initial_helpers(AggregateOp::Max, 5.0, false);
        let advanced = advance_helpers(&helpers, 9.0);
        assert_eq!(advanced.last_max, Some(9.0));
        assert_eq!(advanced.number_of_measurements, Some(2));
        assert!(advanced.last_min.is_none());
        assert!(advanced.sum_of_measurements.is_none());
    }

    #[test]
    fn incremental_fails_without_required_helpers() {
        let empty = AggregateHelpers::default();
        assert_eq!(
            aggregate_incremental(AggregateOp::Average, &empty),
            Err(MetricsError::MissingAggregateHelpers {
                operation: "average"
            })
        );
        assert_eq!(
            aggregate_incremental(AggregateOp::Max, &empty),
            Err(MetricsError::MissingAggregateHelpers { operation: "max" })
        );
    }
}
