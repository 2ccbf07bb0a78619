//! Duration metrics
//!
//! A per-(metric, context) state machine: a start event opens an interval,
//! a stop event closes it and records the elapsed milliseconds. At most one
//! interval is open per key; what happens when a second start arrives is
//! governed by the `handle_incomplete` strategy.

use super::Metric;
use crate::clock::Clock;
use crate::context::Context;
use crate::definition::{DurationMetricDefinition, HandleIncomplete, MetricCommon};
use crate::error::{MetricsError, MetricsResult};
use crate::store::MetricStore;
use crate::time::{trim_duration, TimestampMs};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Metric measuring durations between a start and a stop event
pub struct DurationMetric {
    definition: DurationMetricDefinition,
    store: Arc<dyn MetricStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DurationMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurationMetric")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl DurationMetric {
    /// Validate the definition and construct the metric
    pub fn new(
        definition: DurationMetricDefinition,
        store: Arc<dyn MetricStore>,
        clock: Arc<dyn Clock>,
    ) -> MetricsResult<Self> {
        let record_points = Self::collect_record_points(&definition);
        super::verify_constraints(&definition.common, &record_points, || {
            Self::constraint_error(&definition)
        })?;
        Ok(Self {
            definition,
            store,
            clock,
        })
    }

    pub fn definition(&self) -> &DurationMetricDefinition {
        &self.definition
    }

    fn constraint_error(def: &DurationMetricDefinition) -> Option<String> {
        if matches!(&def.duration_accuracy, Some(accuracy) if accuracy.magnitude < 0.0) {
            return Some("durationAccuracy should not be negative.".into());
        }
        if let Some(agg) = &def.common.agg {
            if matches!(&agg.duration_accuracy, Some(accuracy) if accuracy.magnitude < 0.0) {
                return Some("agg.durationAccuracy should not be negative.".into());
            }
        }
        None
    }

    /// Unique union of start/stop and the clear-incomplete events,
    /// preserving first occurrence order
    fn collect_record_points(def: &DurationMetricDefinition) -> Vec<String> {
        let mut points = vec![def.record_start.clone(), def.record_stop.clone()];
        for event in &def.clear_incomplete_events {
            points.push(event.clone());
        }
        let mut unique = Vec::new();
        for point in points {
            if !unique.contains(&point) {
                unique.push(point);
            }
        }
        unique
    }

    /// Discard open intervals of this metric. Deliberately uses an empty
    /// context: the clear is metric-wide, not scoped to the calling context.
    async fn clear_incomplete(&self) -> MetricsResult<()> {
        let name = &self.definition.common.name;
        debug!(metric = %name, "clearing incomplete duration measurements");
        self.store.clear_start_time(name, &Context::empty()).await
    }

    async fn record_start_stop(
        &self,
        context: &Context,
        record_point: &str,
        now: TimestampMs,
    ) -> MetricsResult<()> {
        let def = &self.definition;
        let start_time = self
            .store
            .get_start_time(&def.common.name, context)
            .await?;
        if record_point == def.record_start {
            if let Some(start_time) = start_time {
                self.handle_incomplete(start_time, context, now).await?;
            }
            self.store
                .store_start_time(&def.common.name, context, now)
                .await
        } else {
            self.record_stop(start_time, context, now).await
        }
    }

    async fn handle_incomplete(
        &self,
        start_time: TimestampMs,
        context: &Context,
        now: TimestampMs,
    ) -> MetricsResult<()> {
        match self.definition.handle_incomplete {
            HandleIncomplete::Ignore => {
                self.store
                    .clear_start_time(&self.definition.common.name, context)
                    .await
            }
            HandleIncomplete::Truncate => {
                self.record_stop(Some(start_time), context, now).await
            }
        }
    }

    async fn record_stop(
        &self,
        start_time: Option<TimestampMs>,
        context: &Context,
        now: TimestampMs,
    ) -> MetricsResult<()> {
        let def = &self.definition;
        let Some(start_time) = start_time else {
            return Err(MetricsError::StartTimeMissing);
        };
        self.store
            .clear_start_time(&def.common.name, context)
            .await?;
        let duration = (now - start_time) as f64;
        let trimmed = trim_duration(duration, def.duration_accuracy.as_ref());
        super::update_snapshots(self, context, trimmed, false, now).await
    }
}

#[async_trait]
impl Metric for DurationMetric {
    fn common(&self) -> &MetricCommon {
        &self.definition.common
    }

    fn store(&self) -> &dyn MetricStore {
        self.store.as_ref()
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn record_points(&self) -> Vec<String> {
        Self::collect_record_points(&self.definition)
    }

    async fn record(&self, record_point: &str, context: &Context) -> MetricsResult<()> {
        let def = &self.definition;
        let now = self.clock.now_ms();
        self.assert_valid_record_point(record_point)?;
        let context = self.verify_and_trim_context(context)?;
        if def
            .clear_incomplete_events
            .iter()
            .any(|event| event == record_point)
        {
            self.clear_incomplete().await?;
        }
        if record_point == def.record_start || record_point == def.record_stop {
            self.record_start_stop(&context, record_point, now).await?;
        }
        Ok(())
    }

    fn round_aggregate(&self, value: f64) -> f64 {
        match &self.definition.common.agg {
            Some(agg) => trim_duration(value, agg.duration_accuracy.as_ref()),
            None => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateOp;
    use crate::clock::ManualClock;
    use crate::context::AssignmentKind;
    use crate::definition::{Aggregation, AggregationWindow};
    use crate::store::InMemoryMetricStore;
    use crate::time::{DurationAccuracy, DurationUnit};

    fn definition(name: &str) -> DurationMetricDefinition {
        DurationMetricDefinition {
            common: MetricCommon {
                name: name.into(),
                assignment: vec![AssignmentKind::Workflow],
                ..MetricCommon::default()
            },
            record_start: "begin".into(),
            record_stop: "end".into(),
            clear_incomplete_events: Vec::new(),
            handle_incomplete: HandleIncomplete::Ignore,
            duration_accuracy: None,
        }
    }

    fn context() -> Context {
        Context {
            workflow_id: Some("wf".into()),
            ..Context::default()
        }
    }

    fn setup(
        definition: DurationMetricDefinition,
    ) -> (DurationMetric, Arc<InMemoryMetricStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryMetricStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let metric = DurationMetric::new(definition, store.clone(), clock.clone()).unwrap();
        (metric, store, clock)
    }

    #[tokio::test]
    async fn start_then_stop_records_elapsed_millis() {
        let (metric, store, clock) = setup(definition("m"));

        clock.set(1_000);
        metric.record("begin", &context()).await.unwrap();
        clock.set(4_000);
        metric.record("end", &context()).await.unwrap();

        let snapshots = store.get_snapshots("m", &context()).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].value, 3_000.0);

        // the interval is closed again
        assert_eq!(
            store.get_start_time("m", &context()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn stop_without_start_fails_and_records_nothing() {
        let (metric, store, clock) = setup(definition("m"));

        clock.set(1_000);
        assert_eq!(
            metric.record("end", &context()).await,
            Err(MetricsError::StartTimeMissing)
        );
        assert_eq!(store.get_snapshot_count("m", &context()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn truncate_records_the_stale_interval_first() {
        let mut def = definition("m");
        def.handle_incomplete = HandleIncomplete::Truncate;
        let (metric, store, clock) = setup(def);

        clock.set(0);
        metric.record("begin", &context()).await.unwrap();
        clock.set(10);
        metric.record("begin", &context()).await.unwrap();
        clock.set(15);
        metric.record("end", &context()).await.unwrap();

        let snapshots = store.get_snapshots("m", &context()).await.unwrap();
        assert_eq!(
            snapshots.iter().map(|s| s.value).collect::<Vec<_>>(),
            vec![10.0, 5.0]
        );
    }

    #[tokio::test]
    async fn ignore_discards_the_stale_interval() {
        let (metric, store, clock) = setup(definition("m"));

        clock.set(0);
        metric.record("begin", &context()).await.unwrap();
        clock.set(10);
        metric.record("begin", &context()).await.unwrap();
        clock.set(15);
        metric.record("end", &context()).await.unwrap();

        let snapshots = store.get_snapshots("m", &context()).await.unwrap();
        assert_eq!(
            snapshots.iter().map(|s| s.value).collect::<Vec<_>>(),
            vec![5.0]
        );
    }

    #[tokio::test]
    async fn clear_incomplete_event_discards_open_intervals_metric_wide() {
        let mut def = definition("m");
        def.clear_incomplete_events = vec!["reset".into()];
        let (metric, _store, clock) = setup(def);

        let other = Context {
            workflow_id: Some("other".into()),
            ..Context::default()
        };
        clock.set(100);
        metric.record("begin", &context()).await.unwrap();
        metric.record("begin", &other).await.unwrap();

        // the clear is metric-wide although it is fired with one context
        metric.record("reset", &context()).await.unwrap();

        clock.set(200);
        assert_eq!(
            metric.record("end", &context()).await,
            Err(MetricsError::StartTimeMissing)
        );
        assert_eq!(
            metric.record("end", &other).await,
            Err(MetricsError::StartTimeMissing)
        );
    }

    #[tokio::test]
    async fn durations_are_floored_to_duration_accuracy() {
        let mut def = definition("m");
        def.duration_accuracy = Some(DurationAccuracy::new(2.0, DurationUnit::Seconds));
        let (metric, store, clock) = setup(def);

        clock.set(0);
        metric.record("begin", &context()).await.unwrap();
        clock.set(4_999);
        metric.record("end", &context()).await.unwrap();

        let snapshots = store.get_snapshots("m", &context()).await.unwrap();
        assert_eq!(snapshots[0].value, 4_000.0);
    }

    #[tokio::test]
    async fn aggregated_duration_uses_agg_duration_accuracy() {
        let mut def = definition("m");
        def.common.agg = Some(Aggregation {
            operation: AggregateOp::Max,
            time: AggregationWindow::All,
            accuracy: None,
            duration_accuracy: Some(DurationAccuracy::new(1.0, DurationUnit::Seconds)),
        });
        let (metric, store, clock) = setup(def);

        clock.set(0);
        metric.record("begin", &context()).await.unwrap();
        clock.set(1_700);
        metric.record("end", &context()).await.unwrap();

        let last = store
            .get_last_snapshot("m", &context())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.value, 1_000.0);
        assert_eq!(last.helpers.last_max, Some(1_700.0));
    }

    #[tokio::test]
    async fn open_intervals_are_scoped_per_context() {
        let (metric, store, clock) = setup(definition("m"));
        let other = Context {
            workflow_id: Some("other".into()),
            ..Context::default()
        };

        clock.set(0);
        metric.record("begin", &context()).await.unwrap();
        clock.set(50);
        metric.record("begin", &other).await.unwrap();
        clock.set(80);
        metric.record("end", &context()).await.unwrap();
        clock.set(90);
        metric.record("end", &other).await.unwrap();

        let first = store.get_snapshots("m", &context()).await.unwrap();
        let second = store.get_snapshots("m", &other).await.unwrap();
        assert_eq!(first[0].value, 80.0);
        assert_eq!(second[0].value, 40.0);
    }

    #[tokio::test]
    async fn unknown_record_point_is_rejected() {
        let (metric, _, _) = setup(definition("m"));
        assert_eq!(
            metric.record("bogus", &context()).await,
            Err(MetricsError::UnknownRecordPoint {
                point: "bogus".into()
            })
        );
    }

    #[tokio::test]
    async fn explicit_values_are_not_supported() {
        let (metric, _, _) = setup(definition("m"));
        assert_eq!(
            metric.record_value("begin", &context(), 1.0).await,
            Err(MetricsError::RecordValueUnsupported { metric: "m".into() })
        );
    }

    #[test]
    fn record_points_are_the_union_of_start_stop_and_clear_events() {
        let mut def = definition("m");
        def.clear_incomplete_events = vec!["reset".into(), "end".into()];
        let store = Arc::new(InMemoryMetricStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let metric = DurationMetric::new(def, store, clock).unwrap();
        assert_eq!(metric.record_points(), vec!["begin", "end", "reset"]);
    }
}
