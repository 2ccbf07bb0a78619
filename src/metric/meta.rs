//! Meta metrics
//!
//! A meta metric has no raw input of its own: at each of its record points
//! it recomputes a value from the snapshot history of the metric named by
//! `meta_reference` and stores the result through the shared snapshot
//! algorithm.

use super::Metric;
use crate::aggregate;
use crate::clock::Clock;
use crate::context::Context;
use crate::definition::{AggregationWindow, MetaMetricDefinition, MetricCommon, MetricDefinition};
use crate::error::{MetricsError, MetricsResult};
use crate::store::MetricStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Metric derived from another metric's snapshot history
pub struct MetaMetric {
    definition: MetaMetricDefinition,
    store: Arc<dyn MetricStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MetaMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaMetric")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl MetaMetric {
    /// Validate the definition and construct the metric
    pub fn new(
        definition: MetaMetricDefinition,
        store: Arc<dyn MetricStore>,
        clock: Arc<dyn Clock>,
    ) -> MetricsResult<Self> {
        super::verify_constraints(&definition.common, &definition.record_points, || {
            Self::constraint_error(&definition)
        })?;
        Ok(Self {
            definition,
            store,
            clock,
        })
    }

    pub fn definition(&self) -> &MetaMetricDefinition {
        &self.definition
    }

    fn constraint_error(def: &MetaMetricDefinition) -> Option<String> {
        if let Some(agg) = &def.common.agg {
            if matches!(agg.accuracy, Some(accuracy) if accuracy < 0.0) {
                return Some("\"agg.accuracy\" should not be negative.".into());
            }
        }
        None
    }

    async fn update_from_reference(&self, context: &Context) -> MetricsResult<()> {
        let def = &self.definition;
        let context = self.verify_and_trim_context(context)?;
        let now = self.clock.now_ms();

        let Some(agg) = &def.common.agg else {
            // Mirror the referenced metric's latest value as a plain
            // observation; a no-op while the reference has no history.
            let last = self
                .store
                .get_last_snapshot(&def.meta_reference, &context)
                .await?;
            let Some(last) = last else {
                return Ok(());
            };
            return super::update_snapshots(self, &context, last.value, false, now).await;
        };

        let snapshots = match agg.time {
            AggregationWindow::All => {
                self.store.get_snapshots(&def.meta_reference, &context).await?
            }
            AggregationWindow::Bucketed(accuracy) => {
                let start = accuracy.bucket_start(now);
                let end = start + accuracy.bucket_millis();
                self.store
                    .get_snapshots_within_time_frame(&def.meta_reference, &context, start, end)
                    .await?
            }
        };
        let values: Vec<f64> = snapshots.iter().map(|snapshot| snapshot.value).collect();
        let value = aggregate::aggregate_complete(agg.operation, &values);
        super::update_snapshots(self, &context, value, true, now).await
    }
}

#[async_trait]
impl Metric for MetaMetric {
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
        self.definition.record_points.clone()
    }

    fn metric_dependencies(&self) -> Vec<String> {
        vec![self.definition.meta_reference.clone()]
    }

    fn verify_dependency_definitions(
        &self,
        definitions: &[MetricDefinition],
    ) -> MetricsResult<()> {
        let def = &self.definition;
        if definitions.len() != 1 {
            return Err(MetricsError::dependency(
                "Expected metric definitions array of length 1",
            ));
        }
        let referenced = &definitions[0];
        if referenced.name() != def.meta_reference {
            return Err(MetricsError::dependency(format!(
                "Expected metric definition for '{}', but got definition for '{}'",
                def.meta_reference,
                referenced.name()
            )));
        }
        let windowed = matches!(
            def.common.agg.as_ref().map(|agg| agg.time),
            Some(AggregationWindow::Bucketed(_))
        );
        if windowed && !referenced.records_timestamps() {
            return Err(MetricsError::dependency(format!(
                "Meta metric requires timestamps of referenced metric '{}', \
                 but the referenced metric does not record them",
                def.meta_reference
            )));
        }
        Ok(())
    }

    async fn record(&self, record_point: &str, context: &Context) -> MetricsResult<()> {
        self.assert_valid_record_point(record_point)?;
        self.update_from_reference(context).await
    }

    fn round_aggregate(&self, value: f64) -> f64 {
        super::round_aggregate_accuracy(self.definition.common.agg.as_ref(), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateOp;
    use crate::clock::ManualClock;
    use crate::context::AssignmentKind;
    use crate::definition::Aggregation;
    use crate::snapshot::Snapshot;
    use crate::time::{TimeAccuracy, MILLIS_PER_DAY, MILLIS_PER_HOUR};

    fn definition(name: &str, reference: &str) -> MetaMetricDefinition {
        MetaMetricDefinition {
            common: MetricCommon {
                name: name.into(),
                assignment: vec![AssignmentKind::Workflow],
                ..MetricCommon::default()
            },
            meta_reference: reference.into(),
            record_points: vec!["recompute".into()],
        }
    }

    fn context() -> Context {
        Context {
            workflow_id: Some("wf".into()),
            ..Context::default()
        }
    }

    fn setup(
        definition: MetaMetricDefinition,
    ) -> (MetaMetric, Arc<crate::store::InMemoryMetricStore>, Arc<ManualClock>) {
        let store = Arc::new(crate::store::InMemoryMetricStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let metric = MetaMetric::new(definition, store.clone(), clock.clone()).unwrap();
        (metric, store, clock)
    }

    async fn seed_reference(
        store: &crate::store::InMemoryMetricStore,
        name: &str,
        snapshots: &[(u64, f64, Option<i64>)],
    ) {
        for (index, value, timestamp) in snapshots {
            store
                .store_new_snapshot(
                    name,
                    &context(),
                    Snapshot::new(*index, *value, *timestamp),
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn without_agg_mirrors_the_latest_referenced_value() {
        let (metric, store, _) = setup(definition("meta", "ref"));
        seed_reference(&store, "ref", &[(0, 7.0, None), (1, 9.0, None)]).await;

        metric.record("recompute", &context()).await.unwrap();

        let snapshots = store.get_snapshots("meta", &context()).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].value, 9.0);
        assert!(snapshots[0].helpers.is_empty());
    }

    #[tokio::test]
    async fn without_referenced_history_recording_is_a_no_op() {
        let (metric, store, _) = setup(definition("meta", "ref"));
        metric.record("recompute", &context()).await.unwrap();
        assert_eq!(
            store.get_snapshot_count("meta", &context()).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn all_window_aggregates_complete_history() {
        let mut def = definition("meta", "ref");
        def.common.agg = Some(Aggregation::new(
            AggregateOp::Average,
            AggregationWindow::All,
        ));
        let (metric, store, _) = setup(def);
        seed_reference(&store, "ref", &[(0, 2.0, None), (1, 4.0, None), (2, 6.0, None)]).await;

        metric.record("recompute", &context()).await.unwrap();

        let last = store
            .get_last_snapshot("meta", &context())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.value, 4.0);
        // an aggregate-seeded snapshot only counts recomputations
        assert_eq!(last.helpers.number_of_measurements, Some(1));
        assert_eq!(last.helpers.sum_of_measurements, None);

        // a second recomputation merges into the same snapshot
        seed_reference(&store, "ref", &[(3, 12.0, None)]).await;
        metric.record("recompute", &context()).await.unwrap();
        let last = store
            .get_last_snapshot("meta", &context())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.index, 0);
        assert_eq!(last.value, 6.0);
        assert_eq!(last.helpers.number_of_measurements, Some(2));
    }

    #[tokio::test]
    async fn bucketed_window_selects_only_the_current_bucket() {
        let mut def = definition("meta", "ref");
        def.common.agg = Some(Aggregation::new(
            AggregateOp::Max,
            AggregationWindow::Bucketed(TimeAccuracy::Day),
        ));
        let (metric, store, clock) = setup(def);

        let day_one = 0;
        let day_two = MILLIS_PER_DAY;
        seed_reference(
            &store,
            "ref",
            &[(0, 5.0, Some(day_one)), (1, 11.0, Some(day_two))],
        )
        .await;

        clock.set(day_one + 3 * MILLIS_PER_HOUR);
        metric.record("recompute", &context()).await.unwrap();

        let last = store
            .get_last_snapshot("meta", &context())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.value, 5.0);
        assert_eq!(last.start_of_measurement, Some(day_one));
    }

    #[tokio::test]
    async fn empty_bucket_aggregates_to_nan() {
        let mut def = definition("meta", "ref");
        def.common.agg = Some(Aggregation::new(
            AggregateOp::Sum,
            AggregationWindow::Bucketed(TimeAccuracy::Day),
        ));
        let (metric, store, clock) = setup(def);
        seed_reference(&store, "ref", &[(0, 5.0, Some(0))]).await;

        clock.set(3 * MILLIS_PER_DAY);
        metric.record("recompute", &context()).await.unwrap();

        let last = store
            .get_last_snapshot("meta", &context())
            .await
            .unwrap()
            .unwrap();
        assert!(last.value.is_nan());
    }

    #[test]
    fn dependency_check_requires_exactly_the_referenced_definition() {
        let (metric, _, _) = setup(definition("meta", "ref"));

        assert!(metric.verify_dependency_definitions(&[]).is_err());

        let other = MetricDefinition::Number(crate::definition::NumberMetricDefinition {
            common: MetricCommon {
                name: "unrelated".into(),
                ..MetricCommon::default()
            },
            kind: crate::definition::NumberKind::Int,
            record_points: vec!["p".into()],
            accuracy: None,
            const_value: None,
        });
        let err = metric.verify_dependency_definitions(&[other]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected metric definition for 'ref', but got definition for 'unrelated'"
        );
    }

    #[test]
    fn windowed_meta_requires_a_timestamping_reference() {
        let mut def = definition("meta", "ref");
        def.common.agg = Some(Aggregation::new(
            AggregateOp::Max,
            AggregationWindow::Bucketed(TimeAccuracy::Day),
        ));
        let (metric, _, _) = setup(def);

        let mut referenced = crate::definition::NumberMetricDefinition {
            common: MetricCommon {
                name: "ref".into(),
                ..MetricCommon::default()
            },
            kind: crate::definition::NumberKind::Int,
            record_points: vec!["p".into()],
            accuracy: None,
            const_value: None,
        };
        let plain = MetricDefinition::Number(referenced.clone());
        assert!(metric.verify_dependency_definitions(&[plain]).is_err());

        referenced.common.timestamp = Some(TimeAccuracy::Hour);
        let timestamping = MetricDefinition::Number(referenced);
        metric
            .verify_dependency_definitions(&[timestamping])
            .unwrap();
    }
}
