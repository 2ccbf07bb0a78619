//! Construction of metric instances from definitions
//!
//! The match over the definition kind is exhaustive: adding a metric kind
//! fails to compile until every dispatch site handles it.

use super::{DurationMetric, MetaMetric, Metric, NumberMetric};
use crate::clock::Clock;
use crate::definition::MetricDefinition;
use crate::error::MetricsResult;
use crate::store::MetricStore;
use std::sync::Arc;

/// Validate the definition and construct the matching metric kind
pub fn create_metric(
    definition: MetricDefinition,
    store: Arc<dyn MetricStore>,
    clock: Arc<dyn Clock>,
) -> MetricsResult<Arc<dyn Metric>> {
    match definition {
        MetricDefinition::Number(def) => {
            Ok(Arc::new(NumberMetric::new(def, store, clock)?))
        }
        MetricDefinition::Duration(def) => {
            Ok(Arc::new(DurationMetric::new(def, store, clock)?))
        }
        MetricDefinition::Meta(def) => Ok(Arc::new(MetaMetric::new(def, store, clock)?)),
    }
}
