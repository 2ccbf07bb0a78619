//! Number metrics
//!
//! Records a caller-supplied or constant numeric value per observation.

use super::Metric;
use crate::clock::Clock;
use crate::context::Context;
use crate::definition::{ConstValue, MetricCommon, NumberKind, NumberMetricDefinition};
use crate::error::{MetricsError, MetricsResult};
use crate::store::MetricStore;
use crate::time::trim_value;
use async_trait::async_trait;
use std::sync::Arc;

/// Metric recording supplied or constant values
pub struct NumberMetric {
    definition: NumberMetricDefinition,
    store: Arc<dyn MetricStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for NumberMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NumberMetric")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

impl NumberMetric {
    /// Validate the definition and construct the metric
    pub fn new(
        definition: NumberMetricDefinition,
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

    pub fn definition(&self) -> &NumberMetricDefinition {
        &self.definition
    }

    fn constraint_error(def: &NumberMetricDefinition) -> Option<String> {
        if matches!(def.accuracy, Some(accuracy) if accuracy < 0.0) {
            return Some("accuracy should not be negative.".into());
        }
        match &def.const_value {
            Some(ConstValue::Fixed(value)) => {
                if def.kind == NumberKind::Int && value.fract() != 0.0 {
                    return Some("constValue should not be float for int metrics.".into());
                }
            }
            Some(ConstValue::PerPoint(map)) => {
                let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                let mut points: Vec<&str> =
                    def.record_points.iter().map(String::as_str).collect();
                points.sort_unstable();
                if keys != points {
                    return Some(format!(
                        "every record point should have a matching entry in constValueMap. \
                         Expected {keys:?} to equal {points:?}."
                    ));
                }
                if def.kind == NumberKind::Int
                    && map.values().any(|value| value.fract() != 0.0)
                {
                    return Some(
                        "every value in constValueMap should be int for int metrics".into(),
                    );
                }
            }
            None => {}
        }
        if let Some(agg) = &def.common.agg {
            if matches!(agg.accuracy, Some(accuracy) if accuracy < 0.0) {
                return Some("\"agg.accuracy\" should not be negative.".into());
            }
        }
        None
    }

    fn trim_to_accuracy(&self, value: f64) -> f64 {
        match self.definition.accuracy {
            Some(accuracy) => trim_value(value, accuracy),
            None => value,
        }
    }

    fn constant_for(&self, record_point: &str) -> Option<f64> {
        match &self.definition.const_value {
            Some(ConstValue::Fixed(value)) => Some(*value),
            Some(ConstValue::PerPoint(map)) => map.get(record_point).copied(),
            None => None,
        }
    }
}

#[async_trait]
impl Metric for NumberMetric {
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

    async fn record(&self, record_point: &str, context: &Context) -> MetricsResult<()> {
        self.assert_valid_record_point(record_point)?;
        if self.definition.const_value.is_none() {
            return Err(MetricsError::ValueRequired);
        }
        let value = self
            .constant_for(record_point)
            .ok_or(MetricsError::ValueRequired)?;
        self.record_value(record_point, context, value).await
    }

    async fn record_value(
        &self,
        record_point: &str,
        context: &Context,
        value: f64,
    ) -> MetricsResult<()> {
        self.assert_valid_record_point(record_point)?;
        match &self.definition.const_value {
            Some(ConstValue::Fixed(constant)) if value != *constant => {
                return Err(MetricsError::ConstValueProvided {
                    field: "constValue",
                });
            }
            Some(ConstValue::PerPoint(map)) if map.get(record_point) != Some(&value) => {
                return Err(MetricsError::ConstValueProvided {
                    field: "constValueMap",
                });
            }
            _ => {}
        }
        let value = self.trim_to_accuracy(value);
        if self.definition.kind == NumberKind::Int && value.fract() != 0.0 {
            return Err(MetricsError::IntegerRequired { metric_type: "int" });
        }
        super::update_snapshots(self, context, value, false, self.clock.now_ms()).await
    }

    fn round_aggregate(&self, value: f64) -> f64 {
        super::round_aggregate_accuracy(self.definition.common.agg.as_ref(), value)
    }
}
