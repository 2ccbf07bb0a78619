//! Metric registry
//!
//! Keeps track of registered metrics, their record/clear points and their
//! dependencies. Metrics must be registered before they can record;
//! dependencies must be registered before their dependents.

use crate::clock::{Clock, SystemClock};
use crate::definition::MetricDefinition;
use crate::error::{MetricsError, MetricsResult};
use crate::metric::{create_metric, Metric};
use crate::store::MetricStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Kind of event a metric can listen on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEvent {
    Record,
    Clear,
}

struct RegisteredMetric {
    definition: MetricDefinition,
    metric: Arc<dyn Metric>,
}

/// Registry of metric instances, indexed by name and by event point
pub struct MetricRegistry {
    store: Arc<dyn MetricStore>,
    clock: Arc<dyn Clock>,
    metrics: HashMap<String, RegisteredMetric>,
    registration_order: Vec<String>,
    record_points: HashMap<String, Vec<Arc<dyn Metric>>>,
    clear_points: HashMap<String, Vec<Arc<dyn Metric>>>,
}

impl MetricRegistry {
    /// Registry backed by the given store and the wall clock
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Registry with an explicit clock
    pub fn with_clock(store: Arc<dyn MetricStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            metrics: HashMap::new(),
            registration_order: Vec::new(),
            record_points: HashMap::new(),
            clear_points: HashMap::new(),
        }
    }

    /// Register a metric. The definition is validated, the name must be
    /// unused and all dependencies must already be registered.
    pub fn register(&mut self, definition: MetricDefinition) -> MetricsResult<()> {
        let metric = create_metric(definition.clone(), self.store.clone(), self.clock.clone())?;
        let name = definition.name().to_string();
        if self.is_registered(&name) {
            return Err(MetricsError::AlreadyRegistered { metric: name });
        }

        let dependencies = metric.metric_dependencies();
        let missing: Vec<&String> = dependencies
            .iter()
            .filter(|dependency| !self.is_registered(dependency))
            .collect();
        if !missing.is_empty() {
            let missing = missing
                .iter()
                .map(|name| name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(MetricsError::UnfulfilledDependencies {
                metric: name,
                missing,
            });
        }

        let dependency_definitions: Vec<MetricDefinition> = dependencies
            .iter()
            .filter_map(|dependency| self.metrics.get(dependency))
            .map(|registered| registered.definition.clone())
            .collect();
        metric.verify_dependency_definitions(&dependency_definitions)?;

        for point in metric.record_points() {
            self.record_points
                .entry(point)
                .or_default()
                .push(metric.clone());
        }
        for point in metric.clear_points() {
            self.clear_points
                .entry(point)
                .or_default()
                .push(metric.clone());
        }
        self.registration_order.push(name.clone());
        self.metrics.insert(
            name,
            RegisteredMetric {
                definition,
                metric,
            },
        );
        Ok(())
    }

    /// True if a metric with this name has been registered
    pub fn is_registered(&self, metric_name: &str) -> bool {
        self.metrics.contains_key(metric_name)
    }

    /// The registered metric instance with the given name
    pub fn metric(&self, metric_name: &str) -> MetricsResult<Arc<dyn Metric>> {
        self.metrics
            .get(metric_name)
            .map(|registered| registered.metric.clone())
            .ok_or_else(|| MetricsError::NotRegistered {
                metric: metric_name.to_string(),
            })
    }

    /// The definition a metric was registered with
    pub fn definition(&self, metric_name: &str) -> Option<&MetricDefinition> {
        self.metrics
            .get(metric_name)
            .map(|registered| &registered.definition)
    }

    /// All metrics listening on this event point
    pub fn metrics_for_event(&self, event: &str, kind: MetricEvent) -> Vec<Arc<dyn Metric>> {
        let index = match kind {
            MetricEvent::Record => &self.record_points,
            MetricEvent::Clear => &self.clear_points,
        };
        index.get(event).cloned().unwrap_or_default()
    }

    /// Names of all non-private metrics, in registration order
    pub fn public_metric_names(&self) -> Vec<String> {
        self.registration_order
            .iter()
            .filter(|name| {
                self.metrics
                    .get(*name)
                    .is_some_and(|registered| !registered.definition.common().private)
            })
            .cloned()
            .collect()
    }

}
