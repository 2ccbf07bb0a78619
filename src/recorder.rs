//! Recording dispatch service
//!
//! The embedding application records through [`MetricRecorder`] rather than
//! talking to metric instances directly: one event name fans out to every
//! metric listening on it. Clear points fire before record points, so a
//! metric that both clears and records on the same event starts from a
//! wiped history. A failure in one metric is logged and does not abort
//! dispatch to the remaining metrics.
//!
//! Affected metrics are awaited one after another, which serializes store
//! access per call and avoids the lost-update hazard of overlapping
//! read-modify-write cycles on the same (metric, context) key.

use crate::clock::Clock;
use crate::context::Context;
use crate::definition::MetricDefinition;
use crate::error::{MetricsError, MetricsResult};
use crate::metric::Metric;
use crate::registry::{MetricEvent, MetricRegistry};
use crate::store::{MetricStore, SnapshotExport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Dispatches record and clear events to all affected metrics
pub struct MetricRecorder {
    store: Arc<dyn MetricStore>,
    registry: RwLock<MetricRegistry>,
    enabled: AtomicBool,
}

impl MetricRecorder {
    /// Recorder backed by the given store, recording enabled
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        let registry = MetricRegistry::new(store.clone());
        Self {
            store,
            registry: RwLock::new(registry),
            enabled: AtomicBool::new(true),
        }
    }

    /// Recorder with an explicit clock (for deterministic tests)
    pub fn with_clock(store: Arc<dyn MetricStore>, clock: Arc<dyn Clock>) -> Self {
        let registry = MetricRegistry::with_clock(store.clone(), clock);
        Self {
            store,
            registry: RwLock::new(registry),
            enabled: AtomicBool::new(true),
        }
    }

    /// Whether store writes happen on dispatch
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable recording. Lookups and logging still happen while
    /// disabled; store writes do not.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Register a metric definition
    pub async fn register(&self, definition: MetricDefinition) -> MetricsResult<()> {
        self.registry.write().await.register(definition)
    }

    /// Names of all non-private registered metrics
    pub async fn public_metric_names(&self) -> Vec<String> {
        self.registry.read().await.public_metric_names()
    }

    /// Record an event without an explicit value. Fires clear points first,
    /// then record points.
    pub async fn record(&self, record_point: &str, context: &Context) -> MetricsResult<()> {
        Self::assert_event_point(record_point)?;
        debug!(
            enabled = self.is_enabled(),
            record_point, %context, "record"
        );
        let (to_clear, to_record) = self.affected(record_point).await;
        if to_record.is_empty() {
            warn!(record_point, "no metrics are affected by this record point");
        }
        if !self.is_enabled() {
            return Ok(());
        }
        for metric in to_clear {
            if let Err(err) = metric.clear_snapshots(record_point).await {
                Self::log_metric_error(metric.as_ref(), &err);
            }
        }
        for metric in to_record {
            if let Err(err) = metric.record(record_point, context).await {
                Self::log_metric_error(metric.as_ref(), &err);
            }
        }
        Ok(())
    }

    /// Record an event with an explicit value
    pub async fn record_value(
        &self,
        record_point: &str,
        context: &Context,
        value: f64,
    ) -> MetricsResult<()> {
        Self::assert_event_point(record_point)?;
        debug!(
            enabled = self.is_enabled(),
            record_point, %context, value, "record value"
        );
        let to_record = {
            let registry = self.registry.read().await;
            registry.metrics_for_event(record_point, MetricEvent::Record)
        };
        if to_record.is_empty() {
            warn!(record_point, "no metrics are affected by this record point");
        }
        if !self.is_enabled() {
            return Ok(());
        }
        for metric in to_record {
            if let Err(err) = metric.record_value(record_point, context, value).await {
                Self::log_metric_error(metric.as_ref(), &err);
            }
        }
        Ok(())
    }

    /// Flat export of every stored snapshot of the non-private metrics
    pub async fn export_public_snapshots(&self) -> MetricsResult<Vec<SnapshotExport>> {
        let names = self.public_metric_names().await;
        self.store.export_snapshots(&names).await
    }

    /// The flat export serialized as pretty-printed JSON
    pub async fn export_public_snapshots_json(&self) -> MetricsResult<String> {
        let rows = self.export_public_snapshots().await?;
        serde_json::to_string_pretty(&rows).map_err(|err| {
            MetricsError::storage(format!("failed to serialize export: {err}"))
        })
    }

    async fn affected(
        &self,
        event: &str,
    ) -> (Vec<Arc<dyn Metric>>, Vec<Arc<dyn Metric>>) {
        let registry = self.registry.read().await;
        (
            registry.metrics_for_event(event, MetricEvent::Clear),
            registry.metrics_for_event(event, MetricEvent::Record),
        )
    }

    fn assert_event_point(event: &str) -> MetricsResult<()> {
        if event.trim().is_empty() {
            return Err(MetricsError::EmptyEventPoint);
        }
        Ok(())
    }

    fn log_metric_error(metric: &dyn Metric, err: &MetricsError) {
        error!(
            metric = %metric.common().name,
            %err,
            "error while processing metric"
        );
    }
}
