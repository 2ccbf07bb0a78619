//! Persistence contract for snapshots, open intervals and identity counters
//!
//! The engine never touches storage internals: every read and write goes
//! through [`MetricStore`]. Implementations key their data by metric name
//! plus context. Queries match on exactly the context ids supplied, so an
//! empty context addresses every context of a metric. Metric-wide deletion
//! and the duration clear-incomplete path rely on this.

pub mod memory;

use crate::context::Context;
use crate::error::MetricsResult;
use crate::snapshot::Snapshot;
use crate::time::TimestampMs;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::InMemoryMetricStore;

/// Placeholder for an absent numeric context id in export rows
pub const PLACEHOLDER_ID: i64 = -1;
/// Placeholder for an absent string context id in export rows
pub const PLACEHOLDER_NAME: &str = "";

/// Context of an export row: absent ids are substituted with fixed
/// placeholders so every row has the same flat shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportContext {
    pub schedule_id: i64,
    pub workflow_id: String,
    pub workflow_version_id: String,
    pub execution_id: i64,
    pub task_id: i64,
}

impl From<&Context> for ExportContext {
    fn from(context: &Context) -> Self {
        Self {
            schedule_id: context.schedule_id.unwrap_or(PLACEHOLDER_ID),
            workflow_id: context
                .workflow_id
                .clone()
                .unwrap_or_else(|| PLACEHOLDER_NAME.to_string()),
            workflow_version_id: context
                .workflow_version_id
                .clone()
                .unwrap_or_else(|| PLACEHOLDER_NAME.to_string()),
            execution_id: context.execution_id.unwrap_or(PLACEHOLDER_ID),
            task_id: context.task_id.unwrap_or(PLACEHOLDER_ID),
        }
    }
}

/// One row of a flat snapshot export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotExport {
    pub metric_name: String,
    #[serde(flatten)]
    pub context: ExportContext,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

/// Store contract consumed by the metrics engine.
///
/// Policy asymmetries are part of the contract: `store_start_time` rejects a
/// second open interval for the same key, while `clear_start_time` succeeds
/// when nothing is stored. `remove_oldest_snapshot` fails when the context
/// holds no snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Latest snapshot (highest index) for the key, if any
    async fn get_last_snapshot(
        &self,
        metric_name: &str,
        context: &Context,
    ) -> MetricsResult<Option<Snapshot>>;

    /// All snapshots for the key, ordered by ascending index
    async fn get_snapshots(
        &self,
        metric_name: &str,
        context: &Context,
    ) -> MetricsResult<Vec<Snapshot>>;

    /// Snapshots whose `start_of_measurement` lies in `[start, end)`.
    /// Fails when a candidate snapshot carries no timestamp.
    async fn get_snapshots_within_time_frame(
        &self,
        metric_name: &str,
        context: &Context,
        start: TimestampMs,
        end: TimestampMs,
    ) -> MetricsResult<Vec<Snapshot>>;

    /// Number of snapshots stored for the key
    async fn get_snapshot_count(
        &self,
        metric_name: &str,
        context: &Context,
    ) -> MetricsResult<usize>;

    /// Append a new snapshot for the key
    async fn store_new_snapshot(
        &self,
        metric_name: &str,
        context: &Context,
        snapshot: Snapshot,
    ) -> MetricsResult<()>;

    /// Replace the stored snapshot with the same index
    async fn overwrite_snapshot(
        &self,
        metric_name: &str,
        context: &Context,
        snapshot: Snapshot,
    ) -> MetricsResult<()>;

    /// Remove the snapshot with the lowest index for the key
    async fn remove_oldest_snapshot(
        &self,
        metric_name: &str,
        context: &Context,
    ) -> MetricsResult<()>;

    /// Delete every snapshot of the metric, across all contexts
    async fn delete_snapshots(&self, metric_name: &str) -> MetricsResult<()>;

    /// Persist the start of an open interval; rejects an existing one
    async fn store_start_time(
        &self,
        metric_name: &str,
        context: &Context,
        start_time: TimestampMs,
    ) -> MetricsResult<()>;

    /// Start of the open interval for the key, if any
    async fn get_start_time(
        &self,
        metric_name: &str,
        context: &Context,
    ) -> MetricsResult<Option<TimestampMs>>;

    /// Drop open intervals matching the key; succeeds when none exist
    async fn clear_start_time(&self, metric_name: &str, context: &Context)
        -> MetricsResult<()>;

    /// Next execution id for the workflow (monotonic, starts at 0)
    async fn new_execution_id(&self, workflow_id: &str) -> MetricsResult<i64>;

    /// Next schedule id (monotonic, starts at 0)
    async fn new_schedule_id(&self) -> MetricsResult<i64>;

    /// Flat export of all stored snapshots of the named metrics
    async fn export_snapshots(
        &self,
        metric_names: &[String],
    ) -> MetricsResult<Vec<SnapshotExport>>;
}
