//! In-memory store backend
//!
//! Reference implementation of [`MetricStore`] for tests, examples and
//! embedders that do not need durability. Write keys are completed with
//! fixed placeholder values for absent ids, so explicitly supplying a
//! placeholder (`-1`, `""`) as a real id is rejected.

use super::{
    ExportContext, MetricStore, SnapshotExport, PLACEHOLDER_ID, PLACEHOLDER_NAME,
};
use crate::context::Context;
use crate::error::{MetricsError, MetricsResult};
use crate::snapshot::Snapshot;
use crate::time::TimestampMs;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Fully keyed storage coordinate: metric name plus placeholder-completed
/// context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StoreKey {
    metric_name: String,
    schedule_id: i64,
    workflow_id: String,
    workflow_version_id: String,
    execution_id: i64,
    task_id: i64,
}

impl StoreKey {
    fn new(metric_name: &str, context: &Context) -> Self {
        Self {
            metric_name: metric_name.to_string(),
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

    /// Partial match: equality on the metric name and on exactly the
    /// context ids that are supplied
    fn matches(&self, metric_name: &str, context: &Context) -> bool {
        self.metric_name == metric_name
            && context
                .schedule_id
                .map_or(true, |id| self.schedule_id == id)
            && context
                .workflow_id
                .as_ref()
                .map_or(true, |id| &self.workflow_id == id)
            && context
                .workflow_version_id
                .as_ref()
                .map_or(true, |id| &self.workflow_version_id == id)
            && context
                .execution_id
                .map_or(true, |id| self.execution_id == id)
            && context.task_id.map_or(true, |id| self.task_id == id)
    }

    fn export_context(&self) -> ExportContext {
        ExportContext {
            schedule_id: self.schedule_id,
            workflow_id: self.workflow_id.clone(),
            workflow_version_id: self.workflow_version_id.clone(),
            execution_id: self.execution_id,
            task_id: self.task_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum IdScope {
    Execution,
    Schedule,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Snapshots per key, ordered by ascending index
    snapshots: HashMap<StoreKey, Vec<Snapshot>>,
    start_times: HashMap<StoreKey, TimestampMs>,
    last_ids: HashMap<(String, IdScope), i64>,
}

/// In-memory [`MetricStore`]
#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    state: RwLock<StoreState>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_metric_name(metric_name: &str) -> MetricsResult<()> {
    if metric_name.is_empty() {
        return Err(MetricsError::invalid_key("Metric name should not be empty"));
    }
    Ok(())
}

/// Reject ids that collide with the placeholder values used to complete
/// write keys
fn check_no_placeholder_ids(context: &Context) -> MetricsResult<()> {
    let conflict = |option: &str, value: String| {
        Err(MetricsError::invalid_key(format!(
            "Assignment of option {option} should not be {value}"
        )))
    };
    if context.schedule_id == Some(PLACEHOLDER_ID) {
        return conflict("scheduleId", PLACEHOLDER_ID.to_string());
    }
    if context.workflow_id.as_deref() == Some(PLACEHOLDER_NAME) {
        return conflict("workflowId", format!("\"{PLACEHOLDER_NAME}\""));
    }
    if context.workflow_version_id.as_deref() == Some(PLACEHOLDER_NAME) {
        return conflict("workflowVersionId", format!("\"{PLACEHOLDER_NAME}\""));
    }
    if context.execution_id == Some(PLACEHOLDER_ID) {
        return conflict("executionId", PLACEHOLDER_ID.to_string());
    }
    if context.task_id == Some(PLACEHOLDER_ID) {
        return conflict("taskId", PLACEHOLDER_ID.to_string());
    }
    Ok(())
}

fn check_write_key(metric_name: &str, context: &Context) -> MetricsResult<()> {
    check_metric_name(metric_name)?;
    check_no_placeholder_ids(context)
}

#[async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn get_last_snapshot(
        &self,
        metric_name: &str,
        context: &Context,
    ) -> MetricsResult<Option<Snapshot>> {
        let state = self.state.read().await;
        let last = state
            .snapshots
            .iter()
            .filter(|(key, _)| key.matches(metric_name, context))
            .flat_map(|(_, snapshots)| snapshots.iter())
            .max_by_key(|snapshot| snapshot.index)
            .cloned();
        Ok(last)
    }

    async fn get_snapshots(
        &self,
        metric_name: &str,
        context: &Context,
    ) -> MetricsResult<Vec<Snapshot>> {
        let state = self.state.read().await;
        let mut snapshots: Vec<Snapshot> = state
            .snapshots
            .iter()
            .filter(|(key, _)| key.matches(metric_name, context))
            .flat_map(|(_, snapshots)| snapshots.iter().cloned())
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.index);
        Ok(snapshots)
    }

    async fn get_snapshots_within_time_frame(
        &self,
        metric_name: &str,
        context: &Context,
        start: TimestampMs,
        end: TimestampMs,
    ) -> MetricsResult<Vec<Snapshot>> {
        let all = self.get_snapshots(metric_name, context).await?;
        let mut selected = Vec::new();
        for snapshot in all {
            let timestamp = snapshot
                .start_of_measurement
                .ok_or(MetricsError::SnapshotWithoutTimestamp)?;
            if timestamp >= start && timestamp < end {
                selected.push(snapshot);
            }
        }
        Ok(selected)
    }

    async fn get_snapshot_count(
        &self,
        metric_name: &str,
        context: &Context,
    ) -> MetricsResult<usize> {
        let state = self.state.read().await;
        Ok(state
            .snapshots
            .iter()
            .filter(|(key, _)| key.matches(metric_name, context))
            .map(|(_, snapshots)| snapshots.len())
            .sum())
    }

    async fn store_new_snapshot(
        &self,
        metric_name: &str,
        context: &Context,
        snapshot: Snapshot,
    ) -> MetricsResult<()> {
        check_write_key(metric_name, context)?;
        let key = StoreKey::new(metric_name, context);
        let mut state = self.state.write().await;
        let snapshots = state.snapshots.entry(key).or_default();
        if snapshots.iter().any(|stored| stored.index == snapshot.index) {
            return Err(MetricsError::storage(format!(
                "snapshot with index {} already exists for metric \"{metric_name}\"",
                snapshot.index
            )));
        }
        snapshots.push(snapshot);
        snapshots.sort_by_key(|snapshot| snapshot.index);
        Ok(())
    }

    async fn overwrite_snapshot(
        &self,
        metric_name: &str,
        context: &Context,
        snapshot: Snapshot,
    ) -> MetricsResult<()> {
        check_write_key(metric_name, context)?;
        let key = StoreKey::new(metric_name, context);
        let mut state = self.state.write().await;
        if let Some(snapshots) = state.snapshots.get_mut(&key) {
            if let Some(stored) = snapshots
                .iter_mut()
                .find(|stored| stored.index == snapshot.index)
            {
                *stored = snapshot;
            }
        }
        Ok(())
    }

    async fn remove_oldest_snapshot(
        &self,
        metric_name: &str,
        context: &Context,
    ) -> MetricsResult<()> {
        check_write_key(metric_name, context)?;
        let mut state = self.state.write().await;
        let oldest = state
            .snapshots
            .iter()
            .filter(|(key, _)| key.matches(metric_name, context))
            .flat_map(|(key, snapshots)| {
                snapshots.iter().map(move |snapshot| (key.clone(), snapshot.index))
            })
            .min_by_key(|(_, index)| *index);
        let Some((key, index)) = oldest else {
            return Err(MetricsError::NoSnapshots);
        };
        if let Some(snapshots) = state.snapshots.get_mut(&key) {
            snapshots.retain(|snapshot| snapshot.index != index);
            if snapshots.is_empty() {
                state.snapshots.remove(&key);
            }
        }
        Ok(())
    }

    async fn delete_snapshots(&self, metric_name: &str) -> MetricsResult<()> {
        check_metric_name(metric_name)?;
        debug!(metric = metric_name, "deleting all snapshots");
        let mut state = self.state.write().await;
        state
            .snapshots
            .retain(|key, _| key.metric_name != metric_name);
        Ok(())
    }

    async fn store_start_time(
        &self,
        metric_name: &str,
        context: &Context,
        start_time: TimestampMs,
    ) -> MetricsResult<()> {
        check_write_key(metric_name, context)?;
        let key = StoreKey::new(metric_name, context);
        let mut state = self.state.write().await;
        if state.start_times.contains_key(&key) {
            return Err(MetricsError::StartTimeExists {
                metric: metric_name.to_string(),
            });
        }
        state.start_times.insert(key, start_time);
        Ok(())
    }

    async fn get_start_time(
        &self,
        metric_name: &str,
        context: &Context,
    ) -> MetricsResult<Option<TimestampMs>> {
        let state = self.state.read().await;
        Ok(state
            .start_times
            .iter()
            .find(|(key, _)| key.matches(metric_name, context))
            .map(|(_, start_time)| *start_time))
    }

    async fn clear_start_time(
        &self,
        metric_name: &str,
        context: &Context,
    ) -> MetricsResult<()> {
        check_metric_name(metric_name)?;
        check_no_placeholder_ids(context)?;
        let mut state = self.state.write().await;
        state
            .start_times
            .retain(|key, _| !key.matches(metric_name, context));
        Ok(())
    }

    async fn new_execution_id(&self, workflow_id: &str) -> MetricsResult<i64> {
        self.next_id(workflow_id.to_string(), IdScope::Execution).await
    }

    async fn new_schedule_id(&self) -> MetricsResult<i64> {
        self.next_id("schedule".to_string(), IdScope::Schedule).await
    }

    async fn export_snapshots(
        &self,
        metric_names: &[String],
    ) -> MetricsResult<Vec<SnapshotExport>> {
        let state = self.state.read().await;
        let mut rows: Vec<SnapshotExport> = state
            .snapshots
            .iter()
            .filter(|(key, _)| metric_names.iter().any(|name| *name == key.metric_name))
            .flat_map(|(key, snapshots)| {
                snapshots.iter().map(move |snapshot| SnapshotExport {
                    metric_name: key.metric_name.clone(),
                    context: key.export_context(),
                    snapshot: snapshot.clone(),
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            (&a.metric_name, a.snapshot.index).cmp(&(&b.metric_name, b.snapshot.index))
        });
        Ok(rows)
    }
}

impl InMemoryMetricStore {
    async fn next_id(&self, name: String, scope: IdScope) -> MetricsResult<i64> {
        let mut state = self.state.write().await;
        let entry = state.last_ids.entry((name, scope));
        let id = entry
            .and_modify(|last| *last += 1)
            .or_insert(0);
        Ok(*id)
    }
}
