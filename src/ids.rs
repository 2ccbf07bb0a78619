//! Identity generation for execution contexts
//!
//! Thin façade over the store's monotonic counters, used by the embedding
//! application to mint the execution and schedule ids it later records
//! observations under.

use crate::error::MetricsResult;
use crate::store::MetricStore;
use std::sync::Arc;

/// Issues fresh execution and schedule ids
pub struct MetricIdGenerator {
    store: Arc<dyn MetricStore>,
}

impl MetricIdGenerator {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }

    /// Next execution id for the given workflow
    pub async fn new_execution_id(&self, workflow_id: &str) -> MetricsResult<i64> {
        self.store.new_execution_id(workflow_id).await
    }

    /// Next schedule id
    pub async fn new_schedule_id(&self) -> MetricsResult<i64> {
        self.store.new_schedule_id().await
    }
}
