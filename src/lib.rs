//! Flowmetrics Core Library
//!
//! Embedded metrics recording and aggregation engine: metric definitions are
//! validated once, observations are tied to execution contexts
//! (schedule/workflow/execution/task), a bounded snapshot history is kept
//! per context, and aggregate statistics (mean, variance, min, max, sum,
//! median) are maintained incrementally without re-reading history.
//!
//! Persistence is abstract: the engine talks to a [`store::MetricStore`]
//! implementation; [`store::InMemoryMetricStore`] is bundled as the
//! reference backend.

pub mod aggregate;
pub mod clock;
pub mod context;
pub mod definition;
pub mod error;
pub mod ids;
pub mod metric;
pub mod recorder;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod time;

// Re-export commonly used types
pub use aggregate::AggregateOp;
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{AssignmentKind, Context};
pub use definition::{
    Aggregation, AggregationWindow, ConstValue, DurationMetricDefinition, HandleIncomplete,
    MetaMetricDefinition, MetricCommon, MetricDefinition, NumberKind,
    NumberMetricDefinition, SnapshotRetention,
};
pub use error::{MetricsError, MetricsResult};
pub use ids::MetricIdGenerator;
pub use metric::{create_metric, DurationMetric, MetaMetric, Metric, NumberMetric};
pub use recorder::MetricRecorder;
pub use registry::{MetricEvent, MetricRegistry};
pub use snapshot::{AggregateHelpers, Snapshot};
pub use store::{ExportContext, InMemoryMetricStore, MetricStore, SnapshotExport};
pub use time::{DurationAccuracy, DurationUnit, TimeAccuracy, TimestampMs};
