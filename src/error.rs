//! Error types for the metrics engine

use thiserror::Error;

/// Result type alias for metrics operations
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Unified error type for the metrics engine.
///
/// Validation errors are fatal and raised at metric construction; usage
/// errors are raised per call; store policy errors are raised by
/// [`MetricStore`](crate::store::MetricStore) implementations and propagate
/// unchanged (the engine performs no retries).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetricsError {
    /// A metric definition violated a construction-time constraint
    #[error("Validation failed for metric '{metric}': {reason}")]
    Validation { metric: String, reason: String },

    /// A record call named a record point the metric does not handle
    #[error("RecordPoint \"{point}\" is not handled by this metric")]
    UnknownRecordPoint { point: String },

    /// A clear call named a clear point the metric does not handle
    #[error("ClearPoint \"{point}\" is not handled by this metric")]
    UnknownClearPoint { point: String },

    /// The metric type has no value-accepting record operation
    #[error("recordValue is not supported by metric \"{metric}\"")]
    RecordValueUnsupported { metric: String },

    /// The supplied context lacks ids the definition requires
    #[error(
        "Not all assignments required by definition are supplied. Required: {required}; Supplied: {supplied}"
    )]
    MissingAssignments { required: String, supplied: String },

    /// A number metric without a constant needs an explicit value
    #[error("Value is needed for NumberMetric without constValue/constValueMap")]
    ValueRequired,

    /// An explicit value contradicted the declared constant
    #[error("Value is already provided by {field} definition")]
    ConstValueProvided { field: &'static str },

    /// The (trimmed) value is not integral but the metric type demands it
    #[error("Trimmed value does not fit into metric type \"{metric_type}\"")]
    IntegerRequired { metric_type: &'static str },

    /// A bucketed timestamp was needed to decide snapshot grouping
    #[error("No timestamp supplied, but it is required")]
    TimestampRequired,

    /// A duration stop arrived without a matching open start time
    #[error("startTime is null")]
    StartTimeMissing,

    /// Internal: merge was requested although no snapshot exists
    #[error("cannot merge into a missing snapshot")]
    MergeWithoutSnapshot,

    /// A snapshot lacks the helper fields its aggregate operation needs
    #[error("missing aggregate helpers for {operation} function")]
    MissingAggregateHelpers { operation: &'static str },

    /// Median has no incremental form
    #[error("median cannot be computed incrementally")]
    MedianNotIncremental,

    /// A meta-metric dependency check failed
    #[error("{message}")]
    Dependency { message: String },

    /// Registration attempted with an already-used metric name
    #[error("Metric \"{metric}\" has already been registered")]
    AlreadyRegistered { metric: String },

    /// Lookup of a metric that was never registered
    #[error("Metric \"{metric}\" is not registered")]
    NotRegistered { metric: String },

    /// A metric referenced dependencies that are not registered yet
    #[error(
        "Metric \"{metric}\" has unfulfilled dependencies (registration order matters): {missing}"
    )]
    UnfulfilledDependencies { metric: String, missing: String },

    /// Record/clear dispatch was called with a blank event name
    #[error("event point should be a non-empty string")]
    EmptyEventPoint,

    /// An open interval already exists for this (metric, context) key
    #[error("start time for metric \"{metric}\" already exists")]
    StartTimeExists { metric: String },

    /// Eviction was requested but the context holds no snapshots
    #[error("no snapshots stored for the given context")]
    NoSnapshots,

    /// A time-frame query hit a snapshot without a timestamp
    #[error("expected snapshot to have a timestamp, but it has none")]
    SnapshotWithoutTimestamp,

    /// A store key carried a reserved placeholder or was malformed
    #[error("{message}")]
    InvalidStoreKey { message: String },

    /// Backend-specific persistence failure
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl MetricsError {
    /// Create a validation error for the given metric
    pub fn validation(metric: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            metric: metric.into(),
            reason: reason.into(),
        }
    }

    /// Create a dependency error
    pub fn dependency(message: impl Into<String>) -> Self {
        Self::Dependency {
            message: message.into(),
        }
    }

    /// Create an invalid-key error
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidStoreKey {
            message: message.into(),
        }
    }

    /// Create a generic storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// True for errors raised by definition validation
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}
