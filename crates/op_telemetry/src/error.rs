//! Error types for the telemetry layer.
//!
//! Export failures live next to the exporter trait in [`crate::exporter`].

use crate::metrics::MetricKind;
use thiserror::Error;

/// Misuse of the instrumentation API.
///
/// Returned by direct calls on registries and span handles. Inside
/// [`crate::Instrumentation`] these are counted and swallowed so the wrapped
/// operation never observes them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InstrumentationError {
    /// Metric name already registered with a different kind
    #[error("metric `{name}` is already registered as a {existing}, cannot register it as a {requested}")]
    DuplicateMetric {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },
    /// Negative or non-finite delta on a counter
    #[error("metric `{name}` rejected delta {delta}")]
    InvalidDelta { name: String, delta: f64 },
    /// `add` on a histogram or `record` on a counter
    #[error("metric `{name}` is a {kind} and does not support `{operation}`")]
    KindMismatch {
        name: String,
        kind: MetricKind,
        operation: &'static str,
    },
    /// Empty metric name
    #[error("metric name must not be empty")]
    InvalidName,
    /// Mutation of a span after `end()`
    #[error("span `{name}` is already closed")]
    SpanClosed { name: String },
}

/// Invalid exporter configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid collector endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    #[error("environment variable {var} has invalid value `{value}`")]
    InvalidEnv { var: &'static str, value: String },
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Errors from the export pipeline lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The pipeline worker needs a Tokio runtime
    #[error("export pipeline must be started inside a Tokio runtime")]
    NoRuntime,
    /// The worker has already stopped
    #[error("export pipeline is shut down")]
    Closed,
}

/// Startup errors for [`crate::TelemetryContext`].
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Instrumentation(#[from] InstrumentationError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
