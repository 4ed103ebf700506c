//! Operation telemetry
//!
//! Wraps units of work (HTTP handlers, data-access calls, task-queue calls)
//! with request counters, duration histograms, spans and correlated log
//! records, and ships them to an OpenTelemetry collector through a batched,
//! periodically flushed pipeline. Export problems are counted and logged but
//! never reach the instrumented operation.
//!
//! ```no_run
//! use op_telemetry::{attributes, ExporterConfig, TelemetryContext};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = TelemetryContext::start(ExporterConfig::from_env()?)?;
//! let _user = ctx.instrumentation().wrap(
//!     "create_user",
//!     attributes! { "db.table" => "users" },
//!     None,
//!     |_span| Ok::<_, String>("alice"),
//! )?;
//! ctx.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! Exporters use native async fn in traits (`impl Future<...> + Send`); wrap
//! one in `Arc<dyn TelemetryExporterBoxed>` for dynamic dispatch.

pub mod attribute;
pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod exporter;
pub mod instrument;
pub mod logs;
pub mod metrics;
pub mod otlp;
pub mod pipeline;
pub mod retry;
pub mod span;
pub mod stats;
pub mod trace;

// Re-export main types
pub use attribute::{AttributeValue, Attributes};
pub use batch::{Batch, Signal, TelemetryBatch};
pub use config::{ExporterConfig, RetryPolicy};
pub use context::{Telemetry, TelemetryContext};
pub use error::{ConfigError, InstrumentationError, PipelineError, TelemetryError};
pub use exporter::{
    ExportError, InMemoryExporter, NullExporter, StdoutExporter, TelemetryExporter,
    TelemetryExporterBoxed,
};
pub use instrument::{ErrorKind, Instrumentation, Operation, OperationGuard};
pub use logs::{LogEmitter, LogRecord, Severity};
pub use metrics::{MetricDescriptor, MetricHandle, MetricKind, MetricPoint, MetricRegistry};
pub use otlp::OtlpHttpExporter;
pub use pipeline::{ExportPipeline, PipelineHandle, PushError};
pub use retry::RetryingExporter;
pub use span::{Span, SpanKind, SpanStatus};
pub use stats::{PipelineStats, StatsSnapshot};
pub use trace::{SpanContext, SpanHandle, SpanTracer};
