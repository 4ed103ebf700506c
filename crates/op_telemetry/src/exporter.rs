use crate::attribute::AttributeValue;
use crate::batch::TelemetryBatch;
use crate::logs::LogRecord;
use crate::metrics::MetricPoint;
use crate::span::Span;
use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Error types for telemetry export operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExportError {
    /// Transport-layer error (connection refused, reset, retryable HTTP status)
    #[error("transport error: {0}")]
    Transport(String),
    /// Export operation timed out
    #[error("export operation timed out")]
    Timeout,
    /// Collector refused the payload
    #[error("collector rejected batch with status {status}: {message}")]
    Rejected { status: u16, message: String },
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
    /// All retry attempts exhausted
    #[error("all retry attempts exhausted after {attempts} tries")]
    RetriesExhausted { attempts: u32 },
}

impl ExportError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }
}

/// Trait for exporting telemetry batches to various backends.
///
/// Uses `impl Future` return types, which are not object-safe. For dynamic
/// dispatch use [`TelemetryExporterBoxed`].
pub trait TelemetryExporter: Send + Sync {
    /// Exports one batch.
    fn export(&self, batch: TelemetryBatch)
        -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Returns the exporter name for debugging.
    fn name(&self) -> &str;

    /// Removes records this exporter can never send. Called once per batch
    /// before the first attempt, so each removed record is counted once.
    fn prepare(&self, batch: TelemetryBatch) -> TelemetryBatch {
        batch
    }

    /// Records this exporter dropped because they could not be serialized.
    fn skipped_records(&self) -> u64 {
        0
    }
}

/// Object-safe version of [`TelemetryExporter`].
pub trait TelemetryExporterBoxed: Send + Sync {
    /// Exports one batch (boxed future for object safety).
    fn export_boxed(
        &self,
        batch: TelemetryBatch,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>>;

    /// Returns the exporter name for debugging.
    fn name(&self) -> &str;

    fn prepare_boxed(&self, batch: TelemetryBatch) -> TelemetryBatch;

    fn skipped_records(&self) -> u64;
}

/// Blanket implementation: any TelemetryExporter can be used as TelemetryExporterBoxed
impl<T: TelemetryExporter> TelemetryExporterBoxed for T {
    fn export_boxed(
        &self,
        batch: TelemetryBatch,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>> {
        Box::pin(self.export(batch))
    }

    fn name(&self) -> &str {
        TelemetryExporter::name(self)
    }

    fn prepare_boxed(&self, batch: TelemetryBatch) -> TelemetryBatch {
        self.prepare(batch)
    }

    fn skipped_records(&self) -> u64 {
        TelemetryExporter::skipped_records(self)
    }
}

/// Shared trait objects can be wrapped again (e.g. by the retry layer).
impl<'a> TelemetryExporter for Arc<dyn TelemetryExporterBoxed + 'a> {
    fn export(
        &self,
        batch: TelemetryBatch,
    ) -> impl Future<Output = Result<(), ExportError>> + Send {
        (**self).export_boxed(batch)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn prepare(&self, batch: TelemetryBatch) -> TelemetryBatch {
        (**self).prepare_boxed(batch)
    }

    fn skipped_records(&self) -> u64 {
        (**self).skipped_records()
    }
}

// ============================================================================
// Stdout
// ============================================================================

/// Writes every record as one JSON line on stdout.
#[derive(Debug, Default)]
pub struct StdoutExporter {
    skipped: AtomicU64,
}

impl StdoutExporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_lines<T: serde::Serialize>(&self, signal: &str, items: &[T]) -> Result<(), ExportError> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for item in items {
            match serde_json::to_string(item) {
                Ok(json) => writeln!(out, "{{\"signal\":\"{signal}\",\"record\":{json}}}")
                    .map_err(|e| ExportError::Transport(e.to_string()))?,
                Err(e) => {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(signal, error = %e, "skipping record that cannot be serialized");
                }
            }
        }
        out.flush().map_err(|e| ExportError::Transport(e.to_string()))
    }
}

impl TelemetryExporter for StdoutExporter {
    async fn export(&self, batch: TelemetryBatch) -> Result<(), ExportError> {
        match &batch {
            TelemetryBatch::Metrics(b) => self.write_lines("metrics", &b.items),
            TelemetryBatch::Spans(b) => self.write_lines("spans", &b.items),
            TelemetryBatch::Logs(b) => self.write_lines("logs", &b.items),
        }
    }

    fn name(&self) -> &str {
        "stdout"
    }

    fn skipped_records(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Null
// ============================================================================

/// Null exporter that discards everything (for benchmarking)
#[derive(Debug, Default)]
pub struct NullExporter;

impl NullExporter {
    pub fn new() -> Self {
        Self
    }
}

impl TelemetryExporter for NullExporter {
    async fn export(&self, _batch: TelemetryBatch) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
struct Recorded {
    metrics: Vec<MetricPoint>,
    spans: Vec<Span>,
    logs: Vec<LogRecord>,
    batches: usize,
}

/// Keeps every exported record in memory for inspection.
///
/// Clones share the same storage, so one clone can be handed to the pipeline
/// and another kept for assertions.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExporter {
    recorded: Arc<Mutex<Recorded>>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_recorded<R>(&self, f: impl FnOnce(&Recorded) -> R) -> R {
        f(&self.recorded.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn spans(&self) -> Vec<Span> {
        self.with_recorded(|r| r.spans.clone())
    }

    pub fn spans_named(&self, name: &str) -> Vec<Span> {
        self.with_recorded(|r| r.spans.iter().filter(|s| s.name == name).cloned().collect())
    }

    pub fn metric_points(&self) -> Vec<MetricPoint> {
        self.with_recorded(|r| r.metrics.clone())
    }

    pub fn logs(&self) -> Vec<LogRecord> {
        self.with_recorded(|r| r.logs.clone())
    }

    /// Number of batches received.
    pub fn batch_count(&self) -> usize {
        self.with_recorded(|r| r.batches)
    }

    /// Sum of exported values of metric `name` whose attributes contain all
    /// of `matching`.
    pub fn metric_total(&self, name: &str, matching: &[(&str, AttributeValue)]) -> f64 {
        self.with_recorded(|r| {
            r.metrics
                .iter()
                .filter(|p| &*p.name == name)
                .filter(|p| {
                    matching
                        .iter()
                        .all(|(key, value)| p.attributes.get(*key) == Some(value))
                })
                .map(|p| p.value)
                .sum()
        })
    }

    pub fn clear(&self) {
        let mut recorded = self.recorded.lock().unwrap_or_else(PoisonError::into_inner);
        *recorded = Recorded::default();
    }
}

impl TelemetryExporter for InMemoryExporter {
    async fn export(&self, batch: TelemetryBatch) -> Result<(), ExportError> {
        let mut recorded = self.recorded.lock().unwrap_or_else(PoisonError::into_inner);
        recorded.batches += 1;
        match batch {
            TelemetryBatch::Metrics(b) => recorded.metrics.extend(b.items),
            TelemetryBatch::Spans(b) => recorded.spans.extend(b.items),
            TelemetryBatch::Logs(b) => recorded.logs.extend(b.items),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
