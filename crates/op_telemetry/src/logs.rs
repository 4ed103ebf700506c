//! Structured log records correlated with spans.

use crate::attribute::Attributes;
use crate::pipeline::PipelineHandle;
use crate::span::unix_nanos;
use crate::stats::PipelineStats;
use crate::trace::SpanContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Log severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    /// OTLP `SeverityNumber`.
    pub fn number(self) -> u8 {
        match self {
            Self::Debug => 5,
            Self::Info => 9,
            Self::Warn => 13,
            Self::Error => 17,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log severity `{0}`")]
pub struct ParseSeverityError(String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

/// An immutable log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Unix nanoseconds
    pub timestamp: u64,
    pub severity: Severity,
    pub message: String,
    pub attributes: Attributes,
    pub trace_id: Option<u128>,
    pub span_id: Option<u64>,
}

/// Emits log records onto the export pipeline.
///
/// Never fails: a record the pipeline refuses is discarded and counted in
/// `log_emit_failures`.
#[derive(Debug, Clone)]
pub struct LogEmitter {
    pipeline: PipelineHandle,
    stats: Arc<PipelineStats>,
    min_severity: Severity,
}

impl LogEmitter {
    pub fn new(pipeline: PipelineHandle, min_severity: Severity) -> Self {
        let stats = Arc::clone(pipeline.stats());
        Self {
            pipeline,
            stats,
            min_severity,
        }
    }

    pub fn min_severity(&self) -> Severity {
        self.min_severity
    }

    /// Whether a record of `severity` would be exported.
    pub fn enabled(&self, severity: Severity) -> bool {
        severity >= self.min_severity
    }

    pub fn log(
        &self,
        severity: Severity,
        message: impl Into<String>,
        attributes: Attributes,
        context: Option<&SpanContext>,
    ) {
        if !self.enabled(severity) {
            return;
        }
        let record = LogRecord {
            timestamp: unix_nanos(),
            severity,
            message: message.into(),
            attributes,
            trace_id: context.map(SpanContext::trace_id),
            span_id: context.map(SpanContext::span_id),
        };
        if self.pipeline.push_log(record).is_err() {
            self.stats.record_log_emit_failure();
        }
    }

    pub fn debug(&self, message: impl Into<String>, attributes: Attributes, context: Option<&SpanContext>) {
        self.log(Severity::Debug, message, attributes, context);
    }

    pub fn info(&self, message: impl Into<String>, attributes: Attributes, context: Option<&SpanContext>) {
        self.log(Severity::Info, message, attributes, context);
    }

    pub fn warn(&self, message: impl Into<String>, attributes: Attributes, context: Option<&SpanContext>) {
        self.log(Severity::Warn, message, attributes, context);
    }

    pub fn error(&self, message: impl Into<String>, attributes: Attributes, context: Option<&SpanContext>) {
        self.log(Severity::Error, message, attributes, context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes;
    use crate::config::ExporterConfig;
    use crate::exporter::InMemoryExporter;
    use crate::pipeline::ExportPipeline;
    use crate::trace::SpanTracer;
    use std::time::Duration;

    fn setup(min: Severity) -> (ExportPipeline, LogEmitter, InMemoryExporter) {
        let exporter = InMemoryExporter::new();
        let config = ExporterConfig::default().with_flush_interval(Duration::from_secs(3600));
        let pipeline = ExportPipeline::start(
            &config,
            Arc::new(exporter.clone()),
            Arc::new(PipelineStats::new()),
        )
        .unwrap();
        let emitter = LogEmitter::new(pipeline.handle(), min);
        (pipeline, emitter, exporter)
    }

    #[test]
    fn test_parse_severity() {
        assert_eq!("WARNING".parse::<Severity>().unwrap(), Severity::Warn);
        assert_eq!(" info ".parse::<Severity>().unwrap(), Severity::Info);
        assert!("loud".parse::<Severity>().is_err());
        assert!(Severity::Error > Severity::Warn);
        assert_eq!(Severity::Error.number(), 17);
    }

    #[tokio::test]
    async fn test_log_carries_span_ids() {
        let (pipeline, emitter, exporter) = setup(Severity::Info);
        let tracer = SpanTracer::new(pipeline.handle());
        let span = tracer.start_span("list_users", Attributes::new(), None);
        let ctx = span.context();

        emitter.info("Fetching all users.", attributes! { "count" => 2 }, Some(&ctx));
        emitter.error("Database unavailable", Attributes::new(), None);
        drop(span);

        pipeline.force_flush().await.unwrap();
        let logs = exporter.logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].trace_id, Some(ctx.trace_id()));
        assert_eq!(logs[0].span_id, Some(ctx.span_id()));
        assert_eq!(logs[1].trace_id, None);
        assert_eq!(logs[1].severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_below_minimum_is_skipped() {
        let (pipeline, emitter, exporter) = setup(Severity::Warn);
        emitter.debug("noise", Attributes::new(), None);
        emitter.info("noise", Attributes::new(), None);
        emitter.warn("kept", Attributes::new(), None);

        pipeline.force_flush().await.unwrap();
        assert_eq!(exporter.logs().len(), 1);
    }

    #[tokio::test]
    async fn test_emit_after_shutdown_is_counted() {
        let (pipeline, emitter, _exporter) = setup(Severity::Info);
        let stats = Arc::clone(emitter.pipeline.stats());
        pipeline.shutdown().await;

        emitter.info("too late", Attributes::new(), None);
        assert_eq!(stats.snapshot().log_emit_failures, 1);
    }
}
