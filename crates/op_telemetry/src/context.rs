//! Process-wide telemetry owner.

use crate::config::ExporterConfig;
use crate::error::{PipelineError, TelemetryError};
use crate::exporter::TelemetryExporterBoxed;
use crate::instrument::Instrumentation;
use crate::logs::LogEmitter;
use crate::metrics::MetricRegistry;
use crate::otlp::OtlpHttpExporter;
use crate::pipeline::ExportPipeline;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::trace::SpanTracer;
use std::sync::Arc;

/// Cloneable bundle handed to request handlers and data-access wrappers.
#[derive(Debug, Clone)]
pub struct Telemetry {
    pub metrics: MetricRegistry,
    pub tracer: SpanTracer,
    pub logs: LogEmitter,
    pub instrumentation: Instrumentation,
    pub stats: Arc<PipelineStats>,
}

/// Owns the export pipeline and the instruments built on it.
///
/// Created once at startup and consumed by [`shutdown`](Self::shutdown).
/// Dropping it without shutdown makes the worker drain on its own.
pub struct TelemetryContext {
    config: ExporterConfig,
    telemetry: Telemetry,
    pipeline: ExportPipeline,
}

impl TelemetryContext {
    /// Starts a context exporting to the OTLP/HTTP collector in `config`.
    pub fn start(config: ExporterConfig) -> Result<Self, TelemetryError> {
        let exporter = OtlpHttpExporter::new(&config)?;
        Self::start_with_exporter(config, Arc::new(exporter))
    }

    /// Starts a context with any exporter.
    pub fn start_with_exporter(
        config: ExporterConfig,
        exporter: Arc<dyn TelemetryExporterBoxed>,
    ) -> Result<Self, TelemetryError> {
        config.validate()?;
        let stats = Arc::new(PipelineStats::new());
        let pipeline = ExportPipeline::start(&config, exporter, Arc::clone(&stats))?;

        let metrics = MetricRegistry::new(pipeline.handle());
        let tracer = SpanTracer::new(pipeline.handle());
        let logs = LogEmitter::new(pipeline.handle(), config.min_log_severity);
        let instrumentation = Instrumentation::new(
            &metrics,
            tracer.clone(),
            logs.clone(),
            &config.metric_prefix(),
        )?;

        tracing::info!(
            service = %config.service_name,
            endpoint = %config.endpoint,
            "telemetry started"
        );

        Ok(Self {
            config,
            telemetry: Telemetry {
                metrics,
                tracer,
                logs,
                instrumentation,
                stats,
            },
            pipeline,
        })
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn metrics(&self) -> &MetricRegistry {
        &self.telemetry.metrics
    }

    pub fn tracer(&self) -> &SpanTracer {
        &self.telemetry.tracer
    }

    pub fn logs(&self) -> &LogEmitter {
        &self.telemetry.logs
    }

    pub fn instrumentation(&self) -> &Instrumentation {
        &self.telemetry.instrumentation
    }

    pub async fn force_flush(&self) -> Result<(), PipelineError> {
        self.pipeline.force_flush().await
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.pipeline.stats()
    }

    /// Records accepted but not yet exported or dropped.
    pub fn pending_records(&self) -> usize {
        self.pipeline.pending_records()
    }

    /// Drains pending telemetry within the grace period.
    pub async fn shutdown(self) -> StatsSnapshot {
        let snapshot = self.pipeline.shutdown().await;
        tracing::info!(
            exported = snapshot.records_exported,
            dropped = snapshot.dropped_records,
            "telemetry shut down"
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Attributes;
    use crate::exporter::InMemoryExporter;
    use std::time::Duration;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let exporter = InMemoryExporter::new();
        let config = ExporterConfig::default()
            .with_service_name("user-api")
            .with_flush_interval(Duration::from_secs(3600));
        let ctx = TelemetryContext::start_with_exporter(config, Arc::new(exporter.clone())).unwrap();

        let names: Vec<String> = ctx.metrics().instruments().iter().map(|d| d.name.to_string()).collect();
        assert_eq!(names, vec!["user_api_request_count", "user_api_request_duration"]);

        ctx.instrumentation()
            .wrap("noop", Attributes::new(), None, |_| Ok::<_, String>(()))
            .unwrap();

        let snapshot = ctx.shutdown().await;
        assert_eq!(exporter.spans_named("noop").len(), 1);
        assert!(snapshot.records_exported >= 4);
        assert_eq!(snapshot.dropped_records, 0);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_startup() {
        let config = ExporterConfig::default().with_max_batch_size(0);
        let result = TelemetryContext::start_with_exporter(config, Arc::new(InMemoryExporter::new()));
        assert!(matches!(result, Err(TelemetryError::Config(_))));
    }

    #[tokio::test]
    async fn test_otlp_start_validates_endpoint() {
        let config = ExporterConfig::default().with_endpoint("not a url");
        assert!(matches!(
            TelemetryContext::start(config),
            Err(TelemetryError::Config(_))
        ));
    }
}
