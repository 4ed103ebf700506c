//! Command line and environment settings.

use clap::{Parser, ValueEnum};
use op_telemetry::{
    ConfigError, ExporterConfig, NullExporter, OtlpHttpExporter, StdoutExporter,
    TelemetryExporterBoxed,
};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Which service to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServiceKind {
    /// Task dispatch API in front of the task queue
    Tasks,
    /// User CRUD API in front of the user table
    Users,
}

impl ServiceKind {
    /// `service.name` used when `OTEL_SERVICE_NAME` is not set.
    pub fn default_service_name(self) -> &'static str {
        match self {
            Self::Tasks => "task-service",
            Self::Users => "user-service",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tasks => f.write_str("tasks"),
            Self::Users => f.write_str("users"),
        }
    }
}

/// Where telemetry goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExporterKind {
    /// OTLP/HTTP JSON to the configured collector
    Otlp,
    /// One JSON line per record on stdout
    Stdout,
    /// Discard everything
    None,
}

impl ExporterKind {
    pub fn build(self, config: &ExporterConfig) -> Result<Arc<dyn TelemetryExporterBoxed>, ConfigError> {
        Ok(match self {
            Self::Otlp => Arc::new(OtlpHttpExporter::new(config)?),
            Self::Stdout => Arc::new(StdoutExporter::new()),
            Self::None => Arc::new(NullExporter::new()),
        })
    }
}

/// Server settings, from flags or their environment fallbacks.
#[derive(Debug, Clone, Parser)]
#[command(name = "demo-services", version, about = "Instrumented task and user demo services")]
pub struct Settings {
    /// Service to run
    #[arg(value_enum, env = "DEMO_SERVICE")]
    pub service: ServiceKind,

    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Telemetry exporter
    #[arg(long, value_enum, env = "DEMO_EXPORTER", default_value_t = ExporterKind::Otlp)]
    pub exporter: ExporterKind,
}

impl Settings {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Exporter configuration for this service: per-service defaults, then
    /// the `OTEL_*` environment.
    pub fn exporter_config(&self) -> Result<ExporterConfig, ConfigError> {
        ExporterConfig::default()
            .with_service_name(self.service.default_service_name())
            .apply_env()
    }
}
