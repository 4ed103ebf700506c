//! Instrumented demo services
//!
//! Two small HTTP services built on axum, each wrapped with `op_telemetry`:
//!
//! - `tasks`: dispatches `add` / `multiply` jobs to a task queue and reports
//!   their results, singly or as a group
//! - `users`: CRUD over a `users` table with business counters
//!
//! Every routed request becomes an `http_request` server span; queue and
//! store calls become child spans, and all of them feed the shared request
//! count and duration metrics.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod middleware;
pub mod tasks;
pub mod users;

pub use config::{ExporterKind, ServiceKind, Settings};
pub use error::AppError;

use anyhow::Result;
use axum::Router;
use op_telemetry::{InstrumentationError, Telemetry, TelemetryContext};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Router for `service` with in-memory collaborators, plus `/health`.
pub fn create_router(
    service: ServiceKind,
    service_name: &str,
    telemetry: &Telemetry,
) -> Result<Router, InstrumentationError> {
    let routes = match service {
        ServiceKind::Tasks => {
            tasks::router(telemetry.clone(), Arc::new(tasks::InMemoryTaskQueue::new()))
        }
        ServiceKind::Users => {
            users::router(telemetry.clone(), Arc::new(users::InMemoryUserStore::new()))?
        }
    };
    Ok(Router::new()
        .merge(health::health_routes(service_name))
        .merge(routes))
}

/// Starts telemetry, serves until Ctrl+C / SIGTERM, then drains telemetry.
pub async fn run(settings: Settings) -> Result<()> {
    let config = settings.exporter_config()?;
    let exporter = settings.exporter.build(&config)?;
    let ctx = TelemetryContext::start_with_exporter(config, exporter)?;

    let app = create_router(settings.service, &ctx.config().service_name, ctx.telemetry())?;
    let addr = settings.socket_addr();
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(
        service = %settings.service,
        %addr,
        exporter = ?settings.exporter,
        "listening for connections"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let stats = ctx.shutdown().await;
    tracing::info!(
        exported = stats.records_exported,
        dropped = stats.dropped_records,
        "server shutdown complete"
    );
    served?;
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}
