//! Health check endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub version: &'static str,
}

/// `GET /health`, not instrumented.
pub fn health_routes(service_name: &str) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(Arc::<str>::from(service_name))
}

async fn health_check(State(service): State<Arc<str>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: service.to_string(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
