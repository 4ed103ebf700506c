//! Shared setup for the API tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use demo_services::{create_router, ServiceKind};
use http_body_util::BodyExt;
use op_telemetry::{ExporterConfig, InMemoryExporter, Span, TelemetryContext};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub struct TestApp {
    pub router: Router,
    pub ctx: TelemetryContext,
    pub exporter: InMemoryExporter,
}

impl TestApp {
    pub fn start(service: ServiceKind) -> Self {
        let exporter = InMemoryExporter::new();
        let config = ExporterConfig::default()
            .with_service_name(service.default_service_name())
            .with_flush_interval(Duration::from_secs(3600));
        let ctx = TelemetryContext::start_with_exporter(config, Arc::new(exporter.clone())).unwrap();
        let router =
            create_router(service, service.default_service_name(), ctx.telemetry()).unwrap();
        Self {
            router,
            ctx,
            exporter,
        }
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send("GET", uri, None).await
    }

    pub async fn post(&self, uri: &str) -> (StatusCode, Value) {
        self.send("POST", uri, None).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send("POST", uri, Some(body)).await
    }

    pub async fn put_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send("PUT", uri, Some(body)).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send("DELETE", uri, None).await
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_string(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = tower::ServiceExt::oneshot(self.router.clone(), request)
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Exports everything recorded so far.
    pub async fn flush(&self) {
        self.ctx.force_flush().await.unwrap();
    }

    /// Flushes, then returns the exported spans named `name`.
    pub async fn spans(&self, name: &str) -> Vec<Span> {
        self.flush().await;
        self.exporter.spans_named(name)
    }
}

/// Children of `parent` among `spans`.
pub fn children_of<'a>(parent: &Span, spans: &'a [Span]) -> Vec<&'a Span> {
    spans
        .iter()
        .filter(|s| s.parent_span_id == Some(parent.span_id) && s.trace_id == parent.trace_id)
        .collect()
}
