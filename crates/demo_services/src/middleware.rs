//! HTTP instrumentation hook.

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use op_telemetry::{Operation, SpanKind, Telemetry};

/// Records every routed request as one `http_request` server span plus the
/// request count and duration, tagged with method, route and status code.
///
/// The request's [`SpanContext`](op_telemetry::SpanContext) is put into the
/// request extensions so handlers can parent their own spans on it. Install
/// with `route_layer` so the matched route template is available.
pub async fn instrument_http(
    State(telemetry): State<Telemetry>,
    mut request: Request,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path().to_string(), |m| m.as_str().to_string());
    let method = request.method().as_str().to_string();

    let mut guard = telemetry
        .instrumentation
        .begin(Operation::new("http_request").kind(SpanKind::Server));
    // Route and method go on the span and on the request metrics.
    guard.tag("http.method", method);
    guard.tag("http.route", route);
    request.extensions_mut().insert(guard.context());

    let response = next.run(request).await;

    let status = response.status();
    guard.tag("http.status_code", status.as_u16());
    if status.is_client_error() || status.is_server_error() {
        let kind = if status.is_server_error() {
            "server_error"
        } else {
            "client_error"
        };
        guard.fail_with(kind, status.canonical_reason().unwrap_or(status.as_str()));
    } else {
        guard.succeed();
    }
    response
}
