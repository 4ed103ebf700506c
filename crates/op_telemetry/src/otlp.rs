//! OTLP/HTTP exporter with JSON encoding.
//!
//! Each batch becomes one `POST {endpoint}/v1/{metrics,traces,logs}` request
//! carrying a single resource (`service.name`) and a single instrumentation
//! scope. A record that cannot be encoded (non-finite float) is skipped and
//! counted; the rest of the batch is still sent.

use crate::attribute::{AttributeValue, Attributes};
use crate::batch::{Signal, TelemetryBatch};
use crate::config::ExporterConfig;
use crate::error::ConfigError;
use crate::exporter::{ExportError, TelemetryExporter};
use crate::logs::LogRecord;
use crate::metrics::{MetricKind, MetricPoint};
use crate::span::Span;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Instrumentation scope reported with every payload.
pub const SCOPE_NAME: &str = env!("CARGO_PKG_NAME");
const SCOPE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default explicit bucket bounds for histograms (milliseconds).
pub const DEFAULT_HISTOGRAM_BOUNDS: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0,
    7500.0, 10000.0,
];

/// `AGGREGATION_TEMPORALITY_DELTA`
const TEMPORALITY_DELTA: u8 = 1;

/// HTTP statuses the collector uses for "try again later".
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

/// Sends batches to an OpenTelemetry collector over HTTP.
#[derive(Debug)]
pub struct OtlpHttpExporter {
    client: reqwest::Client,
    endpoint: String,
    service_name: String,
    skipped: AtomicU64,
}

impl OtlpHttpExporter {
    pub fn new(config: &ExporterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.export_timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            service_name: config.service_name.clone(),
            skipped: AtomicU64::new(0),
        })
    }

    /// Full URL for one signal.
    pub fn url_for(&self, signal: Signal) -> String {
        format!("{}/{}", self.endpoint, signal.path())
    }

    /// Encodes a batch into its OTLP JSON request body. Returns `None` when
    /// every record was skipped.
    pub fn encode(&self, batch: &TelemetryBatch) -> Option<Value> {
        let (encoded, skipped) = match batch {
            TelemetryBatch::Metrics(b) => encode_metrics(&self.service_name, &b.items),
            TelemetryBatch::Spans(b) => encode_spans(&self.service_name, &b.items),
            TelemetryBatch::Logs(b) => encode_logs(&self.service_name, &b.items),
        };
        self.record_skipped(batch.signal(), skipped);
        encoded
    }

    fn record_skipped(&self, signal: Signal, skipped: u64) {
        if skipped > 0 {
            self.skipped.fetch_add(skipped, Ordering::Relaxed);
            tracing::warn!(
                signal = signal.as_str(),
                skipped,
                "skipped records that cannot be encoded"
            );
        }
    }
}

impl TelemetryExporter for OtlpHttpExporter {
    async fn export(&self, batch: TelemetryBatch) -> Result<(), ExportError> {
        let Some(body) = self.encode(&batch) else {
            return Ok(());
        };

        let response = self
            .client
            .post(self.url_for(batch.signal()))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExportError::Timeout
                } else {
                    ExportError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if is_retryable_status(status.as_u16()) {
            return Err(ExportError::Transport(format!("collector responded {status}")));
        }
        let message = response.text().await.unwrap_or_default();
        Err(ExportError::Rejected {
            status: status.as_u16(),
            message: message.chars().take(256).collect(),
        })
    }

    fn name(&self) -> &str {
        "otlp_http"
    }

    fn prepare(&self, mut batch: TelemetryBatch) -> TelemetryBatch {
        let before = batch.len();
        match &mut batch {
            TelemetryBatch::Metrics(b) => b.items.retain(|p| encode_data_point(p).is_ok()),
            TelemetryBatch::Spans(b) => b.items.retain(|s| encode_span(s).is_ok()),
            TelemetryBatch::Logs(b) => b.items.retain(|r| encode_log(r).is_ok()),
        }
        self.record_skipped(batch.signal(), (before - batch.len()) as u64);
        batch
    }

    fn skipped_records(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Encoding
// ============================================================================

fn resource(service_name: &str) -> Value {
    json!({
        "attributes": [{
            "key": "service.name",
            "value": { "stringValue": service_name }
        }]
    })
}

fn scope() -> Value {
    json!({ "name": SCOPE_NAME, "version": SCOPE_VERSION })
}

fn encode_value(key: &str, value: &AttributeValue) -> Result<Value, ExportError> {
    Ok(match value {
        AttributeValue::String(s) => json!({ "stringValue": s }),
        // int64 is a string in the protobuf JSON mapping
        AttributeValue::Int(i) => json!({ "intValue": i.to_string() }),
        AttributeValue::Float(f) if f.is_finite() => json!({ "doubleValue": f }),
        AttributeValue::Float(f) => {
            return Err(ExportError::Serialization(format!(
                "attribute `{key}` has non-finite value {f}"
            )))
        }
        AttributeValue::Bool(b) => json!({ "boolValue": b }),
    })
}

fn encode_attributes(attributes: &Attributes) -> Result<Vec<Value>, ExportError> {
    attributes
        .iter()
        .map(|(key, value)| Ok(json!({ "key": key, "value": encode_value(key, value)? })))
        .collect()
}

fn encode_span(span: &Span) -> Result<Value, ExportError> {
    let mut status = json!({ "code": span.status.otlp_code() });
    if let Some(message) = &span.status_message {
        status["message"] = json!(message);
    }
    let mut encoded = json!({
        "traceId": format!("{:032x}", span.trace_id),
        "spanId": format!("{:016x}", span.span_id),
        "name": span.name,
        "kind": span.kind.otlp_code(),
        "startTimeUnixNano": span.start_time.to_string(),
        "endTimeUnixNano": span.end_time.unwrap_or(span.start_time).to_string(),
        "attributes": encode_attributes(&span.attributes)?,
        "status": status,
    });
    if let Some(parent) = span.parent_span_id {
        encoded["parentSpanId"] = json!(format!("{parent:016x}"));
    }
    Ok(encoded)
}

fn encode_log(record: &LogRecord) -> Result<Value, ExportError> {
    let mut encoded = json!({
        "timeUnixNano": record.timestamp.to_string(),
        "observedTimeUnixNano": record.timestamp.to_string(),
        "severityNumber": record.severity.number(),
        "severityText": record.severity.as_str(),
        "body": { "stringValue": record.message },
        "attributes": encode_attributes(&record.attributes)?,
    });
    if let Some(trace_id) = record.trace_id {
        encoded["traceId"] = json!(format!("{trace_id:032x}"));
    }
    if let Some(span_id) = record.span_id {
        encoded["spanId"] = json!(format!("{span_id:016x}"));
    }
    Ok(encoded)
}

fn encode_data_point(point: &MetricPoint) -> Result<Value, ExportError> {
    if !point.value.is_finite() {
        return Err(ExportError::Serialization(format!(
            "metric `{}` has non-finite value {}",
            point.name, point.value
        )));
    }
    let attributes = encode_attributes(&point.attributes)?;
    let time = point.timestamp.to_string();
    Ok(match point.kind {
        MetricKind::Counter | MetricKind::UpDownCounter => json!({
            "attributes": attributes,
            "timeUnixNano": time,
            "asDouble": point.value,
        }),
        MetricKind::Histogram => {
            let bounds = &DEFAULT_HISTOGRAM_BOUNDS;
            let mut buckets = vec![0_u64; bounds.len() + 1];
            let index = bounds
                .iter()
                .position(|bound| point.value <= *bound)
                .unwrap_or(bounds.len());
            buckets[index] = 1;
            json!({
                "attributes": attributes,
                "timeUnixNano": time,
                "count": "1",
                "sum": point.value,
                "min": point.value,
                "max": point.value,
                "bucketCounts": buckets.iter().map(u64::to_string).collect::<Vec<_>>(),
                "explicitBounds": bounds.to_vec(),
            })
        }
    })
}

fn encode_metric(points: &[&MetricPoint], data_points: Vec<Value>) -> Value {
    let first = points[0];
    let mut metric = json!({
        "name": &*first.name,
        "description": &*first.description,
        "unit": &*first.unit,
    });
    match first.kind {
        MetricKind::Counter | MetricKind::UpDownCounter => {
            metric["sum"] = json!({
                "dataPoints": data_points,
                "aggregationTemporality": TEMPORALITY_DELTA,
                "isMonotonic": first.kind == MetricKind::Counter,
            });
        }
        MetricKind::Histogram => {
            metric["histogram"] = json!({
                "dataPoints": data_points,
                "aggregationTemporality": TEMPORALITY_DELTA,
            });
        }
    }
    metric
}

/// Encodes each record, dropping the ones that fail. Returns the encoded
/// values and how many were skipped.
fn encode_each<T>(
    items: &[T],
    encode: impl Fn(&T) -> Result<Value, ExportError>,
) -> (Vec<Value>, u64) {
    let mut skipped = 0;
    let encoded = items
        .iter()
        .filter_map(|item| match encode(item) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(error = %e, "dropping record");
                skipped += 1;
                None
            }
        })
        .collect();
    (encoded, skipped)
}

fn encode_spans(service_name: &str, spans: &[Span]) -> (Option<Value>, u64) {
    let (encoded, skipped) = encode_each(spans, encode_span);
    if encoded.is_empty() {
        return (None, skipped);
    }
    let body = json!({
        "resourceSpans": [{
            "resource": resource(service_name),
            "scopeSpans": [{ "scope": scope(), "spans": encoded }]
        }]
    });
    (Some(body), skipped)
}

fn encode_logs(service_name: &str, records: &[LogRecord]) -> (Option<Value>, u64) {
    let (encoded, skipped) = encode_each(records, encode_log);
    if encoded.is_empty() {
        return (None, skipped);
    }
    let body = json!({
        "resourceLogs": [{
            "resource": resource(service_name),
            "scopeLogs": [{ "scope": scope(), "logRecords": encoded }]
        }]
    });
    (Some(body), skipped)
}

fn encode_metrics(service_name: &str, points: &[MetricPoint]) -> (Option<Value>, u64) {
    let mut by_name: BTreeMap<&str, Vec<&MetricPoint>> = BTreeMap::new();
    for point in points {
        by_name.entry(&*point.name).or_default().push(point);
    }

    let mut skipped = 0;
    let mut metrics = Vec::with_capacity(by_name.len());
    for points in by_name.values() {
        let (data_points, dropped) = encode_each(points, |p| encode_data_point(p));
        skipped += dropped;
        if !data_points.is_empty() {
            metrics.push(encode_metric(points, data_points));
        }
    }
    if metrics.is_empty() {
        return (None, skipped);
    }
    let body = json!({
        "resourceMetrics": [{
            "resource": resource(service_name),
            "scopeMetrics": [{ "scope": scope(), "metrics": metrics }]
        }]
    });
    (Some(body), skipped)
}
