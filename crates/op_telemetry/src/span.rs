use crate::attribute::{AttributeValue, Attributes};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Represents a single distributed tracing span
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Unique trace identifier (128-bit, never zero)
    pub trace_id: u128,
    /// Unique span identifier (64-bit, never zero)
    pub span_id: u64,
    /// Parent span identifier (`None` for root spans)
    pub parent_span_id: Option<u64>,
    /// Operation name
    pub name: String,
    /// Span kind
    pub kind: SpanKind,
    /// Span start time (Unix nanoseconds)
    pub start_time: u64,
    /// Span end time (Unix nanoseconds), `None` while the span is open
    pub end_time: Option<u64>,
    /// Span attributes
    pub attributes: Attributes,
    /// Span status
    pub status: SpanStatus,
    /// Optional description accompanying an `Error` status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

/// Span execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanStatus {
    /// Span status unknown
    Unset,
    /// Span completed successfully
    Ok,
    /// Span completed with error
    Error,
}

/// Span kind according to OpenTelemetry specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    /// Internal operation span
    Internal,
    /// Server-side RPC span
    Server,
    /// Client-side RPC span
    Client,
    /// Producer span (messaging)
    Producer,
    /// Consumer span (messaging)
    Consumer,
}

impl SpanKind {
    /// OTLP `SpanKind` enum value.
    pub fn otlp_code(self) -> u8 {
        match self {
            Self::Internal => 1,
            Self::Server => 2,
            Self::Client => 3,
            Self::Producer => 4,
            Self::Consumer => 5,
        }
    }
}

impl SpanStatus {
    /// OTLP `StatusCode` enum value.
    pub fn otlp_code(self) -> u8 {
        match self {
            Self::Unset => 0,
            Self::Ok => 1,
            Self::Error => 2,
        }
    }
}

impl Span {
    /// Creates a new open span starting now
    pub fn new(
        trace_id: u128,
        span_id: u64,
        parent_span_id: Option<u64>,
        name: String,
        kind: SpanKind,
    ) -> Self {
        Self {
            trace_id,
            span_id,
            parent_span_id,
            name,
            kind,
            start_time: unix_nanos(),
            end_time: None,
            attributes: Attributes::new(),
            status: SpanStatus::Unset,
            status_message: None,
        }
    }

    /// Stamps the end time. A wall clock that stepped backwards still yields
    /// `end_time >= start_time`.
    pub fn finish(&mut self) {
        self.end_time = Some(unix_nanos().max(self.start_time));
    }

    /// Adds an attribute to the span
    pub fn set_attribute(&mut self, key: String, value: AttributeValue) {
        self.attributes.insert(key, value);
    }

    /// Returns true once `finish` has been called
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    /// Duration of the span in nanoseconds (zero while open)
    pub fn duration_nanos(&self) -> u64 {
        self.end_time
            .map_or(0, |end| end.saturating_sub(self.start_time))
    }
}

/// Current wall-clock time as Unix nanoseconds.
pub(crate) fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64)
}

pub(crate) fn new_trace_id() -> u128 {
    rand::thread_rng().gen_range(1..=u128::MAX)
}

pub(crate) fn new_span_id() -> u64 {
    rand::thread_rng().gen_range(1..=u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_sets_end_time() {
        let mut span = Span::new(1, 2, None, "op".into(), SpanKind::Internal);
        assert!(!span.is_finished());
        assert_eq!(span.duration_nanos(), 0);

        span.finish();
        assert!(span.is_finished());
        assert!(span.end_time.unwrap() >= span.start_time);
    }

    #[test]
    fn test_ids_are_non_zero() {
        for _ in 0..1000 {
            assert_ne!(new_trace_id(), 0);
            assert_ne!(new_span_id(), 0);
        }
    }

    #[test]
    fn test_otlp_codes() {
        assert_eq!(SpanKind::Server.otlp_code(), 2);
        assert_eq!(SpanStatus::Error.otlp_code(), 2);
        assert_eq!(SpanStatus::Unset.otlp_code(), 0);
    }
}
