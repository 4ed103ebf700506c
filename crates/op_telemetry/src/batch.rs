//! Batches of telemetry records awaiting export.

use crate::logs::LogRecord;
use crate::metrics::MetricPoint;
use crate::span::Span;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::SystemTime;

/// Ordered collection of records of one signal.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub created_at: SystemTime,
}

impl<T> Batch<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            created_at: SystemTime::now(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            created_at: SystemTime::now(),
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> From<Vec<T>> for Batch<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            items,
            created_at: SystemTime::now(),
        }
    }
}

/// The three telemetry signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Metrics,
    Spans,
    Logs,
}

impl Signal {
    /// OTLP/HTTP path below the collector endpoint.
    pub fn path(self) -> &'static str {
        match self {
            Self::Metrics => "v1/metrics",
            Self::Spans => "v1/traces",
            Self::Logs => "v1/logs",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::Spans => "spans",
            Self::Logs => "logs",
        }
    }
}

/// Unit of work handed to an exporter.
#[derive(Debug, Clone)]
pub enum TelemetryBatch {
    Metrics(Batch<MetricPoint>),
    Spans(Batch<Span>),
    Logs(Batch<LogRecord>),
}

impl TelemetryBatch {
    pub fn signal(&self) -> Signal {
        match self {
            Self::Metrics(_) => Signal::Metrics,
            Self::Spans(_) => Signal::Spans,
            Self::Logs(_) => Signal::Logs,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Metrics(b) => b.len(),
            Self::Spans(b) => b.len(),
            Self::Logs(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of appending to a [`BatchBuffer`].
#[derive(Debug)]
pub(crate) enum Push<T> {
    /// Appended; the batch is still below the cap.
    Buffered,
    /// Appended and the batch reached the cap; the caller owns the full batch.
    Sealed(Batch<T>),
    /// The pipeline no longer accepts records.
    Rejected,
}

/// Lock-protected pending batch of one signal.
///
/// The lock is held only for an append or a swap, never across an await.
#[derive(Debug)]
pub(crate) struct BatchBuffer<T> {
    pending: Mutex<Batch<T>>,
    limit: usize,
}

impl<T> BatchBuffer<T> {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            pending: Mutex::new(Batch::new()),
            limit: limit.max(1),
        }
    }

    /// Appends one record. `accepting` is read under the lock so a record
    /// either lands before the shutdown drain takes the batch or is rejected.
    pub(crate) fn push(&self, item: T, accepting: &AtomicBool) -> Push<T> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !accepting.load(Ordering::Acquire) {
            return Push::Rejected;
        }
        pending.push(item);
        if pending.len() >= self.limit {
            Push::Sealed(std::mem::take(&mut *pending))
        } else {
            Push::Buffered
        }
    }

    /// Swaps the pending batch for an empty one.
    pub(crate) fn take(&self) -> Option<Batch<T>> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut *pending))
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
