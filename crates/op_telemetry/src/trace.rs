//! Span creation and lifecycle.
//!
//! The current span is never looked up ambiently. Callers pass a
//! [`SpanContext`] explicitly to create children and to correlate logs.
//! A context holds only a weak reference to the live span, so it never keeps
//! a span open.

use crate::attribute::{AttributeValue, Attributes};
use crate::error::InstrumentationError;
use crate::pipeline::PipelineHandle;
use crate::span::{new_span_id, new_trace_id, Span, SpanKind, SpanStatus};
use crate::stats::PipelineStats;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Liveness shared between a span handle, its contexts and its children.
#[derive(Debug, Default)]
struct SpanNode {
    open_children: AtomicUsize,
    ended: AtomicBool,
}

/// Identifiers of a span plus a non-owning link to it.
#[derive(Debug, Clone)]
pub struct SpanContext {
    trace_id: u128,
    span_id: u64,
    node: Weak<SpanNode>,
}

impl SpanContext {
    pub fn trace_id(&self) -> u128 {
        self.trace_id
    }

    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// True while the span is open.
    pub fn is_recording(&self) -> bool {
        self.node
            .upgrade()
            .is_some_and(|node| !node.ended.load(Ordering::Acquire))
    }
}

#[derive(Debug, Default)]
struct TracerCounters {
    open: AtomicU64,
    started: AtomicU64,
    ended: AtomicU64,
    orphaned_children: AtomicU64,
}

#[derive(Debug)]
struct TracerShared {
    pipeline: PipelineHandle,
    stats: Arc<PipelineStats>,
    counters: TracerCounters,
}

/// Creates spans and queues them for export when they end.
#[derive(Debug, Clone)]
pub struct SpanTracer {
    shared: Arc<TracerShared>,
}

impl SpanTracer {
    pub fn new(pipeline: PipelineHandle) -> Self {
        let stats = Arc::clone(pipeline.stats());
        Self {
            shared: Arc::new(TracerShared {
                pipeline,
                stats,
                counters: TracerCounters::default(),
            }),
        }
    }

    /// Opens an internal span. With a parent the span joins the parent's
    /// trace, otherwise it starts a new one.
    pub fn start_span(
        &self,
        name: impl Into<String>,
        attributes: Attributes,
        parent: Option<&SpanContext>,
    ) -> SpanHandle {
        self.start_span_with_kind(name, SpanKind::Internal, attributes, parent)
    }

    pub fn start_span_with_kind(
        &self,
        name: impl Into<String>,
        kind: SpanKind,
        attributes: Attributes,
        parent: Option<&SpanContext>,
    ) -> SpanHandle {
        let name = name.into();
        let (trace_id, parent_span_id, parent_node) = match parent {
            Some(ctx) => (ctx.trace_id, Some(ctx.span_id), ctx.node.clone()),
            None => (new_trace_id(), None, Weak::new()),
        };
        if let Some(node) = parent_node.upgrade() {
            node.open_children.fetch_add(1, Ordering::AcqRel);
        }

        let mut span = Span::new(trace_id, new_span_id(), parent_span_id, name.clone(), kind);
        span.attributes = attributes;

        let counters = &self.shared.counters;
        counters.open.fetch_add(1, Ordering::Relaxed);
        counters.started.fetch_add(1, Ordering::Relaxed);

        SpanHandle {
            trace_id,
            span_id: span.span_id,
            name,
            span: Some(span),
            node: Arc::new(SpanNode::default()),
            parent: parent_node,
            tracer: Arc::clone(&self.shared),
        }
    }

    /// Spans started and not yet ended.
    pub fn open_spans(&self) -> u64 {
        self.shared.counters.open.load(Ordering::Relaxed)
    }

    pub fn spans_started(&self) -> u64 {
        self.shared.counters.started.load(Ordering::Relaxed)
    }

    pub fn spans_ended(&self) -> u64 {
        self.shared.counters.ended.load(Ordering::Relaxed)
    }

    /// Children that were still open when their parent ended.
    pub fn orphaned_children(&self) -> u64 {
        self.shared.counters.orphaned_children.load(Ordering::Relaxed)
    }
}

/// An open span. Ends exactly once: on [`end`](Self::end) or on drop.
#[derive(Debug)]
pub struct SpanHandle {
    trace_id: u128,
    span_id: u64,
    name: String,
    /// `None` once ended
    span: Option<Span>,
    node: Arc<SpanNode>,
    parent: Weak<SpanNode>,
    tracer: Arc<TracerShared>,
}

impl SpanHandle {
    pub fn context(&self) -> SpanContext {
        SpanContext {
            trace_id: self.trace_id,
            span_id: self.span_id,
            node: Arc::downgrade(&self.node),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ended(&self) -> bool {
        self.span.is_none()
    }

    pub fn set_attribute(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Result<(), InstrumentationError> {
        let span = self.open_span()?;
        span.set_attribute(key.into(), value.into());
        Ok(())
    }

    pub fn set_status(&mut self, status: SpanStatus) -> Result<(), InstrumentationError> {
        let span = self.open_span()?;
        span.status = status;
        if status != SpanStatus::Error {
            span.status_message = None;
        }
        Ok(())
    }

    /// Sets status `Error` with a description.
    pub fn set_error(&mut self, message: impl Into<String>) -> Result<(), InstrumentationError> {
        let span = self.open_span()?;
        span.status = SpanStatus::Error;
        span.status_message = Some(message.into());
        Ok(())
    }

    /// Closes the span and queues it for export. A second call does nothing.
    pub fn end(&mut self) {
        let Some(mut span) = self.span.take() else {
            return;
        };
        self.node.ended.store(true, Ordering::Release);

        let counters = &self.tracer.counters;
        let open_children = self.node.open_children.load(Ordering::Acquire);
        if open_children > 0 {
            counters
                .orphaned_children
                .fetch_add(open_children as u64, Ordering::Relaxed);
            tracing::warn!(span = %self.name, open_children, "span ended before its children");
        }
        if let Some(parent) = self.parent.upgrade() {
            parent.open_children.fetch_sub(1, Ordering::AcqRel);
        }

        span.finish();
        counters.open.fetch_sub(1, Ordering::Relaxed);
        counters.ended.fetch_add(1, Ordering::Relaxed);
        // Refusals are already counted as dropped by the pipeline
        let _ = self.tracer.pipeline.push_span(span);
    }

    fn open_span(&mut self) -> Result<&mut Span, InstrumentationError> {
        match self.span.as_mut() {
            Some(span) => Ok(span),
            None => {
                self.tracer.stats.record_misuse();
                Err(InstrumentationError::SpanClosed {
                    name: self.name.clone(),
                })
            }
        }
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        self.end();
    }
}
