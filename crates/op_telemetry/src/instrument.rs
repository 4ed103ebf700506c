//! Operation instrumentation.
//!
//! [`Instrumentation::wrap`] and [`Instrumentation::wrap_async`] run a unit of
//! work inside a span, time it, and on completion record:
//!
//! - `<prefix>_request_count` +1 with `{operation, outcome[, error.kind]}`
//! - `<prefix>_request_duration` in milliseconds with the same attributes
//! - span status `Ok` or `Error` (with `error.kind` / `error.message`)
//! - an `Info` or `Error` log record correlated with the span
//!
//! Completion is recorded exactly once on every exit path. A panic or a
//! dropped future is recorded as `outcome=failure, error.kind=aborted`.
//! The work's own result is returned unchanged.

use crate::attribute::{AttributeValue, Attributes};
use crate::error::InstrumentationError;
use crate::logs::LogEmitter;
use crate::metrics::{MetricHandle, MetricRegistry};
use crate::span::{SpanKind, SpanStatus};
use crate::trace::{SpanContext, SpanHandle, SpanTracer};
use std::borrow::Cow;
use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

/// `error.kind` value for panics and cancelled futures.
pub const ABORTED: &str = "aborted";

/// Classifies an error for the `error.kind` attribute.
///
/// The default is the short name of the implementing type.
pub trait ErrorKind {
    fn error_kind(&self) -> Cow<'static, str> {
        Cow::Borrowed(short_type_name(std::any::type_name::<Self>()))
    }
}

/// `crate::module::Type<Arg>` -> `Type`
fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

impl ErrorKind for std::io::Error {
    fn error_kind(&self) -> Cow<'static, str> {
        Cow::Owned(format!("{:?}", self.kind()))
    }
}

impl ErrorKind for String {
    fn error_kind(&self) -> Cow<'static, str> {
        Cow::Borrowed("error")
    }
}

impl ErrorKind for &'static str {
    fn error_kind(&self) -> Cow<'static, str> {
        Cow::Borrowed("error")
    }
}

impl ErrorKind for InstrumentationError {}

impl<E: ErrorKind + ?Sized> ErrorKind for Box<E> {
    fn error_kind(&self) -> Cow<'static, str> {
        (**self).error_kind()
    }
}

/// Description of an operation to instrument.
#[derive(Debug, Clone)]
pub struct Operation {
    name: String,
    kind: SpanKind,
    attributes: Attributes,
    parent: Option<SpanContext>,
}

impl Operation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SpanKind::Internal,
            attributes: Attributes::new(),
            parent: None,
        }
    }

    /// Adds a span attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attributes(mut self, attributes: Attributes) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn child_of(mut self, parent: &SpanContext) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn parent(mut self, parent: Option<&SpanContext>) -> Self {
        self.parent = parent.cloned();
        self
    }

    pub fn kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

enum Outcome<'a> {
    Success,
    Failure { kind: Cow<'a, str>, message: String },
}

/// Wraps operations with spans, metrics and logs.
#[derive(Debug, Clone)]
pub struct Instrumentation {
    tracer: SpanTracer,
    logs: LogEmitter,
    requests: MetricHandle,
    duration: MetricHandle,
}

impl Instrumentation {
    /// Registers `{prefix}_request_count` and `{prefix}_request_duration`.
    pub fn new(
        registry: &MetricRegistry,
        tracer: SpanTracer,
        logs: LogEmitter,
        prefix: &str,
    ) -> Result<Self, InstrumentationError> {
        let requests = registry.counter(
            &format!("{prefix}_request_count"),
            "Number of instrumented operations",
            "1",
        )?;
        let duration = registry.histogram(
            &format!("{prefix}_request_duration"),
            "Duration of instrumented operations",
            "ms",
        )?;
        Ok(Self {
            tracer,
            logs,
            requests,
            duration,
        })
    }

    pub fn tracer(&self) -> &SpanTracer {
        &self.tracer
    }

    pub fn logs(&self) -> &LogEmitter {
        &self.logs
    }

    pub fn requests(&self) -> &MetricHandle {
        &self.requests
    }

    pub fn duration(&self) -> &MetricHandle {
        &self.duration
    }

    /// Opens the span and starts the timer. The returned guard records the
    /// outcome when it is completed or dropped.
    pub fn begin(&self, operation: Operation) -> OperationGuard {
        let span = self.tracer.start_span_with_kind(
            operation.name.clone(),
            operation.kind,
            operation.attributes,
            operation.parent.as_ref(),
        );
        OperationGuard {
            instrumentation: self.clone(),
            span,
            operation: operation.name,
            tags: Attributes::new(),
            started: Instant::now(),
            finished: false,
        }
    }

    /// Runs synchronous `work` as `name`, optionally as a child of `parent`.
    pub fn wrap<T, E, F>(
        &self,
        name: impl Into<String>,
        attributes: Attributes,
        parent: Option<&SpanContext>,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&SpanContext) -> Result<T, E>,
        E: ErrorKind + Display,
    {
        let operation = Operation::new(name).attributes(attributes).parent(parent);
        self.run(operation, work)
    }

    /// Runs asynchronous `work` as `name`. The future receives the
    /// operation's span context for children and log correlation.
    pub async fn wrap_async<T, E, F, Fut>(
        &self,
        name: impl Into<String>,
        attributes: Attributes,
        parent: Option<&SpanContext>,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce(SpanContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorKind + Display,
    {
        let operation = Operation::new(name).attributes(attributes).parent(parent);
        self.run_async(operation, work).await
    }

    pub fn run<T, E, F>(&self, operation: Operation, work: F) -> Result<T, E>
    where
        F: FnOnce(&SpanContext) -> Result<T, E>,
        E: ErrorKind + Display,
    {
        let guard = self.begin(operation);
        let context = guard.context();
        let result = work(&context);
        match &result {
            Ok(_) => guard.succeed(),
            Err(e) => guard.fail(e),
        }
        result
    }

    pub async fn run_async<T, E, F, Fut>(&self, operation: Operation, work: F) -> Result<T, E>
    where
        F: FnOnce(SpanContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorKind + Display,
    {
        let guard = self.begin(operation);
        let result = work(guard.context()).await;
        match &result {
            Ok(_) => guard.succeed(),
            Err(e) => guard.fail(e),
        }
        result
    }
}

/// An operation in progress.
#[derive(Debug)]
pub struct OperationGuard {
    instrumentation: Instrumentation,
    span: SpanHandle,
    operation: String,
    /// Attributes added to the completion metrics
    tags: Attributes,
    started: Instant,
    finished: bool,
}

impl OperationGuard {
    pub fn context(&self) -> SpanContext {
        self.span.context()
    }

    /// Adds an attribute to both the span and the completion metrics.
    pub fn tag(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = value.into();
        let _ = self.span.set_attribute(key.clone(), value.clone());
        self.tags.insert(key, value);
    }

    /// Direct access to the span, e.g. for span-only attributes.
    pub fn span_mut(&mut self) -> &mut SpanHandle {
        &mut self.span
    }

    pub fn succeed(mut self) {
        self.finish(Outcome::Success);
    }

    pub fn fail<E: ErrorKind + Display + ?Sized>(mut self, error: &E) {
        self.finish(Outcome::Failure {
            kind: error.error_kind(),
            message: error.to_string(),
        });
    }

    /// Fails with an explicit kind and message.
    pub fn fail_with(mut self, kind: &str, message: impl Into<String>) {
        self.finish(Outcome::Failure {
            kind: Cow::Borrowed(kind),
            message: message.into(),
        });
    }

    fn finish(&mut self, outcome: Outcome<'_>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let context = self.span.context();
        let instrumentation = &self.instrumentation;
        let mut metric_attrs = std::mem::take(&mut self.tags);
        metric_attrs.insert("operation".into(), self.operation.as_str().into());

        let mut log_attrs = Attributes::new();
        log_attrs.insert("operation".into(), self.operation.as_str().into());
        log_attrs.insert("duration_ms".into(), elapsed_ms.into());

        match outcome {
            Outcome::Success => {
                metric_attrs.insert("outcome".into(), "success".into());
                let _ = self.span.set_status(SpanStatus::Ok);
                instrumentation.logs.info(
                    format!("{} completed in {elapsed_ms:.2}ms", self.operation),
                    log_attrs,
                    Some(&context),
                );
            }
            Outcome::Failure { kind, message } => {
                metric_attrs.insert("outcome".into(), "failure".into());
                metric_attrs.insert("error.kind".into(), AttributeValue::from(&*kind));
                let _ = self.span.set_attribute("error.kind", &*kind);
                let _ = self.span.set_attribute("error.message", message.as_str());
                let _ = self.span.set_error(message.as_str());
                log_attrs.insert("error.kind".into(), AttributeValue::from(&*kind));
                instrumentation.logs.error(
                    format!("{} failed: {message}", self.operation),
                    log_attrs,
                    Some(&context),
                );
            }
        }

        let _ = instrumentation.requests.add(1.0, metric_attrs.clone());
        let _ = instrumentation.duration.record(elapsed_ms, metric_attrs);
        self.span.end();
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let message = if std::thread::panicking() {
            "operation panicked"
        } else {
            "operation cancelled before completion"
        };
        self.finish(Outcome::Failure {
            kind: Cow::Borrowed(ABORTED),
            message: message.to_string(),
        });
    }
}
