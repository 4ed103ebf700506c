use super::queue::{GroupState, QueueError, TaskId, TaskQueue, TaskSignature, TaskState};
use op_telemetry::{Instrumentation, Operation, SpanContext, SpanKind};
use std::sync::Arc;

const MESSAGING_SYSTEM: &str = "in-memory";

/// Task queue client whose calls are recorded like HTTP handlers: one span,
/// one request count and one duration sample per call.
#[derive(Clone)]
pub struct InstrumentedTaskQueue {
    inner: Arc<dyn TaskQueue>,
    instrumentation: Instrumentation,
}

impl InstrumentedTaskQueue {
    pub fn new(inner: Arc<dyn TaskQueue>, instrumentation: Instrumentation) -> Self {
        Self {
            inner,
            instrumentation,
        }
    }

    pub async fn submit(
        &self,
        task: TaskSignature,
        parent: &SpanContext,
    ) -> Result<TaskId, QueueError> {
        let operation = Operation::new("task_queue.submit")
            .kind(SpanKind::Producer)
            .attribute("messaging.system", MESSAGING_SYSTEM)
            .attribute("messaging.destination.name", task.queue.as_str())
            .attribute("task.name", task.name.as_str())
            .child_of(parent);
        self.instrumentation
            .run_async(operation, |_| self.inner.submit(task))
            .await
    }

    pub async fn fetch(&self, task_id: &str, parent: &SpanContext) -> Result<TaskState, QueueError> {
        let operation = Operation::new("task_queue.fetch")
            .kind(SpanKind::Client)
            .attribute("messaging.system", MESSAGING_SYSTEM)
            .child_of(parent);
        self.instrumentation
            .run_async(operation, |_| self.inner.fetch(task_id))
            .await
    }

    pub async fn submit_group(
        &self,
        tasks: Vec<TaskSignature>,
        parent: &SpanContext,
    ) -> Result<TaskId, QueueError> {
        let operation = Operation::new("task_queue.submit_group")
            .kind(SpanKind::Producer)
            .attribute("messaging.system", MESSAGING_SYSTEM)
            .attribute("messaging.batch.message_count", tasks.len())
            .child_of(parent);
        self.instrumentation
            .run_async(operation, |_| self.inner.submit_group(tasks))
            .await
    }

    pub async fn fetch_group(
        &self,
        group_id: &str,
        parent: &SpanContext,
    ) -> Result<GroupState, QueueError> {
        let operation = Operation::new("task_queue.fetch_group")
            .kind(SpanKind::Client)
            .attribute("messaging.system", MESSAGING_SYSTEM)
            .child_of(parent);
        self.instrumentation
            .run_async(operation, |_| self.inner.fetch_group(group_id))
            .await
    }
}
