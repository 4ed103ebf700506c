//! Task dispatch service.

mod instrumented;
mod queue;
mod routes;

pub use instrumented::InstrumentedTaskQueue;
pub use queue::{
    GroupState, InMemoryTaskQueue, QueueError, TaskId, TaskQueue, TaskSignature, TaskState,
    TaskStatus, ADD_QUEUE, MULTIPLY_QUEUE,
};
pub use routes::{router, GroupCheck, GroupSubmitted, Operands, TaskCheck, TaskSubmitted};
