//! Task queue client interface and an in-process implementation.

use async_trait::async_trait;
use op_telemetry::ErrorKind;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

pub const ADD_QUEUE: &str = "queue_add";
pub const MULTIPLY_QUEUE: &str = "queue_multiply";

pub type TaskId = String;

/// How long finished results and groups are kept, matching the usual
/// result-backend expiry of one day.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Group {0} not found")]
    UnknownGroup(TaskId),
    #[error("Unknown task type `{0}`")]
    UnknownTaskName(String),
    #[error("Unknown queue `{0}`")]
    UnknownQueue(String),
    #[error("Task `{task}` takes {expected} arguments, got {got}")]
    InvalidArgs {
        task: String,
        expected: usize,
        got: usize,
    },
    #[error("Task queue unavailable: {0}")]
    Unavailable(String),
}

impl ErrorKind for QueueError {
    fn error_kind(&self) -> Cow<'static, str> {
        Cow::Borrowed(match self {
            Self::UnknownGroup(_) => "not_found",
            Self::UnknownTaskName(_) | Self::UnknownQueue(_) | Self::InvalidArgs { .. } => {
                "invalid_task"
            }
            Self::Unavailable(_) => "unavailable",
        })
    }
}

/// Lifecycle of a submitted task, serialized the way worker backends report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Started,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

/// A task invocation: name, arguments and the queue it is routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSignature {
    pub name: String,
    pub args: Vec<i64>,
    pub queue: String,
}

impl TaskSignature {
    pub fn new(name: impl Into<String>, args: Vec<i64>, queue: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args,
            queue: queue.into(),
        }
    }

    pub fn add(x: i64, y: i64) -> Self {
        Self::new("add", vec![x, y], ADD_QUEUE)
    }

    pub fn multiply(x: i64, y: i64) -> Self {
        Self::new("multiply", vec![x, y], MULTIPLY_QUEUE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskState {
    pub status: TaskStatus,
    pub result: Option<i64>,
    pub error: Option<String>,
}

impl TaskState {
    fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            result: None,
            error: None,
        }
    }
}

/// Member states of a group, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupState {
    pub members: Vec<TaskState>,
}

impl GroupState {
    pub fn is_ready(&self) -> bool {
        self.members.iter().all(|m| m.status.is_ready())
    }

    pub fn statuses(&self) -> Vec<TaskStatus> {
        self.members.iter().map(|m| m.status).collect()
    }

    /// Member results; `None` for members that failed.
    pub fn results(&self) -> Vec<Option<i64>> {
        self.members.iter().map(|m| m.result).collect()
    }
}

/// Client side of a distributed task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn submit(&self, task: TaskSignature) -> Result<TaskId, QueueError>;

    /// State of `task_id`. Ids the backend does not know (never submitted or
    /// already expired) report `Pending`.
    async fn fetch(&self, task_id: &str) -> Result<TaskState, QueueError>;

    /// Submits all tasks as one group and returns the group id.
    async fn submit_group(&self, tasks: Vec<TaskSignature>) -> Result<TaskId, QueueError>;

    async fn fetch_group(&self, group_id: &str) -> Result<GroupState, QueueError>;
}

// ============================================================================
// In-memory queue
// ============================================================================

#[derive(Debug)]
struct Stored<T> {
    value: T,
    /// Submission time, refreshed when a task finishes
    touched: Instant,
}

impl<T> Stored<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            touched: Instant::now(),
        }
    }

    fn is_live(&self, ttl: Duration) -> bool {
        self.touched.elapsed() < ttl
    }
}

#[derive(Debug, Default)]
struct Registry {
    tasks: HashMap<TaskId, Stored<TaskState>>,
    groups: HashMap<TaskId, Stored<Vec<TaskId>>>,
}

impl Registry {
    fn purge_expired(&mut self, ttl: Duration) {
        self.tasks.retain(|_, task| task.is_live(ttl));
        self.groups.retain(|_, group| group.is_live(ttl));
    }

    fn task(&self, task_id: &str, ttl: Duration) -> TaskState {
        self.tasks
            .get(task_id)
            .filter(|task| task.is_live(ttl))
            .map_or_else(TaskState::pending, |task| task.value.clone())
    }
}

/// Runs every task on its own Tokio task and keeps results in memory.
///
/// Knows the `add` and `multiply` tasks on `queue_add` / `queue_multiply`.
/// Results and groups expire after the result TTL; expired entries are
/// purged on the next submission.
#[derive(Debug, Clone)]
pub struct InMemoryTaskQueue {
    registry: Arc<Mutex<Registry>>,
    work_delay: Duration,
    result_ttl: Duration,
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self {
            registry: Arc::default(),
            work_delay: Duration::ZERO,
            result_ttl: DEFAULT_RESULT_TTL,
        }
    }
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated execution time per task.
    pub fn with_work_delay(mut self, delay: Duration) -> Self {
        self.work_delay = delay;
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    /// Tasks and groups currently held, expired or not.
    pub fn stored(&self) -> (usize, usize) {
        self.with_registry(|r| (r.tasks.len(), r.groups.len()))
    }

    fn with_registry<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        f(&mut self.registry.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn set_state(&self, task_id: &str, state: TaskState) {
        self.with_registry(|r| {
            if let Some(slot) = r.tasks.get_mut(task_id) {
                *slot = Stored::new(state);
            }
        });
    }

    fn enqueue(&self, task: TaskSignature) -> Result<TaskId, QueueError> {
        validate(&task)?;
        let task_id = Uuid::new_v4().to_string();
        let ttl = self.result_ttl;
        self.with_registry(|r| {
            r.purge_expired(ttl);
            r.tasks.insert(task_id.clone(), Stored::new(TaskState::pending()));
        });

        let queue = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            queue.set_state(
                &id,
                TaskState {
                    status: TaskStatus::Started,
                    result: None,
                    error: None,
                },
            );
            if !queue.work_delay.is_zero() {
                tokio::time::sleep(queue.work_delay).await;
            }
            let state = match execute(&task) {
                Ok(value) => TaskState {
                    status: TaskStatus::Success,
                    result: Some(value),
                    error: None,
                },
                Err(message) => TaskState {
                    status: TaskStatus::Failure,
                    result: None,
                    error: Some(message),
                },
            };
            tracing::debug!(task_id = %id, task = %task.name, status = ?state.status, "task finished");
            queue.set_state(&id, state);
        });

        Ok(task_id)
    }
}

fn validate(task: &TaskSignature) -> Result<(), QueueError> {
    if !matches!(task.name.as_str(), "add" | "multiply") {
        return Err(QueueError::UnknownTaskName(task.name.clone()));
    }
    if !matches!(task.queue.as_str(), ADD_QUEUE | MULTIPLY_QUEUE) {
        return Err(QueueError::UnknownQueue(task.queue.clone()));
    }
    if task.args.len() != 2 {
        return Err(QueueError::InvalidArgs {
            task: task.name.clone(),
            expected: 2,
            got: task.args.len(),
        });
    }
    Ok(())
}

fn execute(task: &TaskSignature) -> Result<i64, String> {
    let (x, y) = (task.args[0], task.args[1]);
    let value = match task.name.as_str() {
        "add" => x.checked_add(y),
        _ => x.checked_mul(y),
    };
    value.ok_or_else(|| format!("{} overflowed for ({x}, {y})", task.name))
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn submit(&self, task: TaskSignature) -> Result<TaskId, QueueError> {
        self.enqueue(task)
    }

    async fn fetch(&self, task_id: &str) -> Result<TaskState, QueueError> {
        let ttl = self.result_ttl;
        Ok(self.with_registry(|r| r.task(task_id, ttl)))
    }

    async fn submit_group(&self, tasks: Vec<TaskSignature>) -> Result<TaskId, QueueError> {
        for task in &tasks {
            validate(task)?;
        }
        let members = tasks
            .into_iter()
            .map(|task| self.enqueue(task))
            .collect::<Result<Vec<_>, _>>()?;
        let group_id = Uuid::new_v4().to_string();
        self.with_registry(|r| r.groups.insert(group_id.clone(), Stored::new(members)));
        Ok(group_id)
    }

    async fn fetch_group(&self, group_id: &str) -> Result<GroupState, QueueError> {
        let ttl = self.result_ttl;
        self.with_registry(|r| {
            let ids = r
                .groups
                .get(group_id)
                .filter(|group| group.is_live(ttl))
                .ok_or_else(|| QueueError::UnknownGroup(group_id.to_string()))?;
            let members = ids.value.iter().map(|id| r.task(id, ttl)).collect();
            Ok(GroupState { members })
        })
    }
}
