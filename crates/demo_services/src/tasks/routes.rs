//! Task dispatch endpoints.

use super::instrumented::InstrumentedTaskQueue;
use super::queue::{TaskQueue, TaskSignature, TaskStatus};
use crate::error::AppError;
use crate::middleware::instrument_http;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use op_telemetry::{SpanContext, Telemetry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

const NOT_READY: &str = "Not ready";

#[derive(Clone)]
struct TasksState {
    queue: InstrumentedTaskQueue,
}

#[derive(Debug, Deserialize)]
pub struct Operands {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskSubmitted {
    pub task_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupSubmitted {
    pub group_task_id: String,
}

#[derive(Debug, Serialize)]
pub struct TaskCheck {
    pub task_id: String,
    pub status: TaskStatus,
    /// The value once ready, the failure message for failed tasks, otherwise "Not ready"
    pub result: Value,
}

#[derive(Debug, Serialize)]
pub struct GroupCheck {
    pub group_task_id: String,
    pub status: Vec<TaskStatus>,
    pub result: Value,
}

/// Task endpoints over `queue`, each request instrumented.
pub fn router(telemetry: Telemetry, queue: Arc<dyn TaskQueue>) -> Router {
    let state = TasksState {
        queue: InstrumentedTaskQueue::new(queue, telemetry.instrumentation.clone()),
    };
    Router::new()
        .route("/add", post(add_task))
        .route("/multiply", post(multiply_task))
        .route("/check/{task_id}", get(check_task))
        .route("/multiply_and_add", post(multiply_and_add))
        .route("/check_group/{group_task_id}", get(check_group))
        .route_layer(axum::middleware::from_fn_with_state(telemetry, instrument_http))
        .with_state(state)
}

async fn add_task(
    State(state): State<TasksState>,
    Extension(span): Extension<SpanContext>,
    Query(Operands { x, y }): Query<Operands>,
) -> Result<Json<TaskSubmitted>, AppError> {
    let task_id = state.queue.submit(TaskSignature::add(x, y), &span).await?;
    Ok(Json(TaskSubmitted { task_id }))
}

async fn multiply_task(
    State(state): State<TasksState>,
    Extension(span): Extension<SpanContext>,
    Query(Operands { x, y }): Query<Operands>,
) -> Result<Json<TaskSubmitted>, AppError> {
    let task_id = state
        .queue
        .submit(TaskSignature::multiply(x, y), &span)
        .await?;
    Ok(Json(TaskSubmitted { task_id }))
}

async fn check_task(
    State(state): State<TasksState>,
    Extension(span): Extension<SpanContext>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskCheck>, AppError> {
    let task = state.queue.fetch(&task_id, &span).await?;
    let result = match (task.status, task.result, task.error) {
        (TaskStatus::Success, Some(value), _) => json!(value),
        (TaskStatus::Failure, _, Some(message)) => json!(message),
        _ => json!(NOT_READY),
    };
    Ok(Json(TaskCheck {
        task_id,
        status: task.status,
        result,
    }))
}

/// Runs `multiply(x, y)` and `add(x, y)` as one group.
async fn multiply_and_add(
    State(state): State<TasksState>,
    Extension(span): Extension<SpanContext>,
    Query(Operands { x, y }): Query<Operands>,
) -> Result<Json<GroupSubmitted>, AppError> {
    let group_task_id = state
        .queue
        .submit_group(
            vec![TaskSignature::multiply(x, y), TaskSignature::add(x, y)],
            &span,
        )
        .await?;
    Ok(Json(GroupSubmitted { group_task_id }))
}

async fn check_group(
    State(state): State<TasksState>,
    Extension(span): Extension<SpanContext>,
    Path(group_task_id): Path<String>,
) -> Result<Json<GroupCheck>, AppError> {
    let group = state.queue.fetch_group(&group_task_id, &span).await?;
    let result = if group.is_ready() {
        json!(group.results())
    } else {
        json!(NOT_READY)
    };
    Ok(Json(GroupCheck {
        group_task_id,
        status: group.statuses(),
        result,
    }))
}
