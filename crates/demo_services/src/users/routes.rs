//! User CRUD endpoints.

use super::instrumented::InstrumentedUserStore;
use super::store::{NewUser, User, UserId, UserStore, UserUpdate};
use crate::error::AppError;
use crate::middleware::instrument_http;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Extension, Json, Router};
use op_telemetry::{
    attributes, Attributes, InstrumentationError, MetricHandle, MetricRegistry, SpanContext,
    Telemetry,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Business counters of the user service.
#[derive(Debug, Clone)]
pub struct UserMetrics {
    pub created: MetricHandle,
    pub updated: MetricHandle,
    pub deleted: MetricHandle,
    /// Users currently stored
    pub active: MetricHandle,
}

impl UserMetrics {
    pub fn register(registry: &MetricRegistry) -> Result<Self, InstrumentationError> {
        Ok(Self {
            created: registry.counter("user_created_count", "Counts the number of users created", "1")?,
            updated: registry.counter(
                "user_updated_count",
                "Counts the number of user update requests",
                "1",
            )?,
            deleted: registry.counter("user_deleted_count", "Counts the number of users deleted", "1")?,
            active: registry.up_down_counter(
                "active_users",
                "Tracks the number of active users in the system",
                "1",
            )?,
        })
    }
}

#[derive(Clone)]
struct UsersState {
    telemetry: Telemetry,
    store: InstrumentedUserStore,
    metrics: UserMetrics,
}

/// User endpoints over `store`, each request instrumented.
pub fn router(telemetry: Telemetry, store: Arc<dyn UserStore>) -> Result<Router, InstrumentationError> {
    let state = UsersState {
        metrics: UserMetrics::register(&telemetry.metrics)?,
        store: InstrumentedUserStore::new(store, telemetry.instrumentation.clone()),
        telemetry: telemetry.clone(),
    };
    Ok(Router::new()
        .route("/users/", get(list_users).post(create_user))
        .route(
            "/users/{user_id}",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route_layer(axum::middleware::from_fn_with_state(telemetry, instrument_http))
        .with_state(state))
}

fn not_found() -> AppError {
    AppError::NotFound("User not found".into())
}

async fn list_users(
    State(state): State<UsersState>,
    Extension(span): Extension<SpanContext>,
) -> Result<Json<Vec<User>>, AppError> {
    let store = &state.store;
    let users = state
        .telemetry
        .instrumentation
        .wrap_async("list_users", Attributes::new(), Some(&span), |ctx| async move {
            Ok::<_, AppError>(store.list(&ctx).await?)
        })
        .await?;
    Ok(Json(users))
}

async fn get_user(
    State(state): State<UsersState>,
    Extension(span): Extension<SpanContext>,
    Path(user_id): Path<UserId>,
) -> Result<Json<User>, AppError> {
    let store = &state.store;
    let user = state
        .telemetry
        .instrumentation
        .wrap_async(
            "get_user",
            attributes! { "user.id" => user_id },
            Some(&span),
            |ctx| async move { store.get(user_id, &ctx).await?.ok_or_else(not_found) },
        )
        .await?;
    Ok(Json(user))
}

async fn create_user(
    State(state): State<UsersState>,
    Extension(span): Extension<SpanContext>,
    Json(new_user): Json<NewUser>,
) -> Result<Json<User>, AppError> {
    let store = &state.store;
    let user = state
        .telemetry
        .instrumentation
        .wrap_async("create_user", Attributes::new(), Some(&span), |ctx| async move {
            if new_user.name.trim().is_empty() || !new_user.email.contains('@') {
                return Err(AppError::BadRequest("A name and a valid email are required".into()));
            }
            if store.find_by_email(&new_user.email, &ctx).await?.is_some() {
                return Err(AppError::Conflict(format!(
                    "Email {} already registered",
                    new_user.email
                )));
            }
            Ok(store.insert(new_user, &ctx).await?)
        })
        .await?;

    let _ = state.metrics.created.add(1.0, Attributes::new());
    let _ = state.metrics.active.add(1.0, Attributes::new());
    Ok(Json(user))
}

async fn update_user(
    State(state): State<UsersState>,
    Extension(span): Extension<SpanContext>,
    Path(user_id): Path<UserId>,
    Json(update): Json<UserUpdate>,
) -> Result<Json<Value>, AppError> {
    let store = &state.store;
    state
        .telemetry
        .instrumentation
        .wrap_async(
            "update_user",
            attributes! { "user.id" => user_id },
            Some(&span),
            |ctx| async move { store.update(user_id, update, &ctx).await?.ok_or_else(not_found) },
        )
        .await?;

    let _ = state.metrics.updated.add(1.0, Attributes::new());
    Ok(Json(json!({ "message": "User updated successfully" })))
}

async fn delete_user(
    State(state): State<UsersState>,
    Extension(span): Extension<SpanContext>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Value>, AppError> {
    let store = &state.store;
    state
        .telemetry
        .instrumentation
        .wrap_async(
            "delete_user",
            attributes! { "user.id" => user_id },
            Some(&span),
            |ctx| async move {
                if store.delete(user_id, &ctx).await? {
                    Ok(())
                } else {
                    Err(not_found())
                }
            },
        )
        .await?;

    let _ = state.metrics.deleted.add(1.0, Attributes::new());
    let _ = state.metrics.active.add(-1.0, Attributes::new());
    Ok(Json(json!({ "message": "User deleted successfully" })))
}
