//! Service errors and their HTTP mapping.

use crate::tasks::QueueError;
use crate::users::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use op_telemetry::ErrorKind;
use serde_json::json;
use std::borrow::Cow;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Queue(QueueError::UnknownGroup(_)) => StatusCode::NOT_FOUND,
            Self::Queue(
                QueueError::UnknownTaskName(_)
                | QueueError::UnknownQueue(_)
                | QueueError::InvalidArgs { .. },
            ) => StatusCode::BAD_REQUEST,
            Self::Store(StoreError::DuplicateEmail { .. }) => StatusCode::BAD_REQUEST,
            Self::Queue(QueueError::Unavailable(_)) | Self::Store(StoreError::Unavailable(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl ErrorKind for AppError {
    fn error_kind(&self) -> Cow<'static, str> {
        match self {
            Self::NotFound(_) => Cow::Borrowed("not_found"),
            Self::Conflict(_) => Cow::Borrowed("conflict"),
            Self::BadRequest(_) => Cow::Borrowed("bad_request"),
            Self::Queue(e) => e.error_kind(),
            Self::Store(e) => e.error_kind(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
