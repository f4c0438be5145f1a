use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::pipeline::PipelineError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    reason: Option<&'static str>,
    detail: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    NotFound(String),
    Pipeline(PipelineError),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self::Pipeline(err)
    }
}

/// HTTP status for a pipeline failure.
pub(crate) fn pipeline_status(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::QueueUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::CourseNotFound { .. } => StatusCode::NOT_FOUND,
        PipelineError::AlreadyClaimed { .. } | PipelineError::DrainInProgress => {
            StatusCode::CONFLICT
        }
        PipelineError::Decode { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::CourseLookup { .. } | PipelineError::Store { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(status: StatusCode, reason: Option<&'static str>, detail: String) -> Response {
    (status, Json(ErrorResponse { status: status.as_u16(), reason, detail })).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => error_response(StatusCode::BAD_REQUEST, None, message),
            ApiError::NotFound(message) => error_response(StatusCode::NOT_FOUND, None, message),
            ApiError::Pipeline(err) => {
                let status = pipeline_status(&err);
                if status.is_server_error() {
                    tracing::error!(error = %err, reason = err.reason(), "Pipeline request failed");
                }
                error_response(status, Some(err.reason()), err.to_string())
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, None, message)
            }
        }
    }
}
