use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use comfyq_core::error::CoreError;
use comfyq_core::job::FailureKind;
use comfyq_core::workflow::WorkflowError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
/// These are only raised before a job exists; once a job has been created,
/// failures are reported through its terminal result instead.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `comfyq_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The submission envelope or workflow document is malformed.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::UnknownHandle(id) => (
                    StatusCode::NOT_FOUND,
                    "UNKNOWN_HANDLE",
                    format!("Job with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Unavailable(msg) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    FailureKind::WorkerUnresponsive.code(),
                    msg.clone(),
                ),
            },

            // --- Submission errors ---
            AppError::Workflow(err) => (
                StatusCode::BAD_REQUEST,
                FailureKind::InvalidWorkflow.code(),
                err.to_string(),
            ),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        tracing::warn!(status = status.as_u16(), code, error = %message, "Request rejected");

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// HTTP status for a terminal job failure returned inline (`?wait=true`).
pub fn failure_status(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::InvalidWorkflow => StatusCode::BAD_REQUEST,
        FailureKind::WorkerUnresponsive => StatusCode::SERVICE_UNAVAILABLE,
        FailureKind::ExecutionError
        | FailureKind::OutputAreaMissing
        | FailureKind::NoArtifactsProduced => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
