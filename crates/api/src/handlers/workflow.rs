//! Handlers for workflow submission and status polling.
//!
//! Malformed requests are rejected before a job exists. Once a job has been
//! created, every failure is reported through its terminal body instead.

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use comfyq_comfyui::health::HealthError;
use comfyq_core::error::CoreError;
use comfyq_core::job::{Job, JobOutcome, JobView, NoopObserver};
use comfyq_core::types::JobId;
use comfyq_core::workflow::{self, WorkflowError};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{failure_status, AppError, AppResult};
use crate::state::AppState;

/// Query parameters for `POST /submit_workflow`.
#[derive(Debug, Default, Deserialize)]
pub struct SubmitParams {
    /// Run inline and return the terminal body instead of a handle.
    #[serde(default)]
    pub wait: bool,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse the `{"workflow": ...}` envelope and validate the workflow.
fn parse_submission(body: &Bytes) -> AppResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(WorkflowError::EmptyBody.into());
    }

    let envelope: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON in request body: {e}")))?;
    let workflow = workflow::unwrap_envelope(&envelope)?;
    workflow::validate(workflow)?;

    Ok(workflow.clone())
}

fn parse_handle(raw: &str) -> AppResult<JobId> {
    raw.parse::<JobId>().map_err(|_| {
        AppError::Core(CoreError::Validation(format!(
            "Invalid job id '{raw}': expected a UUID"
        )))
    })
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /submit_workflow
///
/// Without `wait`, registers the job, starts it in the background and
/// returns `{"id", "status": "RUNNING"}` at once. Refused with 503 when the
/// worker has already been declared unhealthy.
///
/// With `?wait=true`, runs the job inline and returns its terminal body with
/// a status derived from the failure kind.
pub async fn submit_workflow(
    State(state): State<AppState>,
    params: Result<Query<SubmitParams>, QueryRejection>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<JobView>)> {
    let Query(params) = params.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let workflow = parse_submission(&body)?;

    if params.wait {
        let job = Job::new(workflow);
        tracing::info!(job_id = %job.id, "Running workflow synchronously");
        let outcome = state.executor.run(&job, &NoopObserver).await;
        let status = match &outcome {
            JobOutcome::Completed { .. } => StatusCode::OK,
            JobOutcome::Failed(failure) => failure_status(failure.kind),
        };
        return Ok((status, Json(JobView::terminal(job.id, &outcome))));
    }

    if !state.health.is_healthy() {
        return Err(CoreError::Unavailable(HealthError::Draining.to_string()).into());
    }

    let job_id = state.registry.submit(workflow).await;
    Ok((StatusCode::OK, Json(JobView::running(job_id))))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /status/{id}
///
/// Non-blocking: returns `RUNNING` until the job is terminal, then the same
/// terminal body on every call.
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<JobView>> {
    let job_id = parse_handle(&id)?;
    let view = state.registry.poll(job_id).await?;
    Ok(Json(view))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
