use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::engine::registry::JobCounts;
use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`, mirroring the worker.
    pub status: &'static str,
    pub message: String,
    /// Whether the ComfyUI worker answered the liveness probe.
    pub worker_healthy: bool,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub jobs: JobCounts,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// GET /health -- probes the worker and reports service state.
///
/// Always answers 200; a failing probe drains the instance just like a
/// failed admission would.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let probe = state.health.probe().await;
    let worker_healthy = probe.is_ok() && state.health.is_healthy();

    let message = match probe {
        Ok(()) if worker_healthy => "ComfyUI server is healthy".to_string(),
        Ok(()) => "ComfyUI server was marked unhealthy earlier".to_string(),
        Err(e) => e.to_string(),
    };

    Json(HealthResponse {
        status: state.health.status().as_str(),
        message,
        worker_healthy,
        version: env!("CARGO_PKG_VERSION"),
        jobs: state.registry.counts().await,
        timestamp: chrono::Utc::now(),
    })
}

/// Mount health check routes at the root.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
