//! Route definitions for workflow submission and polling.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::workflow;
use crate::state::AppState;

/// Routes mounted at the root.
///
/// ```text
/// POST   /submit_workflow[?wait=true]   -> submit_workflow
/// GET    /status/{id}                   -> get_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/submit_workflow", post(workflow::submit_workflow))
        .route("/status/{id}", get(workflow::get_status))
}
