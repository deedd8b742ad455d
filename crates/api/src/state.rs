use std::sync::Arc;

use comfyq_comfyui::executor::JobExecutor;
use comfyq_comfyui::health::HealthMonitor;

use crate::config::ServerConfig;
use crate::engine::registry::JobRegistry;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (every field is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Handle-keyed job registry backing the async submit/poll protocol.
    pub registry: Arc<JobRegistry>,
    /// Executor used directly by `?wait=true` submissions.
    pub executor: Arc<JobExecutor>,
    /// Liveness state of the ComfyUI worker behind this instance.
    pub health: Arc<HealthMonitor>,
}
