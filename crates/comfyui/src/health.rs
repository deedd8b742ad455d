//! Worker liveness monitoring and instance draining.
//!
//! [`HealthMonitor`] is the single writer of the process-wide worker health
//! flag. A failed probe flips the flag to unhealthy for the rest of the
//! process lifetime and cancels the drain token, telling the serving layer
//! to stop admitting work. Recovery is never automatic: the process
//! supervisor is expected to replace the instance.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

use crate::api::ComfyUIApi;

/// Current health of the worker behind this instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerHealth {
    Healthy,
    Unhealthy,
}

impl WorkerHealth {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Reasons admission is refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthError {
    /// The liveness probe failed just now.
    #[error("ComfyUI server is not healthy: {0}")]
    Unresponsive(String),

    /// An earlier probe failed; the instance is draining.
    #[error("ComfyUI server was marked unhealthy and is no longer accepting work")]
    Draining,
}

/// Probes the worker and owns the health flag.
pub struct HealthMonitor {
    api: ComfyUIApi,
    healthy: AtomicBool,
    drain: CancellationToken,
}

impl HealthMonitor {
    pub fn new(api: ComfyUIApi) -> Self {
        Self {
            api,
            healthy: AtomicBool::new(true),
            drain: CancellationToken::new(),
        }
    }

    pub fn status(&self) -> WorkerHealth {
        if self.healthy.load(Ordering::Acquire) {
            WorkerHealth::Healthy
        } else {
            WorkerHealth::Unhealthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == WorkerHealth::Healthy
    }

    /// Token cancelled the moment the worker is declared unhealthy.
    pub fn drain_token(&self) -> CancellationToken {
        self.drain.clone()
    }

    /// Issue one bounded-time liveness request.
    ///
    /// On failure the worker is marked unhealthy. On success the flag is
    /// left as it was: an unhealthy instance stays unhealthy.
    pub async fn probe(&self) -> Result<(), HealthError> {
        match self.api.system_stats().await {
            Ok(()) => {
                tracing::debug!(api_url = %self.api.api_url(), "ComfyUI server is healthy");
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                self.mark_unhealthy(&reason);
                Err(HealthError::Unresponsive(reason))
            }
        }
    }

    /// Gate a job execution attempt: refuse outright if already draining,
    /// otherwise probe.
    pub async fn admit(&self) -> Result<(), HealthError> {
        if !self.is_healthy() {
            return Err(HealthError::Draining);
        }
        self.probe().await
    }

    fn mark_unhealthy(&self, reason: &str) {
        if self.healthy.swap(false, Ordering::AcqRel) {
            tracing::error!(
                api_url = %self.api.api_url(),
                reason,
                "ComfyUI server health check failed, no longer accepting work",
            );
            self.drain.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
