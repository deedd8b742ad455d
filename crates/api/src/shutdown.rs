//! Shutdown triggers for the HTTP server.
//!
//! The server stops on SIGINT/SIGTERM. With `SHUTDOWN_WHEN_UNHEALTHY` it
//! also stops after the worker is declared unhealthy, but only once every
//! in-flight job has resolved: until then `/status` keeps answering and new
//! async submissions are refused with 503.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::engine::registry::JobRegistry;

/// Resolve once the worker is unhealthy and the registry has drained.
///
/// `grace` bounds the wait for in-flight jobs and should cover a full run.
/// After they finish the server stays up for `linger` so callers can poll
/// the final results.
pub async fn drain_when_unhealthy(
    unhealthy: CancellationToken,
    registry: Arc<JobRegistry>,
    grace: Duration,
    linger: Duration,
) {
    unhealthy.cancelled().await;

    let counts = registry.counts().await;
    tracing::warn!(
        running = counts.running,
        grace_secs = grace.as_secs(),
        "ComfyUI worker declared unhealthy, draining in-flight jobs",
    );

    if registry.shutdown(grace).await {
        tracing::info!(linger_secs = linger.as_secs(), "In-flight jobs resolved");
    } else {
        tracing::warn!(
            grace_secs = grace.as_secs(),
            "In-flight jobs still running after drain grace period",
        );
    }

    tokio::time::sleep(linger).await;
}

/// Wait for a termination signal, or for `unhealthy` to resolve when set,
/// to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
pub async fn shutdown_signal<F>(unhealthy: Option<F>)
where
    F: Future<Output = ()>,
{
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let drained = async {
        match unhealthy {
            Some(drain) => drain.await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
        () = drained => {
            tracing::info!("Unhealthy instance drained, starting graceful shutdown");
        }
    }
}
