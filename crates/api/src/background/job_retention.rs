//! Periodic eviction of finished jobs.
//!
//! Terminal results stay pollable for the configured retention period, then
//! this task removes them from the registry. Runs on a fixed interval using
//! `tokio::time::interval`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::engine::registry::JobRegistry;

/// How often the sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60); // 1 minute

/// Run the retention loop.
///
/// Evicts jobs that finished more than `retention` ago. Runs until `cancel`
/// is triggered.
pub async fn run(registry: Arc<JobRegistry>, retention: Duration, cancel: CancellationToken) {
    tracing::info!(
        retention_secs = retention.as_secs(),
        interval_secs = SWEEP_INTERVAL.as_secs(),
        "Job retention task started"
    );

    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = interval.tick() => {
                let cutoff = Utc::now()
                    .checked_sub_signed(retention)
                    .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
                let evicted = registry.evict_finished_before(cutoff).await;
                if evicted > 0 {
                    tracing::info!(evicted, "Job retention: evicted finished jobs");
                } else {
                    tracing::debug!("Job retention: nothing to evict");
                }
            }
        }
    }
}
