//! In-memory job registry and fire-and-forget dispatch.
//!
//! [`JobRegistry::submit`] assigns a handle, records the job as `Created`
//! and detaches execution onto a tracked Tokio task, returning at once.
//! [`JobRegistry::poll`] never blocks on execution: it reads whatever the
//! entry holds right now.
//!
//! The registry is the only writer of job state. The executor reports stage
//! transitions through [`StageObserver`]; the dispatch task stores the
//! terminal outcome. Stages only move forward and a terminal outcome is
//! written once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use comfyq_comfyui::executor::JobExecutor;
use comfyq_core::error::CoreError;
use comfyq_core::job::{
    FailureKind, Job, JobFailure, JobOutcome, JobStage, JobView, StageObserver,
};
use comfyq_core::types::{JobId, Timestamp};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::task::TaskTracker;

/// Registry bookkeeping for one job.
#[derive(Debug, Clone)]
struct JobEntry {
    stage: JobStage,
    outcome: Option<JobOutcome>,
    submitted_at: Timestamp,
    finished_at: Option<Timestamp>,
}

impl JobEntry {
    fn created(submitted_at: Timestamp) -> Self {
        Self {
            stage: JobStage::Created,
            outcome: None,
            submitted_at,
            finished_at: None,
        }
    }
}

/// Snapshot of registry occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    /// Entries currently held (running and retained terminal).
    pub tracked: usize,
    /// Entries not yet terminal.
    pub running: usize,
}

/// Tracks submitted jobs by handle and runs them out-of-band.
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
    executor: Arc<JobExecutor>,
    tasks: TaskTracker,
}

impl JobRegistry {
    pub fn new(executor: Arc<JobExecutor>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            executor,
            tasks: TaskTracker::new(),
        }
    }

    /// Accept a workflow, assign it a handle and start executing it in the
    /// background. Returns as soon as the job is recorded as `Created`.
    pub async fn submit(self: &Arc<Self>, workflow: serde_json::Value) -> JobId {
        let job = Job::new(workflow);
        let job_id = job.id;
        self.register(&job).await;

        let registry = Arc::clone(self);
        self.tasks.spawn(registry.dispatch(job));

        tracing::info!(%job_id, "Spawned asynchronous workflow execution");
        job_id
    }

    /// Current view of a job without waiting on it.
    ///
    /// Every non-terminal stage is reported as `RUNNING`. Once terminal, the
    /// same stored outcome is returned on every call.
    pub async fn poll(&self, job_id: JobId) -> Result<JobView, CoreError> {
        let jobs = self.jobs.read().await;
        let entry = jobs
            .get(&job_id)
            .ok_or_else(|| CoreError::UnknownHandle(job_id.to_string()))?;

        Ok(match &entry.outcome {
            Some(outcome) => JobView::terminal(job_id, outcome),
            None => JobView::running(job_id),
        })
    }

    pub async fn counts(&self) -> JobCounts {
        let jobs = self.jobs.read().await;
        JobCounts {
            tracked: jobs.len(),
            running: jobs.values().filter(|e| !e.stage.is_terminal()).count(),
        }
    }

    /// Drop terminal entries that finished before `cutoff`. Returns how many
    /// were removed. Non-terminal entries are never evicted.
    pub async fn evict_finished_before(&self, cutoff: Timestamp) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, entry| match entry.finished_at {
            Some(finished_at) => finished_at >= cutoff,
            None => true,
        });
        before - jobs.len()
    }

    /// Close admission and wait up to `timeout` for in-flight jobs to
    /// finish. Jobs still waiting for a permit fail instead of starting.
    /// Returns `false` if the wait timed out.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.executor.close_admission();
        self.tasks.close();
        tokio::time::timeout(timeout, self.tasks.wait()).await.is_ok()
    }

    // ---- private helpers ----

    async fn register(&self, job: &Job) {
        self.jobs
            .write()
            .await
            .insert(job.id, JobEntry::created(job.submitted_at));
    }

    /// Run `job` on its own task so a panic inside the executor still
    /// resolves the entry instead of leaving it running forever.
    async fn dispatch(self: Arc<Self>, job: Job) {
        let job_id = job.id;
        let executor = Arc::clone(&self.executor);
        let observer = RegistryObserver {
            registry: Arc::clone(&self),
        };

        let run = tokio::spawn(async move { executor.run(&job, &observer).await });
        let outcome = match run.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(%job_id, error = %e, "Workflow task aborted");
                JobFailure::new(
                    FailureKind::ExecutionError,
                    format!("Unexpected error during workflow execution: {e}"),
                )
                .into()
            }
        };

        self.finish(job_id, outcome).await;
    }

    async fn advance(&self, job_id: JobId, stage: JobStage) {
        let mut jobs = self.jobs.write().await;
        if let Some(entry) = jobs.get_mut(&job_id) {
            if entry.stage.can_advance_to(stage) {
                entry.stage = stage;
            } else {
                tracing::warn!(%job_id, from = %entry.stage, to = %stage, "Ignoring backward stage transition");
            }
        }
    }

    async fn finish(&self, job_id: JobId, outcome: JobOutcome) {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(&job_id) else {
            return;
        };
        if entry.stage.is_terminal() {
            tracing::warn!(%job_id, "Job already terminal, keeping first outcome");
            return;
        }
        let finished_at = chrono::Utc::now();
        entry.stage = outcome.stage();
        entry.outcome = Some(outcome);
        entry.finished_at = Some(finished_at);

        tracing::info!(
            %job_id,
            stage = %entry.stage,
            elapsed_ms = (finished_at - entry.submitted_at).num_milliseconds(),
            "Job finished",
        );
    }
}

/// Forwards executor stage transitions into the registry.
struct RegistryObserver {
    registry: Arc<JobRegistry>,
}

#[async_trait]
impl StageObserver for RegistryObserver {
    async fn stage_changed(&self, job_id: JobId, stage: JobStage) {
        self.registry.advance(job_id, stage).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
