//! Per-job execution state machine.
//!
//! ```text
//! Created -> Validating -> HealthChecking -> Running -> CollectingArtifacts -> Completed
//!                 |              |              |               |
//!                 +--------------+--------------+---------------+--> Failed
//! ```
//!
//! Each stage converts its own errors into a [`JobFailure`]; nothing escapes
//! [`JobExecutor::run`] except a terminal [`JobOutcome`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use comfyq_core::job::{
    Artifact, FailureKind, Job, JobFailure, JobOutcome, JobStage, StageObserver,
};
use comfyq_core::workflow;
use tokio::sync::Semaphore;

use crate::artifacts::{self, CollectError};
use crate::health::HealthMonitor;
use crate::runner::WorkflowRunner;

/// Paths and limits for job execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Where payloads are written as `<job id>.json` before a run.
    pub scratch_dir: PathBuf,
    /// The worker's output area.
    pub output_dir: PathBuf,
    /// Ceiling on the execution step.
    pub run_timeout: Duration,
    /// Jobs allowed past admission at the same time.
    pub max_concurrent_jobs: usize,
}

/// Runs jobs against the worker, one state machine per call.
pub struct JobExecutor {
    health: Arc<HealthMonitor>,
    runner: Arc<dyn WorkflowRunner>,
    admission: Semaphore,
    config: ExecutorConfig,
}

impl JobExecutor {
    pub fn new(
        health: Arc<HealthMonitor>,
        runner: Arc<dyn WorkflowRunner>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            health,
            runner,
            admission: Semaphore::new(config.max_concurrent_jobs.max(1)),
            config,
        }
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Stop admitting jobs. Jobs holding a permit run to completion; jobs
    /// still waiting for one fail without reaching the worker.
    pub fn close_admission(&self) {
        self.admission.close();
        tracing::info!("Job admission closed");
    }

    /// Run `job` to a terminal outcome.
    ///
    /// Waits for an admission permit first; the job stays in `Created`
    /// while it waits. Fails with `WorkerUnresponsive` once admission has
    /// been closed.
    pub async fn run(&self, job: &Job, observer: &dyn StageObserver) -> JobOutcome {
        let outcome = match self.admission.acquire().await {
            Ok(_permit) => match self.execute(job, observer).await {
                Ok(images) => JobOutcome::Completed { images },
                Err(failure) => JobOutcome::Failed(failure),
            },
            Err(_closed) => JobOutcome::Failed(JobFailure::new(
                FailureKind::WorkerUnresponsive,
                "Admission is closed on this instance",
            )),
        };

        match &outcome {
            JobOutcome::Completed { images } => tracing::info!(
                job_id = %job.id,
                image_count = images.len(),
                "Successfully completed workflow",
            ),
            JobOutcome::Failed(failure) => tracing::error!(
                job_id = %job.id,
                code = failure.kind.code(),
                error = %failure.message,
                "Workflow execution failed",
            ),
        }

        outcome
    }

    async fn execute(
        &self,
        job: &Job,
        observer: &dyn StageObserver,
    ) -> Result<Vec<Artifact>, JobFailure> {
        self.enter(job, JobStage::Validating, observer).await;
        let declarations = workflow::validate(&job.workflow)
            .map_err(|e| JobFailure::new(FailureKind::InvalidWorkflow, e.to_string()))?;

        self.enter(job, JobStage::HealthChecking, observer).await;
        self.health
            .admit()
            .await
            .map_err(|e| JobFailure::new(FailureKind::WorkerUnresponsive, e.to_string()))?;

        self.enter(job, JobStage::Running, observer).await;
        let workflow_path = self.persist(job).await?;
        let run = self.runner.run(&workflow_path, self.config.run_timeout).await;
        discard(&workflow_path).await;
        if let Err(e) = run {
            let failure = JobFailure::new(FailureKind::ExecutionError, e.to_string());
            return Err(match e.details() {
                Some(details) => failure.with_details(details),
                None => failure,
            });
        }

        self.enter(job, JobStage::CollectingArtifacts, observer).await;
        artifacts::collect_artifacts(&self.config.output_dir, &declarations)
            .await
            .map_err(|e| {
                let kind = match e {
                    CollectError::NoArtifacts => FailureKind::NoArtifactsProduced,
                    CollectError::OutputAreaMissing(_) | CollectError::ListFailed { .. } => {
                        FailureKind::OutputAreaMissing
                    }
                };
                JobFailure::new(kind, e.to_string())
            })
    }

    async fn enter(&self, job: &Job, stage: JobStage, observer: &dyn StageObserver) {
        tracing::info!(job_id = %job.id, %stage, "Job stage");
        observer.stage_changed(job.id, stage).await;
    }

    /// Write the payload to `<scratch_dir>/<job id>.json`.
    async fn persist(&self, job: &Job) -> Result<PathBuf, JobFailure> {
        let path = self.config.scratch_dir.join(format!("{}.json", job.id));
        let bytes = serde_json::to_vec(&job.workflow).map_err(|e| {
            JobFailure::new(
                FailureKind::ExecutionError,
                format!("Failed to serialize workflow: {e}"),
            )
        })?;
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            JobFailure::new(
                FailureKind::ExecutionError,
                format!("Failed to save workflow to temporary file: {e}"),
            )
        })?;
        tracing::info!(job_id = %job.id, path = %path.display(), "Saved workflow");
        Ok(path)
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove scratch workflow");
    }
}
