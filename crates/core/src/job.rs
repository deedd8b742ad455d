//! Job lifecycle, failure taxonomy, and the views returned to callers.
//!
//! Internally a job walks through [`JobStage`]s; externally only three
//! statuses are visible ([`JobStatus`]): every non-terminal stage is
//! reported as `RUNNING`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A unit of work submitted against the worker.
///
/// The handle is assigned exactly once, here, before execution begins.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub workflow: Value,
    pub submitted_at: Timestamp,
}

impl Job {
    pub fn new(workflow: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            workflow,
            submitted_at: chrono::Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Internal lifecycle stage of a job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Created,
    Validating,
    HealthChecking,
    Running,
    CollectingArtifacts,
    Completed,
    Failed,
}

impl JobStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stages only move forward, and never out of a terminal stage.
    pub fn can_advance_to(self, next: JobStage) -> bool {
        !self.is_terminal() && next > self
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Validating => "validating",
            Self::HealthChecking => "health_checking",
            Self::Running => "running",
            Self::CollectingArtifacts => "collecting_artifacts",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

impl From<JobStage> for JobStatus {
    fn from(stage: JobStage) -> Self {
        match stage {
            JobStage::Completed => Self::Completed,
            JobStage::Failed => Self::Failed,
            _ => Self::Running,
        }
    }
}

/// Receives stage transitions as the executor walks a job forward.
#[async_trait]
pub trait StageObserver: Send + Sync {
    async fn stage_changed(&self, job_id: JobId, stage: JobStage);
}

/// Observer for jobs nobody polls (the synchronous path).
pub struct NoopObserver;

#[async_trait]
impl StageObserver for NoopObserver {
    async fn stage_changed(&self, _job_id: JobId, _stage: JobStage) {}
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// How an artifact payload is encoded in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactEncoding {
    Base64,
}

/// One produced output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub filename: String,
    #[serde(rename = "type")]
    pub encoding: ArtifactEncoding,
    pub data: String,
}

/// Failure taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    InvalidWorkflow,
    WorkerUnresponsive,
    ExecutionError,
    OutputAreaMissing,
    NoArtifactsProduced,
}

impl FailureKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidWorkflow => "INVALID_WORKFLOW",
            Self::WorkerUnresponsive => "WORKER_UNRESPONSIVE",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::OutputAreaMissing => "OUTPUT_AREA_MISSING",
            Self::NoArtifactsProduced => "NO_ARTIFACTS_PRODUCED",
        }
    }
}

/// Diagnostics captured from the worker's execution interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDetails {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed (timeout or signal).
    pub exit_code: Option<i32>,
}

/// Terminal failure record of a job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    pub details: Option<ExecutionDetails>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: ExecutionDetails) -> Self {
        self.details = Some(details);
        self
    }
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { images: Vec<Artifact> },
    Failed(JobFailure),
}

impl JobOutcome {
    pub fn stage(&self) -> JobStage {
        match self {
            Self::Completed { .. } => JobStage::Completed,
            Self::Failed(_) => JobStage::Failed,
        }
    }
}

impl From<JobFailure> for JobOutcome {
    fn from(failure: JobFailure) -> Self {
        Self::Failed(failure)
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutput {
    pub images: Vec<Artifact>,
}

/// Body returned by the status and submit endpoints.
///
/// Running: `{id, status}`. Completed: adds `output.images`. Failed: adds
/// `error`, `code` and, when the worker ran, `details`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ExecutionDetails>,
}

impl JobView {
    pub fn running(id: JobId) -> Self {
        Self {
            id,
            status: JobStatus::Running,
            output: None,
            error: None,
            code: None,
            details: None,
        }
    }

    pub fn terminal(id: JobId, outcome: &JobOutcome) -> Self {
        match outcome {
            JobOutcome::Completed { images } => Self {
                status: JobStatus::Completed,
                output: Some(JobOutput {
                    images: images.clone(),
                }),
                ..Self::running(id)
            },
            JobOutcome::Failed(failure) => Self {
                status: JobStatus::Failed,
                error: Some(failure.message.clone()),
                code: Some(failure.kind),
                details: failure.details.clone(),
                ..Self::running(id)
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
