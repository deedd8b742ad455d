//! Execution interface of the worker.
//!
//! A [`WorkflowRunner`] takes a workflow file on disk and blocks until the
//! worker has finished it or the timeout expires. The production runner,
//! [`ComfyCliRunner`], shells out to `comfy run --wait`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use comfyq_core::job::ExecutionDetails;
use tokio::process::Command;

use crate::subprocess::{self, ProcessError, ProcessOutput};

/// Errors from the execution step.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    /// The worker ran but reported failure.
    #[error("ComfyUI workflow execution failed with {}", exit_label(.exit_code))]
    Failed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The worker did not finish within the execution ceiling.
    #[error("ComfyUI workflow execution timed out after {elapsed_ms}ms")]
    Timeout {
        elapsed_ms: u64,
        stdout: String,
        stderr: String,
    },

    /// The execution interface could not be invoked at all.
    #[error("Failed to execute ComfyUI workflow: {0}")]
    Launch(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".to_string(),
    }
}

impl RunError {
    /// Captured diagnostics, when the worker got far enough to produce any.
    pub fn details(&self) -> Option<ExecutionDetails> {
        match self {
            Self::Failed {
                exit_code,
                stdout,
                stderr,
            } => Some(ExecutionDetails {
                stdout: stdout.clone(),
                stderr: stderr.clone(),
                exit_code: *exit_code,
            }),
            Self::Timeout { stdout, stderr, .. } => Some(ExecutionDetails {
                stdout: stdout.clone(),
                stderr: stderr.clone(),
                exit_code: None,
            }),
            Self::Launch(_) => None,
        }
    }
}

/// Runs one workflow file to completion on the worker.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    async fn run(&self, workflow_path: &Path, timeout: Duration) -> Result<ProcessOutput, RunError>;
}

/// Runner that invokes the `comfy` CLI.
pub struct ComfyCliRunner {
    program: String,
}

impl ComfyCliRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, workflow_path: &Path, timeout: Duration) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("run")
            .arg("--workflow")
            .arg(workflow_path)
            .arg("--wait")
            .arg("--timeout")
            .arg(timeout.as_secs().to_string())
            .arg("--verbose");
        cmd
    }
}

#[async_trait]
impl WorkflowRunner for ComfyCliRunner {
    async fn run(&self, workflow_path: &Path, timeout: Duration) -> Result<ProcessOutput, RunError> {
        let mut cmd = self.command(workflow_path, timeout);
        tracing::info!(
            program = %self.program,
            workflow = %workflow_path.display(),
            timeout_secs = timeout.as_secs(),
            "Executing workflow",
        );

        let output = match subprocess::run_command(&mut cmd, timeout).await {
            Ok(output) => output,
            Err(ProcessError::Timeout {
                elapsed_ms,
                stdout,
                stderr,
            }) => {
                return Err(RunError::Timeout {
                    elapsed_ms,
                    stdout,
                    stderr,
                })
            }
            Err(ProcessError::Io(e)) => return Err(RunError::Launch(e.to_string())),
        };

        tracing::debug!(stdout = %output.stdout, "Command output");
        if !output.success() {
            tracing::debug!(stderr = %output.stderr, "Command error");
            return Err(RunError::Failed {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
