//! Subprocess execution with a wall-clock ceiling and captured output.
//!
//! [`run_command`] spawns a prepared [`Command`], drains stdout/stderr in
//! background tasks, and kills the child if it outlives the timeout. Output
//! captured before a kill is still returned so callers can report it.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// How long to wait for the output pipes to close after killing a child.
const KILL_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Captured result of a process that exited on its own.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`None` if terminated by a signal).
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The process exceeded its timeout and was killed.
    #[error("Process timed out after {elapsed_ms}ms")]
    Timeout {
        elapsed_ms: u64,
        stdout: String,
        stderr: String,
    },

    /// Spawning or waiting on the process failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawn `cmd`, capture stdout/stderr, and enforce `timeout`.
///
/// The caller sets program, arguments, environment and working directory.
pub async fn run_command(cmd: &mut Command, timeout: Duration) -> Result<ProcessOutput, ProcessError> {
    // `kill_on_drop(true)` ensures the child dies with us if the future is dropped.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn()?;

    let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
    let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

    let wait_result = tokio::time::timeout(timeout, child.wait()).await;

    match wait_result {
        Ok(Ok(status)) => Ok(ProcessOutput {
            stdout: collect(stdout_task, None).await,
            stderr: collect(stderr_task, None).await,
            exit_code: status.code(),
            duration_ms: start.elapsed().as_millis() as u64,
        }),
        Ok(Err(e)) => Err(ProcessError::Io(e)),
        Err(_elapsed) => {
            let elapsed_ms = start.elapsed().as_millis() as u64;
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill timed-out process");
            }
            Err(ProcessError::Timeout {
                elapsed_ms,
                stdout: collect(stdout_task, Some(KILL_DRAIN_GRACE)).await,
                stderr: collect(stderr_task, Some(KILL_DRAIN_GRACE)).await,
            })
        }
    }
}

/// Await a reader task, optionally bounded, and decode it lossily.
async fn collect(task: JoinHandle<Vec<u8>>, grace: Option<Duration>) -> String {
    let bytes = match grace {
        Some(grace) => match tokio::time::timeout(grace, task).await {
            Ok(joined) => joined.unwrap_or_default(),
            Err(_) => Vec::new(),
        },
        None => task.await.unwrap_or_default(),
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
