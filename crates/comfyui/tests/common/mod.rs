#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::routing::get;
use axum::{Json, Router};
use comfyq_comfyui::api::ComfyUIApi;
use comfyq_comfyui::executor::{ExecutorConfig, JobExecutor};
use comfyq_comfyui::health::HealthMonitor;
use comfyq_comfyui::runner::{RunError, WorkflowRunner};
use comfyq_comfyui::subprocess::ProcessOutput;
use comfyq_core::job::{JobStage, StageObserver};
use comfyq_core::types::JobId;
use comfyq_core::workflow;

/// Start a fake ComfyUI server answering `/system_stats` and return its URL.
pub async fn spawn_worker() -> String {
    let router = Router::new().route(
        "/system_stats",
        get(|| async { Json(serde_json::json!({"system": {"comfyui_version": "test"}})) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

/// A URL on which nothing is listening.
pub fn dead_worker_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}

pub fn monitor(url: &str) -> Arc<HealthMonitor> {
    let api = ComfyUIApi::new(url, Duration::from_secs(2)).expect("client");
    Arc::new(HealthMonitor::new(api))
}

pub fn executor(
    health: Arc<HealthMonitor>,
    runner: Arc<dyn WorkflowRunner>,
    scratch_dir: &Path,
    output_dir: &Path,
) -> JobExecutor {
    JobExecutor::new(
        health,
        runner,
        ExecutorConfig {
            scratch_dir: scratch_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            run_timeout: Duration::from_secs(10),
            max_concurrent_jobs: 5,
        },
    )
}

pub fn workflow_with_prefix(prefix: &str) -> serde_json::Value {
    serde_json::json!({
        "3": {"class_type": "KSampler", "inputs": {"seed": 42, "steps": 20}},
        "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": prefix, "images": ["8", 0]}}
    })
}

/// Stand-in for `comfy run`: reads the payload file and writes one image
/// per output declaration into the output directory.
pub struct ImageWritingRunner {
    pub output_dir: PathBuf,
    pub calls: AtomicUsize,
    pub seen_paths: Mutex<Vec<PathBuf>>,
}

impl ImageWritingRunner {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            calls: AtomicUsize::new(0),
            seen_paths: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowRunner for ImageWritingRunner {
    async fn run(&self, workflow_path: &Path, _timeout: Duration) -> Result<ProcessOutput, RunError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_paths
            .lock()
            .expect("lock")
            .push(workflow_path.to_path_buf());

        let bytes = tokio::fs::read(workflow_path)
            .await
            .map_err(|e| RunError::Launch(e.to_string()))?;
        let doc: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| RunError::Launch(e.to_string()))?;
        let nodes = doc.as_object().cloned().unwrap_or_default();

        for decl in workflow::output_declarations(&nodes) {
            let name = format!("{}_00001_.png", decl.filename_prefix);
            let content = format!("image:{}", decl.filename_prefix);
            tokio::fs::write(self.output_dir.join(name), content)
                .await
                .map_err(|e| RunError::Launch(e.to_string()))?;
        }

        Ok(ProcessOutput {
            stdout: "Workflow completed".into(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms: 1,
        })
    }
}

/// Runner that holds every call until released, recording how many calls
/// were inside it at once.
#[derive(Default)]
pub struct GatedRunner {
    pub release: tokio::sync::Notify,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
}

impl GatedRunner {
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Wait until `n` calls have entered the runner in total.
    pub async fn wait_for_calls(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.calls() < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "runner saw {} calls, expected {n}",
                self.calls()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl WorkflowRunner for GatedRunner {
    async fn run(&self, _workflow_path: &Path, _timeout: Duration) -> Result<ProcessOutput, RunError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        self.release.notified().await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(ProcessOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms: 1,
        })
    }
}

/// Runner that succeeds without producing anything.
pub struct SilentRunner;

#[async_trait]
impl WorkflowRunner for SilentRunner {
    async fn run(&self, _workflow_path: &Path, _timeout: Duration) -> Result<ProcessOutput, RunError> {
        Ok(ProcessOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms: 1,
        })
    }
}

/// Runner whose worker reports failure.
pub struct FailingRunner;

#[async_trait]
impl WorkflowRunner for FailingRunner {
    async fn run(&self, _workflow_path: &Path, _timeout: Duration) -> Result<ProcessOutput, RunError> {
        Err(RunError::Failed {
            exit_code: Some(1),
            stdout: "Loading checkpoint".into(),
            stderr: "CUDA out of memory".into(),
        })
    }
}

/// Observer that records every stage it is told about.
#[derive(Default)]
pub struct RecordingObserver {
    pub stages: Mutex<Vec<JobStage>>,
}

impl RecordingObserver {
    pub fn stages(&self) -> Vec<JobStage> {
        self.stages.lock().expect("lock").clone()
    }
}

#[async_trait]
impl StageObserver for RecordingObserver {
    async fn stage_changed(&self, _job_id: JobId, stage: JobStage) {
        self.stages.lock().expect("lock").push(stage);
    }
}
