#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::routing::get as get_route;
use axum::{Json, Router};
use comfyq_api::config::{ServerConfig, WorkerConfig};
use comfyq_api::engine::registry::JobRegistry;
use comfyq_api::router::build_app_router;
use comfyq_api::state::AppState;
use comfyq_comfyui::api::ComfyUIApi;
use comfyq_comfyui::executor::JobExecutor;
use comfyq_comfyui::health::HealthMonitor;
use comfyq_comfyui::runner::{RunError, WorkflowRunner};
use comfyq_comfyui::subprocess::ProcessOutput;
use comfyq_core::job::JobStatus;
use comfyq_core::workflow;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Fake worker
// ---------------------------------------------------------------------------

/// Start a fake ComfyUI server answering `/system_stats` and return its URL.
pub async fn spawn_worker() -> String {
    let router = Router::new().route(
        "/system_stats",
        get_route(|| async { Json(serde_json::json!({"system": {"comfyui_version": "test"}})) }),
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

/// Stand-in for `comfy run`: writes one image per output declaration,
/// optionally after a delay.
pub struct ImageWritingRunner {
    pub output_dir: PathBuf,
    pub delay: Duration,
}

#[async_trait]
impl WorkflowRunner for ImageWritingRunner {
    async fn run(&self, workflow_path: &Path, _timeout: Duration) -> Result<ProcessOutput, RunError> {
        tokio::time::sleep(self.delay).await;

        let bytes = tokio::fs::read(workflow_path)
            .await
            .map_err(|e| RunError::Launch(e.to_string()))?;
        let doc: Value =
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
            duration_ms: self.delay.as_millis() as u64,
        })
    }
}

/// Runner that reports the execution ceiling was hit.
pub struct TimingOutRunner;

#[async_trait]
impl WorkflowRunner for TimingOutRunner {
    async fn run(&self, _workflow_path: &Path, timeout: Duration) -> Result<ProcessOutput, RunError> {
        Err(RunError::Timeout {
            elapsed_ms: timeout.as_millis() as u64,
            stdout: "got prompt".into(),
            stderr: String::new(),
        })
    }
}

/// Runner that holds every call until released and writes nothing.
#[derive(Default)]
pub struct GatedRunner {
    pub release: tokio::sync::Notify,
    pub calls: AtomicUsize,
}

impl GatedRunner {
    /// Wait until `n` calls have entered the runner.
    pub async fn wait_for_calls(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.calls.load(Ordering::SeqCst) < n {
            assert!(tokio::time::Instant::now() < deadline, "runner never entered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl WorkflowRunner for GatedRunner {
    async fn run(&self, _workflow_path: &Path, _timeout: Duration) -> Result<ProcessOutput, RunError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        Ok(ProcessOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            duration_ms: 1,
        })
    }
}

/// Runner that panics, standing in for an executor-side defect.
pub struct PanickingRunner;

#[async_trait]
impl WorkflowRunner for PanickingRunner {
    async fn run(&self, _workflow_path: &Path, _timeout: Duration) -> Result<ProcessOutput, RunError> {
        panic!("runner exploded");
    }
}

// ---------------------------------------------------------------------------
// App construction
// ---------------------------------------------------------------------------

/// The router plus everything a test may want to inspect or keep alive.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub output: TempDir,
    scratch: TempDir,
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config(worker_url: &str, output_dir: &Path, scratch_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        worker: WorkerConfig {
            comfyui_url: worker_url.to_string(),
            comfy_bin: "comfy".to_string(),
            output_dir: output_dir.to_path_buf(),
            scratch_dir: scratch_dir.to_path_buf(),
            probe_timeout_secs: 2,
            run_timeout_secs: 10,
            max_concurrent_jobs: 5,
            job_retention_secs: 3600,
            shutdown_when_unhealthy: false,
        },
    }
}

/// Build the full application router against `worker_url`, with a runner
/// chosen by `make_runner` from the app's output directory.
pub fn build_test_app_with<F>(worker_url: &str, make_runner: F) -> TestApp
where
    F: FnOnce(&Path) -> Arc<dyn WorkflowRunner>,
{
    let output = tempfile::tempdir().expect("output dir");
    let scratch = tempfile::tempdir().expect("scratch dir");
    let config = test_config(worker_url, output.path(), scratch.path());

    let api = ComfyUIApi::new(&config.worker.comfyui_url, config.worker.probe_timeout())
        .expect("client");
    let health = Arc::new(HealthMonitor::new(api));
    let executor = Arc::new(JobExecutor::new(
        Arc::clone(&health),
        make_runner(output.path()),
        config.worker.executor_config(),
    ));
    let registry = Arc::new(JobRegistry::new(Arc::clone(&executor)));

    let state = AppState {
        config: Arc::new(config.clone()),
        registry,
        executor,
        health,
    };
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        state,
        output,
        scratch,
    }
}

/// Build an app whose runner writes one image per output declaration.
pub fn build_test_app(worker_url: &str) -> TestApp {
    build_test_app_with(worker_url, |output| {
        Arc::new(ImageWritingRunner {
            output_dir: output.to_path_buf(),
            delay: Duration::from_millis(50),
        })
    })
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub async fn get(app: &TestApp, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn post_raw(app: &TestApp, uri: &str, body: impl Into<Body>) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &TestApp, uri: &str, json: &Value) -> Response {
    post_raw(app, uri, serde_json::to_vec(json).unwrap()).await
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

pub fn workflow_with_prefix(prefix: &str) -> Value {
    serde_json::json!({
        "3": {"class_type": "KSampler", "inputs": {"seed": 42, "steps": 20}},
        "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": prefix, "images": ["8", 0]}}
    })
}

pub fn envelope(workflow: Value) -> Value {
    serde_json::json!({ "workflow": workflow })
}

/// Submit asynchronously and return the issued handle.
pub async fn submit(app: &TestApp, workflow: Value) -> String {
    let response = post_json(app, "/submit_workflow", &envelope(workflow)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "RUNNING");
    json["id"].as_str().expect("id").to_string()
}

/// Poll `/status/{id}` until the job is terminal and return the raw body.
pub async fn poll_until_terminal(app: &TestApp, id: &str) -> Vec<u8> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let response = get(app, &format!("/status/{id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = body_bytes(response).await;
        let status: JobStatus = serde_json::from_value(
            serde_json::from_slice::<Value>(&bytes).unwrap()["status"].clone(),
        )
        .unwrap();
        if status != JobStatus::Running {
            return bytes;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
