use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use comfyq_comfyui::executor::ExecutorConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for running next to a local ComfyUI.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `1300`). Must exceed the
    /// run timeout so `?wait=true` submissions can finish.
    pub request_timeout_secs: u64,
    /// How long in-flight jobs may keep running after shutdown starts (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Worker collaborator settings.
    pub worker: WorkerConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS` | `1300`                     |
    /// | `SHUTDOWN_TIMEOUT_SECS`| `30`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            host,
            port: env_or("PORT", 3000),
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 1300),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30),
            worker: WorkerConfig::from_env(),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Where the worker lives and how jobs against it are bounded.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL of the ComfyUI server (liveness interface).
    pub comfyui_url: String,
    /// Program invoked as `<bin> run --workflow <file> --wait ...`.
    pub comfy_bin: String,
    /// ComfyUI output directory scanned for artifacts.
    pub output_dir: PathBuf,
    /// Directory job payloads are written to before a run.
    pub scratch_dir: PathBuf,
    pub probe_timeout_secs: u64,
    pub run_timeout_secs: u64,
    /// Per-instance concurrency ceiling.
    pub max_concurrent_jobs: usize,
    /// How long terminal results stay pollable.
    pub job_retention_secs: u64,
    /// Once the worker is declared unhealthy, let in-flight jobs finish and
    /// then shut down so a supervisor can replace the instance.
    pub shutdown_when_unhealthy: bool,
}

impl WorkerConfig {
    /// | Env Var                     | Default                       |
    /// |-----------------------------|-------------------------------|
    /// | `COMFYUI_URL`               | `http://127.0.0.1:8188`       |
    /// | `COMFY_BIN`                 | `comfy`                       |
    /// | `COMFYUI_OUTPUT_DIR`        | `/root/comfy/ComfyUI/output`  |
    /// | `SCRATCH_DIR`               | OS temp dir                   |
    /// | `HEALTH_PROBE_TIMEOUT_SECS` | `5`                           |
    /// | `RUN_TIMEOUT_SECS`          | `1200`                        |
    /// | `MAX_CONCURRENT_JOBS`       | `5`                           |
    /// | `JOB_RETENTION_SECS`        | `3600`                        |
    /// | `SHUTDOWN_WHEN_UNHEALTHY`   | `false`                       |
    pub fn from_env() -> Self {
        Self {
            comfyui_url: std::env::var("COMFYUI_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8188".into()),
            comfy_bin: std::env::var("COMFY_BIN").unwrap_or_else(|_| "comfy".into()),
            output_dir: std::env::var("COMFYUI_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/root/comfy/ComfyUI/output")),
            scratch_dir: std::env::var("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
            probe_timeout_secs: env_or("HEALTH_PROBE_TIMEOUT_SECS", 5),
            run_timeout_secs: env_or("RUN_TIMEOUT_SECS", 1200),
            max_concurrent_jobs: env_or("MAX_CONCURRENT_JOBS", 5),
            job_retention_secs: env_or("JOB_RETENTION_SECS", 3600),
            shutdown_when_unhealthy: env_or("SHUTDOWN_WHEN_UNHEALTHY", false),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            scratch_dir: self.scratch_dir.clone(),
            output_dir: self.output_dir.clone(),
            run_timeout: self.run_timeout(),
            max_concurrent_jobs: self.max_concurrent_jobs,
        }
    }
}

/// Read `key` from the environment, falling back to `default` when unset.
///
/// Panics at startup on an unparsable value: misconfiguration should fail fast.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}
