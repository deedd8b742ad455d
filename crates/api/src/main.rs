use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use comfyq_comfyui::api::ComfyUIApi;
use comfyq_comfyui::executor::JobExecutor;
use comfyq_comfyui::health::HealthMonitor;
use comfyq_comfyui::runner::ComfyCliRunner;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comfyq_api::background;
use comfyq_api::config::ServerConfig;
use comfyq_api::engine::registry::JobRegistry;
use comfyq_api::router::build_app_router;
use comfyq_api::shutdown;
use comfyq_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "comfyq_api=debug,comfyq_comfyui=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        comfyui_url = %config.worker.comfyui_url,
        output_dir = %config.worker.output_dir.display(),
        max_concurrent_jobs = config.worker.max_concurrent_jobs,
        "Loaded server configuration"
    );

    // --- Worker collaborators ---
    let api = ComfyUIApi::new(&config.worker.comfyui_url, config.worker.probe_timeout())
        .expect("Failed to build ComfyUI HTTP client");
    let health = Arc::new(HealthMonitor::new(api));
    let runner = Arc::new(ComfyCliRunner::new(config.worker.comfy_bin.clone()));
    let executor = Arc::new(JobExecutor::new(
        Arc::clone(&health),
        runner,
        config.worker.executor_config(),
    ));
    let registry = Arc::new(JobRegistry::new(Arc::clone(&executor)));
    tracing::info!("Job executor and registry ready");

    // --- Background tasks ---
    let retention_cancel = CancellationToken::new();
    let retention_handle = tokio::spawn(background::job_retention::run(
        Arc::clone(&registry),
        config.worker.job_retention(),
        retention_cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        registry: Arc::clone(&registry),
        executor,
        health: Arc::clone(&health),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    let unhealthy_drain = config.worker.shutdown_when_unhealthy.then(|| {
        shutdown::drain_when_unhealthy(
            health.drain_token(),
            Arc::clone(&registry),
            config.worker.run_timeout() + config.shutdown_timeout(),
            config.shutdown_timeout(),
        )
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal(unhealthy_drain))
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    retention_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;
    tracing::info!("Job retention task stopped");

    let counts = registry.counts().await;
    tracing::info!(running = counts.running, "Waiting for in-flight jobs");
    if registry.shutdown(config.shutdown_timeout()).await {
        tracing::info!("All in-flight jobs finished");
    } else {
        tracing::warn!(
            timeout_secs = config.shutdown_timeout_secs,
            "In-flight jobs still running at shutdown deadline"
        );
    }

    tracing::info!("Graceful shutdown complete");
}
