use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fotobox::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{queue::RedisTaskQueue, storage::ArtifactStore},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing fotobox coordinator");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "fotobox_jobs_submitted_total",
        "Total processing tasks submitted"
    );
    metrics::describe_counter!(
        "fotobox_dispatch_failures_total",
        "Uploads rejected because the task could not be queued"
    );
    metrics::describe_counter!(
        "fotobox_processed_published_total",
        "Processed images accepted from workers"
    );
    metrics::describe_counter!(
        "fotobox_publish_conflicts_total",
        "Duplicate publishes rejected by the write-once rule"
    );

    // Initialize artifact storage
    tracing::info!(
        upload_dir = %config.upload_dir.display(),
        processed_dir = %config.processed_dir.display(),
        "Initializing artifact store"
    );
    let storage = ArtifactStore::new(&config.upload_dir, &config.processed_dir)
        .expect("Failed to initialize artifact store");

    // Initialize Redis task queue
    tracing::info!("Connecting to Redis task queue");
    let queue = RedisTaskQueue::new(&config.redis_url, config.task_max_retries, config.result_ttl())
        .expect("Failed to initialize task queue");

    tracing::info!(callback_url = %config.callback_url(), "Workers will call back to coordinator");

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, storage, Arc::new(queue));

    let app = routes::router(state).route(
        "/metrics",
        get(routes::metrics::render_metrics).with_state(prometheus_handle),
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
