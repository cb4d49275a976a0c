use fotobox::{
    config::AppConfig,
    services::{pipeline::Pipeline, queue::RedisTaskQueue, worker::Worker},
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting fotobox worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.worker_metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        tracing::info!(%addr, "Serving worker metrics");
    }
    metrics::describe_counter!("fotobox_tasks_completed_total", "Tasks that finished successfully");
    metrics::describe_counter!("fotobox_tasks_failed_total", "Task runs that failed");
    metrics::describe_histogram!(
        "fotobox_task_duration_seconds",
        "Wall time of one task run, fetch through publish"
    );

    // Initialize services
    tracing::info!("Connecting to Redis task queue");
    let queue = RedisTaskQueue::new(&config.redis_url, config.task_max_retries, config.result_ttl())
        .expect("Failed to initialize task queue");
    match queue.queue_depth().await {
        Ok(depth) => tracing::info!(depth, "Task queue reachable"),
        Err(e) => tracing::warn!(error = %e, "Task queue not reachable yet, will keep polling"),
    }

    std::fs::create_dir_all(&config.scratch_dir).expect("Failed to create scratch directory");
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .user_agent(concat!("fotobox-worker/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("Failed to build HTTP client");
    let pipeline = Pipeline::new(http, &config.scratch_dir);

    let consumer = config
        .worker_id
        .clone()
        .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()));

    let worker = Worker::new(
        Arc::new(queue),
        Arc::new(pipeline),
        consumer,
        config.worker_concurrency,
        config.poll_interval(),
    )
    .with_heartbeat_interval(config.heartbeat_interval());

    if let Err(e) = worker.recover().await {
        tracing::error!(error = %e, "Failed to requeue stranded tasks");
    }

    tracing::info!(
        consumer = %worker.consumer(),
        concurrency = config.worker_concurrency,
        "Worker ready, starting task processing loop"
    );

    worker
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await;
}
