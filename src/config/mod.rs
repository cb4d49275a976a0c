use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:5000"). Unused by worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the task queue and its result slots
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Directory holding unprocessed uploads
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Directory holding processed artifacts
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,

    /// Worker scratch directory for staged inputs and transform outputs
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Externally reachable coordinator URL, handed to workers as the callback base
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Route prefix shared by every endpoint (e.g., "/kifotobox"). Empty mounts at root.
    #[serde(default)]
    pub base_path: String,

    /// Upper bound on any request body carrying an image
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Timeout for worker fetch/publish calls against the coordinator
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// How many times a retriable task failure is redelivered before it is recorded as failed
    #[serde(default = "default_task_max_retries")]
    pub task_max_retries: u32,

    /// Lifetime of a task's result slot
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,

    /// Maximum tasks a single worker process runs at once
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Sleep between queue polls when no task is available
    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    /// Seconds between worker heartbeats; a worker silent for three intervals
    /// has its in-flight tasks requeued by its peers
    #[serde(default = "default_worker_heartbeat_secs")]
    pub worker_heartbeat_secs: u64,

    /// Worker identity; keys the worker's in-flight list and heartbeat
    pub worker_id: Option<String>,

    /// Optional Prometheus listener address for the worker process
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("/app/uploads")
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from("/app/processed")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("/app/tmp")
}

fn default_server_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_http_timeout_secs() -> u64 {
    60
}

fn default_task_max_retries() -> u32 {
    3
}

fn default_result_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_worker_poll_interval_ms() -> u64 {
    1000
}

fn default_worker_heartbeat_secs() -> u64 {
    10
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Base URL workers use to reach the coordinator, including the route prefix.
    pub fn callback_url(&self) -> String {
        format!(
            "{}{}",
            self.server_url.trim_end_matches('/'),
            self.normalized_base_path()
        )
    }

    /// Route prefix with a leading slash and no trailing slash, or empty.
    pub fn normalized_base_path(&self) -> String {
        let trimmed = self.base_path.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{trimmed}")
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.worker_heartbeat_secs.max(1))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            redis_url: default_redis_url(),
            upload_dir: default_upload_dir(),
            processed_dir: default_processed_dir(),
            scratch_dir: default_scratch_dir(),
            server_url: default_server_url(),
            base_path: String::new(),
            max_upload_bytes: default_max_upload_bytes(),
            http_timeout_secs: default_http_timeout_secs(),
            task_max_retries: default_task_max_retries(),
            result_ttl_secs: default_result_ttl_secs(),
            worker_concurrency: default_worker_concurrency(),
            worker_poll_interval_ms: default_worker_poll_interval_ms(),
            worker_heartbeat_secs: default_worker_heartbeat_secs(),
            worker_id: None,
            worker_metrics_addr: None,
        }
    }
}
