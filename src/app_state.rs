use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{coordinator::Coordinator, queue::TaskQueue, storage::ArtifactStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub coordinator: Arc<Coordinator>,
}

impl AppState {
    pub fn new(config: AppConfig, storage: ArtifactStore, queue: Arc<dyn TaskQueue>) -> Self {
        let coordinator = Coordinator::new(
            Arc::new(storage),
            queue,
            config.callback_url(),
            config.max_upload_bytes,
        );

        Self {
            config: Arc::new(config),
            coordinator: Arc::new(coordinator),
        }
    }
}
