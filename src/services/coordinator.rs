use std::sync::Arc;

use crate::models::job::{Identifier, JobStatus, PublishAck};
use crate::models::task::{ProcessImageArgs, Style, TaskState, PROCESS_IMAGE_TASK};
use crate::services::queue::{QueueError, TaskQueue};
use crate::services::storage::{ArtifactStore, Namespace, StorageError, StoredArtifact};

/// A job accepted for processing.
#[derive(Debug, Clone)]
pub struct Submission {
    pub task_id: String,
    pub image_id: Identifier,
    pub style: Style,
}

/// Client-facing view of a task's result slot.
#[derive(Debug, Clone)]
pub struct JobState {
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
}

/// Accepts uploads, dispatches tasks, and brokers artifacts between clients and workers.
///
/// Holds no mutable state of its own; everything shared lives in the
/// artifact store and the task queue.
pub struct Coordinator {
    store: Arc<ArtifactStore>,
    queue: Arc<dyn TaskQueue>,
    callback_url: String,
    max_upload_bytes: usize,
}

impl Coordinator {
    pub fn new(
        store: Arc<ArtifactStore>,
        queue: Arc<dyn TaskQueue>,
        callback_url: impl Into<String>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            store,
            queue,
            callback_url: callback_url.into(),
            max_upload_bytes,
        }
    }

    fn check_payload(&self, image: Option<Vec<u8>>) -> Result<Vec<u8>, CoordinatorError> {
        let image = image
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| CoordinatorError::Validation("No image file provided".to_string()))?;
        if image.len() > self.max_upload_bytes {
            return Err(CoordinatorError::PayloadTooLarge {
                size: image.len(),
                limit: self.max_upload_bytes,
            });
        }
        Ok(image)
    }

    /// Persist an uploaded image and submit its processing task.
    ///
    /// If the queue refuses the task, the stored upload is removed before the
    /// error is returned.
    pub async fn submit(
        &self,
        image: Option<Vec<u8>>,
        style: Style,
    ) -> Result<Submission, CoordinatorError> {
        let image = self.check_payload(image)?;
        let image_id = Identifier::generate();

        self.store
            .put_new(Namespace::Unprocessed, &image_id, image)
            .await?;

        let args = ProcessImageArgs {
            image_id: image_id.to_string(),
            server_url: self.callback_url.clone(),
            style,
        };
        let args = match serde_json::to_value(&args) {
            Ok(args) => args,
            Err(e) => {
                self.discard_upload(&image_id).await;
                return Err(CoordinatorError::Dispatch(QueueError::Serialize(e)));
            }
        };

        match self.queue.submit(PROCESS_IMAGE_TASK, args).await {
            Ok(task_id) => {
                metrics::counter!("fotobox_jobs_submitted_total").increment(1);
                tracing::info!(task_id = %task_id, image_id = %image_id, style = %style, "Task submitted");
                Ok(Submission {
                    task_id,
                    image_id,
                    style,
                })
            }
            Err(e) => {
                metrics::counter!("fotobox_dispatch_failures_total").increment(1);
                tracing::error!(image_id = %image_id, error = %e, "Task submission failed");
                self.discard_upload(&image_id).await;
                Err(CoordinatorError::Dispatch(e))
            }
        }
    }

    async fn discard_upload(&self, image_id: &Identifier) {
        if let Err(e) = self.store.delete(Namespace::Unprocessed, image_id).await {
            tracing::error!(image_id = %image_id, error = %e, "Failed to remove orphaned upload");
        }
    }

    /// Look up a task's status from the queue's result slot.
    pub async fn status(&self, task_id: &str) -> Result<JobState, CoordinatorError> {
        let task_id = parse_id("task_id", task_id)?;
        let slot = self
            .queue
            .get_result(task_id.as_str())
            .await
            .map_err(CoordinatorError::Queue)?;

        if let TaskState::Other(name) = &slot.state {
            tracing::warn!(task_id = %task_id, state = %name, "Unknown queue state, reporting failure");
        }

        let status = JobStatus::from_task_state(&slot.state);
        let result = match status {
            JobStatus::Completed => slot.result,
            JobStatus::Processing | JobStatus::Failed => None,
        };
        Ok(JobState { status, result })
    }

    /// Processed artifact for a client.
    pub async fn fetch_processed(&self, image_id: &str) -> Result<StoredArtifact, CoordinatorError> {
        let image_id = parse_id("image_id", image_id)?;
        Ok(self.store.open(Namespace::Processed, &image_id).await?)
    }

    /// Unprocessed artifact for a worker.
    pub async fn serve_unprocessed(
        &self,
        image_id: &str,
    ) -> Result<StoredArtifact, CoordinatorError> {
        let image_id = parse_id("image_id", image_id)?;
        Ok(self.store.open(Namespace::Unprocessed, &image_id).await?)
    }

    /// Store a worker's output. Each image accepts exactly one processed artifact.
    pub async fn accept_processed(
        &self,
        image_id: &str,
        image: Option<Vec<u8>>,
    ) -> Result<PublishAck, CoordinatorError> {
        let image_id = parse_id("image_id", image_id)?;
        let image = self.check_payload(image)?;

        match self.store.put_new(Namespace::Processed, &image_id, image).await {
            Ok(()) => {
                metrics::counter!("fotobox_processed_published_total").increment(1);
                tracing::info!(image_id = %image_id, "Processed image stored");
                Ok(PublishAck {
                    status: "success".to_string(),
                    image_id: image_id.to_string(),
                })
            }
            Err(StorageError::AlreadyExists { .. }) => {
                metrics::counter!("fotobox_publish_conflicts_total").increment(1);
                tracing::warn!(image_id = %image_id, "Rejected duplicate publish");
                Err(CoordinatorError::Conflict(format!(
                    "Processed image {image_id} already exists"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }
}

fn parse_id(field: &str, raw: &str) -> Result<Identifier, CoordinatorError> {
    Identifier::parse(raw).map_err(|e| {
        tracing::debug!(field, value = %raw, error = %e, "Rejected malformed identifier");
        CoordinatorError::Validation(format!("Invalid {field}"))
    })
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("{0}")]
    Validation(String),

    #[error("Payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Task dispatch failed: {0}")]
    Dispatch(#[source] QueueError),

    #[error("Task queue unavailable: {0}")]
    Queue(#[source] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),
}

impl From<StorageError> for CoordinatorError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => CoordinatorError::NotFound("Image not found".to_string()),
            StorageError::AlreadyExists { namespace, id } => {
                CoordinatorError::Conflict(format!("Image {namespace}/{id} already exists"))
            }
            other => CoordinatorError::Storage(other),
        }
    }
}
