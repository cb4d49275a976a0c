use std::path::PathBuf;

use crate::models::job::Identifier;
use crate::models::task::{ProcessImageArgs, ProcessImageOutput, PROCESS_IMAGE_TASK};
use crate::services::coordinator_client::{ClientError, CoordinatorClient};
use crate::services::queue::TaskMessage;
use crate::services::transform::{self, TransformError};

/// Executes image tasks: fetch, stage, transform, publish.
///
/// Each run gets its own scratch directory under `scratch_dir`, removed when
/// the run ends regardless of which step failed.
pub struct Pipeline {
    http: reqwest::Client,
    scratch_dir: PathBuf,
}

impl Pipeline {
    pub fn new(http: reqwest::Client, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            http,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Run a claimed task and return the value for its result slot.
    pub async fn run(&self, message: &TaskMessage) -> Result<serde_json::Value, PipelineError> {
        if message.task_name != PROCESS_IMAGE_TASK {
            return Err(PipelineError::UnknownTask(message.task_name.clone()));
        }

        let args: ProcessImageArgs = serde_json::from_value(message.args.clone())
            .map_err(|e| PipelineError::InvalidArgs(e.to_string()))?;
        let output = self.process_image(&args).await?;

        serde_json::to_value(output).map_err(|e| PipelineError::InvalidArgs(e.to_string()))
    }

    pub async fn process_image(
        &self,
        args: &ProcessImageArgs,
    ) -> Result<ProcessImageOutput, PipelineError> {
        let image_id = Identifier::parse(args.image_id.as_str())
            .map_err(|e| PipelineError::InvalidArgs(format!("image_id: {e}")))?;
        let coordinator = CoordinatorClient::new(self.http.clone(), args.server_url.as_str());

        // 1. Fetch
        tracing::debug!(
            image_id = %image_id,
            coordinator = %coordinator.base_url(),
            "Fetching unprocessed image"
        );
        let raw = coordinator
            .fetch_unprocessed(&image_id)
            .await
            .map_err(PipelineError::Fetch)?;

        // 2. Stage
        let workspace = tempfile::Builder::new()
            .prefix("task-")
            .tempdir_in(&self.scratch_dir)
            .map_err(PipelineError::Stage)?;
        let input = workspace.path().join("input.jpg");
        let output = workspace.path().join("output.jpg");
        tokio::fs::write(&input, raw)
            .await
            .map_err(PipelineError::Stage)?;
        tracing::debug!(image_id = %image_id, path = %input.display(), "Staged unprocessed image");

        // 3. Transform
        let transform = transform::for_style(args.style);
        let (src, dst) = (input.clone(), output.clone());
        tokio::task::spawn_blocking(move || transform.apply(&src, &dst))
            .await
            .map_err(|e| PipelineError::Stage(std::io::Error::other(e)))?
            .map_err(PipelineError::Transform)?;

        let processed = tokio::fs::read(&output)
            .await
            .map_err(PipelineError::Stage)?;
        tracing::debug!(
            image_id = %image_id,
            style = %args.style,
            bytes = processed.len(),
            "Transform complete"
        );

        // 4. Publish
        coordinator
            .publish_processed(&image_id, processed)
            .await
            .map_err(PipelineError::Publish)?;

        // 5. Cleanup happens when `workspace` drops, on this path and every early return above.
        drop(workspace);

        tracing::info!(image_id = %image_id, style = %args.style, "Published processed image");
        Ok(ProcessImageOutput::success(image_id.as_str()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Invalid task arguments: {0}")]
    InvalidArgs(String),

    #[error("Failed to fetch unprocessed image: {0}")]
    Fetch(#[source] ClientError),

    #[error("Failed to stage image in scratch space: {0}")]
    Stage(#[source] std::io::Error),

    #[error("Transform failed: {0}")]
    Transform(#[source] TransformError),

    #[error("Failed to publish processed image: {0}")]
    Publish(#[source] ClientError),
}

impl PipelineError {
    /// Whether another delivery of the same task could succeed.
    ///
    /// A publish conflict means the task already ran; repeating it can only conflict again.
    pub fn is_retriable(&self) -> bool {
        match self {
            PipelineError::Fetch(_) | PipelineError::Stage(_) => true,
            PipelineError::Publish(ClientError::Conflict(_)) => false,
            PipelineError::Publish(_) => true,
            PipelineError::UnknownTask(_)
            | PipelineError::InvalidArgs(_)
            | PipelineError::Transform(_) => false,
        }
    }
}
