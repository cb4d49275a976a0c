use garde::Validate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::task::{Style, TaskState};

/// An identifier accepted on an external-facing path (`image_id` or `task_id`).
///
/// Anything that reaches storage or the queue has been checked against
/// `^[A-Za-z0-9-]{10,50}$`, which also rules out path traversal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Validate)]
#[serde(transparent)]
pub struct Identifier(#[garde(pattern(r"^[A-Za-z0-9-]{10,50}$"))] String);

impl Identifier {
    /// Validate a raw identifier taken from a request.
    pub fn parse(raw: impl Into<String>) -> Result<Self, garde::Report> {
        let id = Self(raw.into());
        id.validate()?;
        Ok(id)
    }

    /// Allocate a fresh 128-bit random image identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-facing job status, derived on demand from the task queue's result slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Map a queue-native state. Anything other than pending or success is a failure.
    pub fn from_task_state(state: &TaskState) -> Self {
        match state {
            TaskState::Pending => JobStatus::Processing,
            TaskState::Success => JobStatus::Completed,
            TaskState::Failure | TaskState::Other(_) => JobStatus::Failed,
        }
    }
}

/// Response after an image is accepted for processing.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub task_id: String,
    pub image_id: Identifier,
    pub prompt: Style,
    pub status: String,
}

/// Response for querying task status.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Acknowledgement returned to a worker after a processed artifact is stored.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishAck {
    pub status: String,
    pub image_id: String,
}
