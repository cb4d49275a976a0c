use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr};

/// Queue task name the worker registers the image pipeline under.
pub const PROCESS_IMAGE_TASK: &str = "tasks.process_image_task";

/// Processing styles a client can pick with `prompt_id`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    FromRepr,
)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Style {
    /// Byte-identical copy of the input.
    #[default]
    Original = 0,
    Monochrome = 1,
    Mirror = 2,
}

impl Style {
    /// Resolve a `prompt_id` form value. Only the listed integers are accepted.
    pub fn from_prompt_id(raw: &str) -> Option<Self> {
        raw.trim().parse::<u8>().ok().and_then(Style::from_repr)
    }
}

/// Arguments carried by a `tasks.process_image_task` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessImageArgs {
    pub image_id: String,
    /// Coordinator base URL the worker fetches from and publishes to.
    pub server_url: String,
    #[serde(default)]
    pub style: Style,
}

/// Value a successful image task stores in its result slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessImageOutput {
    pub status: String,
    pub image_id: String,
}

impl ProcessImageOutput {
    pub fn success(image_id: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            image_id: image_id.into(),
        }
    }
}

/// Queue-native task state as recorded in the result slot.
///
/// Unrecognised names are kept verbatim in `Other` so they can be logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskState {
    Pending,
    Success,
    Failure,
    Other(String),
}

impl TaskState {
    pub fn as_str(&self) -> &str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Other(name) => name,
        }
    }
}

impl From<String> for TaskState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PENDING" => TaskState::Pending,
            "SUCCESS" => TaskState::Success,
            "FAILURE" => TaskState::Failure,
            _ => TaskState::Other(value),
        }
    }
}

impl From<TaskState> for String {
    fn from(value: TaskState) -> Self {
        value.as_str().to_string()
    }
}

/// Contents of a task's result slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_done: Option<DateTime<Utc>>,
}

impl TaskResult {
    /// A slot that has not been written yet.
    pub fn pending() -> Self {
        Self {
            state: TaskState::Pending,
            result: None,
            error: None,
            date_done: None,
        }
    }

    pub fn success(result: serde_json::Value) -> Self {
        Self {
            state: TaskState::Success,
            result: Some(result),
            error: None,
            date_done: Some(Utc::now()),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            state: TaskState::Failure,
            result: None,
            error: Some(error.into()),
            date_done: Some(Utc::now()),
        }
    }
}
