//! Task queue interface and backends.
//!
//! The queue delivers task messages at least once and keeps one result slot
//! per task. The first terminal state written to a slot wins; later writes are
//! ignored, so a task never goes back to pending once it has completed or
//! failed.

mod memory;
mod redis_backend;

pub use memory::InMemoryTaskQueue;
pub use redis_backend::RedisTaskQueue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::models::task::TaskResult;

/// Task message as it travels through the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMessage {
    pub task_id: String,
    pub task_name: String,
    pub args: serde_json::Value,
    /// Redeliveries so far, bumped each time a retriable failure is requeued.
    #[serde(default)]
    pub retries: u32,
}

impl TaskMessage {
    pub fn new(task_name: &str, args: serde_json::Value) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            task_name: task_name.to_string(),
            args,
            retries: 0,
        }
    }
}

/// How a consumer finished a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success(serde_json::Value),
    Failure { error: String, retriable: bool },
}

/// What the queue does with a finished task.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Push the message back for another delivery; the slot stays pending.
    Requeue(TaskMessage),
    /// Write the terminal result slot.
    Record(TaskResult),
}

/// Apply the retry policy to a finished task.
pub fn settle_outcome(message: &TaskMessage, outcome: TaskOutcome, max_retries: u32) -> Settlement {
    match outcome {
        TaskOutcome::Success(value) => Settlement::Record(TaskResult::success(value)),
        TaskOutcome::Failure { error, retriable } if retriable && message.retries < max_retries => {
            tracing::info!(
                task_id = %message.task_id,
                retries = message.retries + 1,
                error = %error,
                "Requeueing task for retry"
            );
            Settlement::Requeue(TaskMessage {
                retries: message.retries + 1,
                ..message.clone()
            })
        }
        TaskOutcome::Failure { error, .. } => Settlement::Record(TaskResult::failure(error)),
    }
}

/// At-least-once task queue with a per-task result slot.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submit a task and return its queue-assigned identifier.
    async fn submit(&self, task_name: &str, args: serde_json::Value) -> Result<String, QueueError>;

    /// Read a task's result slot. A slot that was never written reads as pending.
    ///
    /// Backends may expire slots; an expired slot also reads as pending, so a
    /// finished task's status only holds for the retention window.
    async fn get_result(&self, task_id: &str) -> Result<TaskResult, QueueError>;

    /// Claim the next pending task for `consumer`, if any.
    async fn claim(&self, consumer: &str) -> Result<Option<TaskMessage>, QueueError>;

    /// Finish a claimed task: record its result or requeue it per the retry policy.
    async fn settle(
        &self,
        consumer: &str,
        message: &TaskMessage,
        outcome: TaskOutcome,
    ) -> Result<(), QueueError>;

    /// Return anything left in `consumer`'s in-flight set to the pending queue.
    async fn recover(&self, consumer: &str) -> Result<usize, QueueError>;

    /// Mark `consumer` as alive for the next `ttl`.
    async fn heartbeat(&self, consumer: &str, ttl: Duration) -> Result<(), QueueError>;

    /// Requeue the in-flight tasks of every consumer whose heartbeat has lapsed.
    ///
    /// A consumer that never sent a heartbeat counts as lapsed.
    async fn reclaim_abandoned(&self) -> Result<usize, QueueError>;

    /// Check broker connectivity (for health checks).
    async fn health_check(&self) -> Result<(), QueueError>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}
