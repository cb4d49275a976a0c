use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use super::{settle_outcome, QueueError, Settlement, TaskMessage, TaskOutcome, TaskQueue};
use crate::models::task::TaskResult;

const QUEUE_KEY: &str = "fotobox:tasks";
const PROCESSING_KEY_PREFIX: &str = "fotobox:processing";
const RESULT_KEY_PREFIX: &str = "fotobox:result";
const HEARTBEAT_KEY_PREFIX: &str = "fotobox:worker";
const SCAN_BATCH: usize = 100;

fn processing_key(consumer: &str) -> String {
    format!("{PROCESSING_KEY_PREFIX}:{consumer}")
}

fn result_key(task_id: &str) -> String {
    format!("{RESULT_KEY_PREFIX}:{task_id}")
}

fn heartbeat_key(consumer: &str) -> String {
    format!("{HEARTBEAT_KEY_PREFIX}:{consumer}")
}

/// Redis-backed task queue.
///
/// Pending tasks sit on a list; a claimed task moves atomically to the
/// consumer's own in-flight list until it is settled. Result slots are plain
/// keys written with `SET NX EX`, so they vanish after the result TTL. Live
/// consumers refresh an expiring heartbeat key; the in-flight list of a
/// consumer without one is up for reclaim.
pub struct RedisTaskQueue {
    client: redis::Client,
    max_retries: u32,
    result_ttl: Duration,
}

impl RedisTaskQueue {
    pub fn new(redis_url: &str, max_retries: u32, result_ttl: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            max_retries,
            result_ttl,
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Get the current queue depth (pending tasks).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn submit(&self, task_name: &str, args: serde_json::Value) -> Result<String, QueueError> {
        let message = TaskMessage::new(task_name, args);
        let payload = serde_json::to_string(&message).map_err(QueueError::Serialize)?;

        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;

        Ok(message.task_id)
    }

    async fn get_result(&self, task_id: &str) -> Result<TaskResult, QueueError> {
        let mut conn = self.connection().await?;
        let slot: Option<String> = conn
            .get(result_key(task_id))
            .await
            .map_err(QueueError::Redis)?;

        match slot {
            Some(payload) => Ok(serde_json::from_str(&payload).map_err(QueueError::Serialize)?),
            None => Ok(TaskResult::pending()),
        }
    }

    async fn claim(&self, consumer: &str) -> Result<Option<TaskMessage>, QueueError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .rpoplpush(QUEUE_KEY, processing_key(consumer))
            .await
            .map_err(QueueError::Redis)?;

        match payload {
            Some(payload) => match serde_json::from_str::<TaskMessage>(&payload) {
                Ok(message) => Ok(Some(message)),
                Err(e) => {
                    // Undecodable messages can never run; drop them instead of redelivering forever.
                    tracing::error!(error = %e, payload = %payload, "Discarding malformed task message");
                    conn.lrem::<_, _, ()>(processing_key(consumer), 1, &payload)
                        .await
                        .map_err(QueueError::Redis)?;
                    Err(QueueError::Serialize(e))
                }
            },
            None => Ok(None),
        }
    }

    async fn settle(
        &self,
        consumer: &str,
        message: &TaskMessage,
        outcome: TaskOutcome,
    ) -> Result<(), QueueError> {
        let claimed = serde_json::to_string(message).map_err(QueueError::Serialize)?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        match settle_outcome(message, outcome, self.max_retries) {
            Settlement::Requeue(next) => {
                let payload = serde_json::to_string(&next).map_err(QueueError::Serialize)?;
                pipe.lpush(QUEUE_KEY, payload).ignore();
            }
            Settlement::Record(slot) => {
                let payload = serde_json::to_string(&slot).map_err(QueueError::Serialize)?;
                pipe.cmd("SET")
                    .arg(result_key(&message.task_id))
                    .arg(payload)
                    .arg("NX")
                    .arg("EX")
                    .arg(self.result_ttl.as_secs().max(1))
                    .ignore();
            }
        }
        pipe.lrem(processing_key(consumer), 1, claimed).ignore();

        let mut conn = self.connection().await?;
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn recover(&self, consumer: &str) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let mut recovered = 0;
        loop {
            let moved: Option<String> = conn
                .rpoplpush(processing_key(consumer), QUEUE_KEY)
                .await
                .map_err(QueueError::Redis)?;
            if moved.is_none() {
                break;
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn heartbeat(&self, consumer: &str, ttl: Duration) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(
            heartbeat_key(consumer),
            chrono::Utc::now().to_rfc3339(),
            ttl.as_secs().max(1),
        )
        .await
        .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn reclaim_abandoned(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{PROCESSING_KEY_PREFIX}:*");

        let mut in_flight_keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(QueueError::Redis)?;
            in_flight_keys.extend(keys);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let prefix = format!("{PROCESSING_KEY_PREFIX}:");
        let mut reclaimed = 0;
        for key in in_flight_keys {
            let Some(consumer) = key.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let alive: bool = conn
                .exists(heartbeat_key(consumer))
                .await
                .map_err(QueueError::Redis)?;
            if alive {
                continue;
            }

            let mut moved_for_consumer = 0;
            loop {
                let moved: Option<String> = conn
                    .rpoplpush(&key, QUEUE_KEY)
                    .await
                    .map_err(QueueError::Redis)?;
                if moved.is_none() {
                    break;
                }
                moved_for_consumer += 1;
            }
            if moved_for_consumer > 0 {
                tracing::warn!(
                    consumer,
                    reclaimed = moved_for_consumer,
                    "Requeued tasks from consumer with lapsed heartbeat"
                );
            }
            reclaimed += moved_for_consumer;
        }
        Ok(reclaimed)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}
