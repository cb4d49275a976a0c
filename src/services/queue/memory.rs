use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{settle_outcome, QueueError, Settlement, TaskMessage, TaskOutcome, TaskQueue};
use crate::models::task::TaskResult;

#[derive(Default)]
struct MemoryState {
    pending: VecDeque<TaskMessage>,
    in_flight: HashMap<String, Vec<TaskMessage>>,
    results: HashMap<String, TaskResult>,
    heartbeats: HashMap<String, Instant>,
    submitted: usize,
}

/// In-process task queue with the same delivery and result-slot rules as
/// [`super::RedisTaskQueue`]. Results never expire.
pub struct InMemoryTaskQueue {
    state: Mutex<MemoryState>,
    max_retries: u32,
    reject_submissions: AtomicBool,
}

impl InMemoryTaskQueue {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            max_retries,
            reject_submissions: AtomicBool::new(false),
        }
    }

    /// Make subsequent submissions fail as if the broker were unreachable.
    pub fn reject_submissions(&self, reject: bool) {
        self.reject_submissions.store(reject, Ordering::SeqCst);
    }

    /// Number of tasks accepted so far.
    pub fn submitted(&self) -> usize {
        self.lock().map(|s| s.submitted).unwrap_or_default()
    }

    /// Number of tasks waiting to be claimed.
    pub fn pending_len(&self) -> usize {
        self.lock().map(|s| s.pending.len()).unwrap_or_default()
    }

    /// Overwrite a result slot directly, bypassing first-write-wins.
    ///
    /// Lets callers simulate broker states this crate never writes itself.
    pub fn force_result(&self, task_id: &str, result: TaskResult) -> Result<(), QueueError> {
        self.lock()?.results.insert(task_id.to_string(), result);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, QueueError> {
        self.state
            .lock()
            .map_err(|e| QueueError::Unavailable(format!("queue state poisoned: {e}")))
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn submit(&self, task_name: &str, args: serde_json::Value) -> Result<String, QueueError> {
        if self.reject_submissions.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("submissions are rejected".to_string()));
        }

        let message = TaskMessage::new(task_name, args);
        let task_id = message.task_id.clone();
        let mut state = self.lock()?;
        state.pending.push_back(message);
        state.submitted += 1;
        Ok(task_id)
    }

    async fn get_result(&self, task_id: &str) -> Result<TaskResult, QueueError> {
        Ok(self
            .lock()?
            .results
            .get(task_id)
            .cloned()
            .unwrap_or_else(TaskResult::pending))
    }

    async fn claim(&self, consumer: &str) -> Result<Option<TaskMessage>, QueueError> {
        let mut state = self.lock()?;
        let Some(message) = state.pending.pop_front() else {
            return Ok(None);
        };
        state
            .in_flight
            .entry(consumer.to_string())
            .or_default()
            .push(message.clone());
        Ok(Some(message))
    }

    async fn settle(
        &self,
        consumer: &str,
        message: &TaskMessage,
        outcome: TaskOutcome,
    ) -> Result<(), QueueError> {
        let settlement = settle_outcome(message, outcome, self.max_retries);
        let mut state = self.lock()?;

        if let Some(claimed) = state.in_flight.get_mut(consumer) {
            if let Some(pos) = claimed.iter().position(|m| m == message) {
                claimed.remove(pos);
            }
        }

        match settlement {
            Settlement::Requeue(next) => state.pending.push_back(next),
            Settlement::Record(slot) => {
                state
                    .results
                    .entry(message.task_id.clone())
                    .or_insert(slot);
            }
        }
        Ok(())
    }

    async fn recover(&self, consumer: &str) -> Result<usize, QueueError> {
        let mut state = self.lock()?;
        let stranded = state.in_flight.remove(consumer).unwrap_or_default();
        let recovered = stranded.len();
        state.pending.extend(stranded);
        Ok(recovered)
    }

    async fn heartbeat(&self, consumer: &str, ttl: Duration) -> Result<(), QueueError> {
        self.lock()?
            .heartbeats
            .insert(consumer.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn reclaim_abandoned(&self) -> Result<usize, QueueError> {
        let now = Instant::now();
        let mut state = self.lock()?;
        let lapsed: Vec<String> = state
            .in_flight
            .keys()
            .filter(|consumer| {
                state
                    .heartbeats
                    .get(*consumer)
                    .map_or(true, |expires| *expires <= now)
            })
            .cloned()
            .collect();

        let mut reclaimed = 0;
        for consumer in lapsed {
            let stranded = state.in_flight.remove(&consumer).unwrap_or_default();
            reclaimed += stranded.len();
            state.pending.extend(stranded);
            state.heartbeats.remove(&consumer);
        }
        Ok(reclaimed)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        self.lock().map(|_| ())
    }
}
