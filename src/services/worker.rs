use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval_at, sleep, MissedTickBehavior};

use crate::services::pipeline::Pipeline;
use crate::services::queue::{QueueError, TaskMessage, TaskOutcome, TaskQueue};

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Heartbeats missed before a consumer counts as gone.
const HEARTBEAT_GRACE: u32 = 3;

/// Queue consumer that runs claimed tasks through the [`Pipeline`].
///
/// While running it refreshes a heartbeat and periodically requeues tasks
/// held by consumers whose heartbeat lapsed, so a crashed worker's tasks are
/// redelivered even if it never comes back under the same id.
pub struct Worker {
    queue: Arc<dyn TaskQueue>,
    pipeline: Arc<Pipeline>,
    consumer: String,
    concurrency: usize,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        pipeline: Arc<Pipeline>,
        consumer: impl Into<String>,
        concurrency: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            pipeline,
            consumer: consumer.into(),
            concurrency: concurrency.max(1),
            poll_interval,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    fn heartbeat_ttl(&self) -> Duration {
        self.heartbeat_interval * HEARTBEAT_GRACE
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Requeue tasks this consumer claimed but never settled, plus those held by
    /// any consumer whose heartbeat has lapsed (e.g. this process before a
    /// restart under a new id).
    pub async fn recover(&self) -> Result<usize, QueueError> {
        self.queue
            .heartbeat(&self.consumer, self.heartbeat_ttl())
            .await?;
        let own = self.queue.recover(&self.consumer).await?;
        let abandoned = self.queue.reclaim_abandoned().await?;
        let recovered = own + abandoned;
        if recovered > 0 {
            tracing::warn!(
                consumer = %self.consumer,
                own,
                abandoned,
                "Requeued stranded tasks"
            );
        }
        Ok(recovered)
    }

    /// Refresh this consumer's heartbeat and sweep lapsed consumers.
    async fn keep_alive(&self) {
        if let Err(e) = self
            .queue
            .heartbeat(&self.consumer, self.heartbeat_ttl())
            .await
        {
            tracing::error!(consumer = %self.consumer, error = %e, "Failed to refresh heartbeat");
            return;
        }
        match self.queue.reclaim_abandoned().await {
            Ok(0) => {}
            Ok(reclaimed) => tracing::warn!(reclaimed, "Requeued tasks from lapsed workers"),
            Err(e) => tracing::error!(error = %e, "Failed to reclaim abandoned tasks"),
        }
    }

    /// Claim and run a single task inline.
    /// Returns Ok(true) if a task was processed, Ok(false) if none was available.
    pub async fn run_once(&self) -> Result<bool, QueueError> {
        let Some(message) = self.queue.claim(&self.consumer).await? else {
            return Ok(false);
        };
        execute(self.queue.as_ref(), &self.pipeline, &self.consumer, message).await?;
        Ok(true)
    }

    /// Poll the queue until `shutdown` resolves, running up to `concurrency` tasks at once.
    /// In-flight tasks are allowed to finish before returning.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        self.keep_alive().await;
        let mut maintenance = interval_at(
            tokio::time::Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                _ = maintenance.tick() => {
                    self.keep_alive().await;
                    continue;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.queue.claim(&self.consumer).await {
                Ok(Some(message)) => {
                    let queue = self.queue.clone();
                    let pipeline = self.pipeline.clone();
                    let consumer = self.consumer.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        let task_id = message.task_id.clone();
                        if let Err(e) = execute(queue.as_ref(), &pipeline, &consumer, message).await {
                            // The task stays in this consumer's in-flight list until
                            // shutdown returns it, or a sweep does once the heartbeat lapses.
                            tracing::error!(task_id = %task_id, error = %e, "Failed to settle task");
                        }
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tracing::trace!("No tasks available, sleeping");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Error claiming task, will retry");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = sleep(self.poll_interval) => {}
                    }
                }
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Task runner panicked");
                }
            }
        }

        tracing::info!(in_flight = tasks.len(), "Shutting down, waiting for in-flight tasks");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Task runner panicked");
            }
        }

        // Nothing is running now; anything still in flight failed to settle.
        match self.queue.recover(&self.consumer).await {
            Ok(0) => {}
            Ok(requeued) => tracing::warn!(requeued, "Requeued unsettled tasks on shutdown"),
            Err(e) => tracing::error!(error = %e, "Failed to requeue unsettled tasks"),
        }
    }
}

/// Run one task and report its outcome to the queue.
async fn execute(
    queue: &dyn TaskQueue,
    pipeline: &Pipeline,
    consumer: &str,
    message: TaskMessage,
) -> Result<(), QueueError> {
    tracing::info!(
        task_id = %message.task_id,
        task_name = %message.task_name,
        retries = message.retries,
        "Processing task"
    );

    let start = Instant::now();
    let outcome = match pipeline.run(&message).await {
        Ok(value) => {
            metrics::counter!("fotobox_tasks_completed_total").increment(1);
            tracing::info!(
                task_id = %message.task_id,
                duration_ms = start.elapsed().as_millis() as u64,
                "Task completed successfully"
            );
            TaskOutcome::Success(value)
        }
        Err(e) => {
            metrics::counter!("fotobox_tasks_failed_total").increment(1);
            let retriable = e.is_retriable();
            tracing::error!(
                task_id = %message.task_id,
                error = %e,
                retriable,
                "Task failed"
            );
            TaskOutcome::Failure {
                error: e.to_string(),
                retriable,
            }
        }
    };
    metrics::histogram!("fotobox_task_duration_seconds").record(start.elapsed().as_secs_f64());

    queue.settle(consumer, &message, outcome).await
}
