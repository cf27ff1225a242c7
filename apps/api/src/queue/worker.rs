//! Queue consumer loop.
//!
//! One [`Worker`] polls every queue it has a handler for, delivers jobs, and
//! settles them: success completes the job, a handler error schedules a
//! backed-off retry until the attempt cap, then parks the job on the failed
//! list. `tick` takes the current time explicitly so tests can drive the
//! retry clock without sleeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::errors::AppError;
use crate::queue::{retry_backoff_ms, JobQueue, QueuedJob};

/// Upper bound on jobs drained from one queue in one tick.
const MAX_JOBS_PER_TICK: usize = 50;

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &QueuedJob) -> Result<(), AppError>;
}

pub struct Worker {
    queue: Arc<JobQueue>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(queue: Arc<JobQueue>, poll_interval: Duration) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            poll_interval,
        }
    }

    pub fn register(mut self, queue_name: &str, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(queue_name.to_string(), handler);
        self
    }

    pub async fn run(self) {
        info!(
            "Worker polling {} queue(s) every {:?}",
            self.handlers.len(),
            self.poll_interval
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick(Utc::now().timestamp_millis()).await {
                warn!("Worker tick failed: {e}");
            }
        }
    }

    /// One delivery pass over every registered queue at time `now_ms`.
    pub async fn tick(&self, now_ms: i64) -> Result<(), AppError> {
        if self.queue.is_paused().await? {
            return Ok(());
        }
        for (queue_name, handler) in &self.handlers {
            for _ in 0..MAX_JOBS_PER_TICK {
                let Some(job) = self.queue.pop(queue_name, now_ms).await? else {
                    break;
                };
                self.process(job, handler.as_ref(), now_ms).await?;
            }
        }
        Ok(())
    }

    async fn process(
        &self,
        mut job: QueuedJob,
        handler: &dyn JobHandler,
        now_ms: i64,
    ) -> Result<(), AppError> {
        debug!(
            "Delivering job {} on '{}' (attempt {} of {})",
            job.id,
            job.queue,
            job.attempts + 1,
            job.max_attempts
        );
        let result = handler.handle(&job).await;
        job.attempts += 1;
        match result {
            Ok(()) => self.queue.settle_success(&job).await,
            Err(e) if job.attempts >= job.max_attempts => {
                warn!(
                    "Job {} on '{}' failed permanently after {} attempts: {e}",
                    job.id, job.queue, job.attempts
                );
                self.queue.settle_failed(&job, e.to_string()).await
            }
            Err(e) => {
                let policy = self.queue.policy();
                let delay_ms =
                    retry_backoff_ms(job.attempts, policy.backoff_base_ms, policy.backoff_cap_ms);
                warn!(
                    "Job {} on '{}' failed (attempt {} of {}), retrying in {delay_ms}ms: {e}",
                    job.id, job.queue, job.attempts, job.max_attempts
                );
                self.queue.settle_retry(&job, now_ms + delay_ms as i64).await
            }
        }
    }
}

/// Handler for the housekeeping queue: sweeps every known queue and logs
/// depths.
pub struct MaintenanceHandler {
    queue: Arc<JobQueue>,
    queues: Vec<String>,
}

impl MaintenanceHandler {
    pub fn new(queue: Arc<JobQueue>, queues: Vec<String>) -> Self {
        Self { queue, queues }
    }
}

#[async_trait]
impl JobHandler for MaintenanceHandler {
    async fn handle(&self, job: &QueuedJob) -> Result<(), AppError> {
        let task = job
            .payload
            .get("task")
            .and_then(|v| v.as_str())
            .unwrap_or("maintenance");
        debug!("Running scheduled task '{task}'");
        let now_ms = Utc::now().timestamp_millis();
        for queue_name in &self.queues {
            let report = self.queue.maintain(queue_name, now_ms).await?;
            let counts = self.queue.counts(queue_name).await?;
            info!(
                "Queue '{queue_name}': waiting={}, active={}, completed={}, failed={} \
                 (promoted {}, reclaimed {}, trimmed {})",
                counts.waiting,
                counts.active,
                counts.completed,
                counts.failed,
                report.promoted,
                report.reclaimed,
                report.trimmed
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobOptions;
    use crate::testing::{test_policy, InMemoryBroker};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyHandler {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    impl FlakyHandler {
        fn new(failures_before_success: u32) -> Arc<Self> {
            Arc::new(Self {
                failures_before_success,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _job: &QueuedJob) -> Result<(), AppError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(AppError::Internal(anyhow::anyhow!("induced failure {n}")))
            } else {
                Ok(())
            }
        }
    }

    fn worker_with(
        broker: Arc<InMemoryBroker>,
        handler: Arc<FlakyHandler>,
    ) -> (Worker, Arc<JobQueue>) {
        let queue = Arc::new(JobQueue::new(broker, test_policy()));
        let worker = Worker::new(queue.clone(), Duration::from_millis(10))
            .register("q", handler);
        (worker, queue)
    }

    #[tokio::test]
    async fn test_flaky_job_succeeds_on_the_third_attempt() {
        let broker = Arc::new(InMemoryBroker::default());
        let handler = FlakyHandler::new(2);
        let (worker, queue) = worker_with(broker.clone(), handler.clone());
        let base = test_policy().backoff_base_ms as i64;

        queue.enqueue("q", serde_json::json!({}), JobOptions::default()).await.unwrap();

        let t0 = 1_000_000;
        worker.tick(t0).await.unwrap();
        assert_eq!(handler.calls(), 1);

        // Not due yet: the first retry waits out the base backoff.
        worker.tick(t0 + base - 1).await.unwrap();
        assert_eq!(handler.calls(), 1);

        let t1 = t0 + base;
        worker.tick(t1).await.unwrap();
        assert_eq!(handler.calls(), 2);

        let t2 = t1 + 2 * base;
        worker.tick(t2).await.unwrap();
        assert_eq!(handler.calls(), 3, "third delivery should succeed");

        let counts = queue.counts("q").await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.failed, 0);
        assert_eq!(counts.waiting, 0);

        // Backoff between attempts grows strictly.
        let fires = broker.retry_fires();
        assert_eq!(fires.len(), 2);
        let first_delay = fires[0] - t0;
        let second_delay = fires[1] - t1;
        assert_eq!(first_delay, base);
        assert_eq!(second_delay, 2 * base);
        assert!(second_delay > first_delay);
    }

    #[tokio::test]
    async fn test_hopeless_job_fails_after_exactly_max_attempts() {
        let broker = Arc::new(InMemoryBroker::default());
        let handler = FlakyHandler::new(u32::MAX);
        let (worker, queue) = worker_with(broker.clone(), handler.clone());
        let max_attempts = test_policy().max_attempts;

        queue.enqueue("q", serde_json::json!({}), JobOptions::default()).await.unwrap();

        // Generous time steps so every scheduled retry is due.
        let mut now = 1_000_000;
        for _ in 0..max_attempts + 2 {
            worker.tick(now).await.unwrap();
            now += 10 * test_policy().backoff_cap_ms as i64;
        }

        assert_eq!(handler.calls(), max_attempts, "no deliveries beyond the cap");
        let counts = queue.counts("q").await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.completed, 0);
        assert_eq!(counts.waiting, 0);
    }

    #[tokio::test]
    async fn test_per_job_attempt_override_wins() {
        let broker = Arc::new(InMemoryBroker::default());
        let handler = FlakyHandler::new(u32::MAX);
        let (worker, queue) = worker_with(broker.clone(), handler.clone());

        let options = JobOptions { max_attempts: Some(1), ..Default::default() };
        queue.enqueue("q", serde_json::json!({}), options).await.unwrap();

        worker.tick(1_000_000).await.unwrap();
        worker.tick(2_000_000).await.unwrap();

        assert_eq!(handler.calls(), 1);
        assert_eq!(queue.counts("q").await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_paused_queues_deliver_nothing_until_resumed() {
        let broker = Arc::new(InMemoryBroker::default());
        let handler = FlakyHandler::new(0);
        let (worker, queue) = worker_with(broker.clone(), handler.clone());

        queue.enqueue("q", serde_json::json!({}), JobOptions::default()).await.unwrap();
        queue.pause_all().await.unwrap();

        worker.tick(1_000_000).await.unwrap();
        assert_eq!(handler.calls(), 0);
        assert_eq!(queue.counts("q").await.unwrap().waiting, 1, "job stays parked");

        queue.resume_all().await.unwrap();
        worker.tick(1_000_100).await.unwrap();
        assert_eq!(handler.calls(), 1);
        assert_eq!(queue.counts("q").await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_jobs_on_unregistered_queues_are_left_alone() {
        let broker = Arc::new(InMemoryBroker::default());
        let handler = FlakyHandler::new(0);
        let (worker, queue) = worker_with(broker.clone(), handler.clone());

        queue.enqueue("other", serde_json::json!({}), JobOptions::default()).await.unwrap();
        worker.tick(1_000_000).await.unwrap();

        assert_eq!(handler.calls(), 0);
        assert_eq!(queue.counts("other").await.unwrap().waiting, 1);
    }
}
