//! Durable named job queues.
//!
//! Jobs are JSON payloads pushed onto a named queue and delivered to a
//! handler at least once. Delivery order is priority first (lower value
//! first), enqueue order within a priority. Failed handlers are retried with
//! exponential backoff until `max_attempts`, then parked on a bounded failed
//! list. Redis carries the state in production ([`broker::RedisBroker`]);
//! tests run against an in-memory broker with the same contract.
//!
//! Flow:
//!   enqueue -> ready/delayed set -> worker pop (leased) -> handler
//!     -> settle: completed | retry (delayed) | failed

pub mod broker;
pub mod scheduler;
pub mod worker;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;

pub use broker::{Broker, JobOutcome, MaintenanceReport};
pub use scheduler::{run_scheduler, ScheduleEntry, Scheduler};
pub use worker::{JobHandler, MaintenanceHandler, Worker};

/// Queue the tailoring pipeline consumes.
pub const TAILORING_QUEUE: &str = "tailoring";
/// Queue for periodic housekeeping fired by the scheduler.
pub const MAINTENANCE_QUEUE: &str = "maintenance";

/// A queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: Uuid,
    pub queue: String,
    pub payload: Value,
    /// Lower values pop first.
    pub priority: u8,
    /// Delivery attempts so far.
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Set when the job was enqueued with a delay.
    pub not_before: Option<DateTime<Utc>>,
}

/// Per-job overrides accepted at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub priority: u8,
    pub delay_ms: u64,
    /// Overrides the queue-wide attempt cap for this job.
    pub max_attempts: Option<u32>,
}

/// Queue-wide tuning, read once from config.
#[derive(Debug, Clone, Copy)]
pub struct QueuePolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// How many completed/failed jobs each queue retains.
    pub retention: usize,
    /// How long a popped job stays leased before maintenance reclaims it.
    pub lease_secs: u64,
}

impl QueuePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.queue_max_attempts,
            backoff_base_ms: config.queue_backoff_base_ms,
            backoff_cap_ms: config.queue_backoff_cap_ms,
            retention: config.queue_retention,
            lease_secs: config.queue_lease_secs,
        }
    }
}

/// Point-in-time queue depths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Backoff before retry `attempt` (1-based): base * 2^(attempt-1), capped.
pub fn retry_backoff_ms(attempt: u32, base_ms: u64, cap_ms: u64) -> u64 {
    let shift = attempt.saturating_sub(1).min(20);
    base_ms.saturating_mul(1u64 << shift).min(cap_ms)
}

/// Producer/consumer facade over a [`Broker`].
pub struct JobQueue {
    broker: Arc<dyn Broker>,
    policy: QueuePolicy,
}

impl JobQueue {
    pub fn new(broker: Arc<dyn Broker>, policy: QueuePolicy) -> Self {
        Self { broker, policy }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Enqueues a payload and returns the job id.
    pub async fn enqueue(
        &self,
        queue: &str,
        payload: Value,
        options: JobOptions,
    ) -> Result<Uuid, AppError> {
        let now = Utc::now();
        let not_before = if options.delay_ms > 0 {
            Some(now + Duration::milliseconds(options.delay_ms as i64))
        } else {
            None
        };
        let job = QueuedJob {
            id: Uuid::new_v4(),
            queue: queue.to_string(),
            payload,
            priority: options.priority,
            attempts: 0,
            max_attempts: options.max_attempts.unwrap_or(self.policy.max_attempts),
            enqueued_at: now,
            not_before,
        };
        match job.not_before {
            Some(at) => self.broker.push_delayed(&job, at.timestamp_millis()).await?,
            None => self.broker.push_ready(&job).await?,
        }
        debug!(
            "Enqueued job {} on '{}' (priority {}, delay {}ms)",
            job.id, queue, job.priority, options.delay_ms
        );
        Ok(job.id)
    }

    pub async fn counts(&self, queue: &str) -> Result<QueueCounts, AppError> {
        self.broker.counts(queue).await
    }

    /// Stops delivery across every queue. Waiting jobs stay put.
    pub async fn pause_all(&self) -> Result<(), AppError> {
        self.broker.set_paused(true).await?;
        info!("Queue delivery paused");
        Ok(())
    }

    /// Restores delivery after a pause, including one left behind by a
    /// previous shutdown.
    pub async fn resume_all(&self) -> Result<(), AppError> {
        self.broker.set_paused(false).await?;
        info!("Queue delivery resumed");
        Ok(())
    }

    pub async fn is_paused(&self) -> Result<bool, AppError> {
        self.broker.is_paused().await
    }

    /// Promotes due delayed jobs, reclaims expired leases, trims retention
    /// lists.
    pub async fn maintain(&self, queue: &str, now_ms: i64) -> Result<MaintenanceReport, AppError> {
        self.broker.maintain(queue, now_ms, self.policy.retention).await
    }

    /// Pops the next ready job, first promoting any due delayed jobs so a
    /// retry becomes visible the moment its backoff elapses.
    pub(crate) async fn pop(&self, queue: &str, now_ms: i64) -> Result<Option<QueuedJob>, AppError> {
        self.broker.promote_due(queue, now_ms).await?;
        let lease_until = now_ms + (self.policy.lease_secs as i64) * 1000;
        self.broker.pop_ready(queue, lease_until).await
    }

    pub(crate) async fn settle_success(&self, job: &QueuedJob) -> Result<(), AppError> {
        self.broker
            .settle(job, JobOutcome::Completed, self.policy.retention)
            .await
    }

    pub(crate) async fn settle_retry(&self, job: &QueuedJob, fire_at_ms: i64) -> Result<(), AppError> {
        self.broker
            .settle(job, JobOutcome::Retry { fire_at_ms }, self.policy.retention)
            .await
    }

    pub(crate) async fn settle_failed(&self, job: &QueuedJob, error: String) -> Result<(), AppError> {
        self.broker
            .settle(job, JobOutcome::Failed { error }, self.policy.retention)
            .await
    }
}
