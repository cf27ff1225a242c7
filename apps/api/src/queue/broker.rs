//! Queue transport.
//!
//! [`Broker`] is the storage contract the queue runs on; [`RedisBroker`] is
//! the production implementation. Per queue `q:{name}:` it keeps:
//!
//!   jobs       hash   id -> job JSON (waiting and leased jobs)
//!   ready      zset   id scored by priority band + enqueue sequence
//!   delayed    zset   id scored by fire time (ms since epoch)
//!   active     zset   id scored by lease expiry (ms since epoch)
//!   completed  list   final job JSON, newest first, trimmed to retention
//!   failed     list   final job JSON plus error, trimmed to retention
//!   seq        counter feeding the ready-set ordering
//!
//! plus one global `queues:paused` flag. Popping moves the id from ready to
//! active in a single Lua script, so a crash between the two never loses the
//! job; maintenance later reclaims ids whose lease expired.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::Serialize;
use tracing::warn;

use crate::errors::AppError;
use crate::queue::{QueueCounts, QueuedJob};

/// How a delivered job ended.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed,
    Retry { fire_at_ms: i64 },
    Failed { error: String },
}

/// What one maintenance sweep did.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MaintenanceReport {
    /// Delayed jobs whose fire time passed and moved to ready.
    pub promoted: u64,
    /// Leased jobs whose lease expired and moved back to ready.
    pub reclaimed: u64,
    /// Completed/failed records dropped by retention trimming.
    pub trimmed: u64,
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn push_ready(&self, job: &QueuedJob) -> Result<(), AppError>;

    async fn push_delayed(&self, job: &QueuedJob, fire_at_ms: i64) -> Result<(), AppError>;

    /// Moves delayed jobs due at `now_ms` into the ready set.
    async fn promote_due(&self, queue: &str, now_ms: i64) -> Result<u64, AppError>;

    /// Pops the highest-priority ready job and leases it until
    /// `lease_until_ms`.
    async fn pop_ready(&self, queue: &str, lease_until_ms: i64)
        -> Result<Option<QueuedJob>, AppError>;

    /// Releases a leased job according to its outcome, trimming retention
    /// lists to `retention` entries.
    async fn settle(
        &self,
        job: &QueuedJob,
        outcome: JobOutcome,
        retention: usize,
    ) -> Result<(), AppError>;

    async fn counts(&self, queue: &str) -> Result<QueueCounts, AppError>;

    async fn set_paused(&self, paused: bool) -> Result<(), AppError>;

    async fn is_paused(&self) -> Result<bool, AppError>;

    /// Full housekeeping sweep: promote due jobs, reclaim expired leases,
    /// trim retention lists.
    async fn maintain(
        &self,
        queue: &str,
        now_ms: i64,
        retention: usize,
    ) -> Result<MaintenanceReport, AppError>;
}

/// Priority bands in the ready set are 1e13 wide; the enqueue sequence inside
/// a band stays far below that, so priorities never interleave.
const PRIORITY_BAND: f64 = 1e13;

/// Promotion and reclaim work through at most this many ids per sweep.
const SWEEP_BATCH: isize = 100;

const PAUSED_KEY: &str = "queues:paused";

/// Atomic ready-to-active move. ZPOPMIN returns [member, score] or an empty
/// array; the single script keeps a crash from dropping the popped id.
const POP_READY_SCRIPT: &str = r#"
local popped = redis.call('ZPOPMIN', KEYS[1])
if #popped == 0 then return nil end
redis.call('ZADD', KEYS[2], ARGV[1], popped[1])
return popped[1]
"#;

pub struct RedisBroker {
    client: redis::Client,
}

impl RedisBroker {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn conn(&self) -> Result<MultiplexedConnection, AppError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Queue(format!("redis connection failed: {e}")))
    }

    /// Claims `id` out of `source` and re-adds it to the ready set with a
    /// fresh sequence. ZREM is the claim: whoever removes the id owns it.
    async fn requeue_claimed(
        &self,
        conn: &mut MultiplexedConnection,
        queue: &str,
        source: &str,
        id: &str,
    ) -> Result<bool, AppError> {
        let claimed: u64 = conn.zrem(source, id).await.map_err(cmd_err)?;
        if claimed != 1 {
            return Ok(false);
        }
        let raw: Option<String> = conn.hget(jobs_key(queue), id).await.map_err(cmd_err)?;
        let Some(raw) = raw else {
            warn!("Dropping orphaned queue id {id} on '{queue}': no job record");
            return Ok(false);
        };
        let job: QueuedJob = serde_json::from_str(&raw)
            .map_err(|e| AppError::Queue(format!("corrupt job record {id}: {e}")))?;
        let score = self.ready_score(conn, queue, job.priority).await?;
        conn.zadd::<_, _, _, ()>(ready_key(queue), id, score)
            .await
            .map_err(cmd_err)?;
        Ok(true)
    }

    async fn ready_score(
        &self,
        conn: &mut MultiplexedConnection,
        queue: &str,
        priority: u8,
    ) -> Result<f64, AppError> {
        let seq: u64 = conn.incr(seq_key(queue), 1u64).await.map_err(cmd_err)?;
        Ok((priority as f64) * PRIORITY_BAND + seq as f64)
    }

    async fn store_job(
        &self,
        conn: &mut MultiplexedConnection,
        job: &QueuedJob,
    ) -> Result<(), AppError> {
        let payload = serde_json::to_string(job)
            .map_err(|e| AppError::Queue(format!("unserializable job {}: {e}", job.id)))?;
        conn.hset::<_, _, _, ()>(jobs_key(&job.queue), job.id.to_string(), payload)
            .await
            .map_err(cmd_err)?;
        Ok(())
    }

    /// Trims a retention list, returning how many records fell off.
    async fn trim_list(
        &self,
        conn: &mut MultiplexedConnection,
        key: &str,
        retention: usize,
    ) -> Result<u64, AppError> {
        let before: u64 = conn.llen(key).await.map_err(cmd_err)?;
        if before as usize <= retention {
            return Ok(0);
        }
        conn.ltrim::<_, ()>(key, 0, retention as isize - 1)
            .await
            .map_err(cmd_err)?;
        Ok(before - retention as u64)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push_ready(&self, job: &QueuedJob) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        self.store_job(&mut conn, job).await?;
        let score = self.ready_score(&mut conn, &job.queue, job.priority).await?;
        conn.zadd::<_, _, _, ()>(ready_key(&job.queue), job.id.to_string(), score)
            .await
            .map_err(cmd_err)?;
        Ok(())
    }

    async fn push_delayed(&self, job: &QueuedJob, fire_at_ms: i64) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        self.store_job(&mut conn, job).await?;
        conn.zadd::<_, _, _, ()>(delayed_key(&job.queue), job.id.to_string(), fire_at_ms)
            .await
            .map_err(cmd_err)?;
        Ok(())
    }

    async fn promote_due(&self, queue: &str, now_ms: i64) -> Result<u64, AppError> {
        let mut conn = self.conn().await?;
        let due: Vec<String> = conn
            .zrangebyscore_limit(delayed_key(queue), "-inf", now_ms, 0, SWEEP_BATCH)
            .await
            .map_err(cmd_err)?;
        let mut promoted = 0;
        for id in due {
            if self
                .requeue_claimed(&mut conn, queue, &delayed_key(queue), &id)
                .await?
            {
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    async fn pop_ready(
        &self,
        queue: &str,
        lease_until_ms: i64,
    ) -> Result<Option<QueuedJob>, AppError> {
        let mut conn = self.conn().await?;
        let script = redis::Script::new(POP_READY_SCRIPT);
        let id: Option<String> = script
            .key(ready_key(queue))
            .key(active_key(queue))
            .arg(lease_until_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(cmd_err)?;
        let Some(id) = id else {
            return Ok(None);
        };
        let raw: Option<String> = conn.hget(jobs_key(queue), &id).await.map_err(cmd_err)?;
        let Some(raw) = raw else {
            warn!("Popped id {id} on '{queue}' has no job record, discarding");
            conn.zrem::<_, _, ()>(active_key(queue), &id).await.map_err(cmd_err)?;
            return Ok(None);
        };
        let job = serde_json::from_str(&raw)
            .map_err(|e| AppError::Queue(format!("corrupt job record {id}: {e}")))?;
        Ok(Some(job))
    }

    async fn settle(
        &self,
        job: &QueuedJob,
        outcome: JobOutcome,
        retention: usize,
    ) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        let id = job.id.to_string();
        conn.zrem::<_, _, ()>(active_key(&job.queue), &id)
            .await
            .map_err(cmd_err)?;
        match outcome {
            JobOutcome::Completed => {
                conn.hdel::<_, _, ()>(jobs_key(&job.queue), &id)
                    .await
                    .map_err(cmd_err)?;
                let record = serde_json::to_string(job)
                    .map_err(|e| AppError::Queue(format!("unserializable job {id}: {e}")))?;
                conn.lpush::<_, _, ()>(completed_key(&job.queue), record)
                    .await
                    .map_err(cmd_err)?;
                self.trim_list(&mut conn, &completed_key(&job.queue), retention)
                    .await?;
            }
            JobOutcome::Retry { fire_at_ms } => {
                // Persist the bumped attempt count before re-parking the id.
                self.store_job(&mut conn, job).await?;
                conn.zadd::<_, _, _, ()>(delayed_key(&job.queue), &id, fire_at_ms)
                    .await
                    .map_err(cmd_err)?;
            }
            JobOutcome::Failed { error } => {
                conn.hdel::<_, _, ()>(jobs_key(&job.queue), &id)
                    .await
                    .map_err(cmd_err)?;
                let record = serde_json::json!({ "job": job, "error": error }).to_string();
                conn.lpush::<_, _, ()>(failed_key(&job.queue), record)
                    .await
                    .map_err(cmd_err)?;
                self.trim_list(&mut conn, &failed_key(&job.queue), retention)
                    .await?;
            }
        }
        Ok(())
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts, AppError> {
        let mut conn = self.conn().await?;
        let ready: u64 = conn.zcard(ready_key(queue)).await.map_err(cmd_err)?;
        let delayed: u64 = conn.zcard(delayed_key(queue)).await.map_err(cmd_err)?;
        let active: u64 = conn.zcard(active_key(queue)).await.map_err(cmd_err)?;
        let completed: u64 = conn.llen(completed_key(queue)).await.map_err(cmd_err)?;
        let failed: u64 = conn.llen(failed_key(queue)).await.map_err(cmd_err)?;
        Ok(QueueCounts {
            waiting: ready + delayed,
            active,
            completed,
            failed,
        })
    }

    async fn set_paused(&self, paused: bool) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        if paused {
            conn.set::<_, _, ()>(PAUSED_KEY, 1).await.map_err(cmd_err)?;
        } else {
            conn.del::<_, ()>(PAUSED_KEY).await.map_err(cmd_err)?;
        }
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool, AppError> {
        let mut conn = self.conn().await?;
        let paused: bool = conn.exists(PAUSED_KEY).await.map_err(cmd_err)?;
        Ok(paused)
    }

    async fn maintain(
        &self,
        queue: &str,
        now_ms: i64,
        retention: usize,
    ) -> Result<MaintenanceReport, AppError> {
        let promoted = self.promote_due(queue, now_ms).await?;

        let mut conn = self.conn().await?;
        let expired: Vec<String> = conn
            .zrangebyscore_limit(active_key(queue), "-inf", now_ms, 0, SWEEP_BATCH)
            .await
            .map_err(cmd_err)?;
        let mut reclaimed = 0;
        for id in expired {
            if self
                .requeue_claimed(&mut conn, queue, &active_key(queue), &id)
                .await?
            {
                warn!("Reclaimed job {id} on '{queue}' after lease expiry");
                reclaimed += 1;
            }
        }

        let trimmed = self.trim_list(&mut conn, &completed_key(queue), retention).await?
            + self.trim_list(&mut conn, &failed_key(queue), retention).await?;

        Ok(MaintenanceReport {
            promoted,
            reclaimed,
            trimmed,
        })
    }
}

fn cmd_err(e: redis::RedisError) -> AppError {
    AppError::Queue(format!("redis command failed: {e}"))
}

fn jobs_key(queue: &str) -> String {
    format!("q:{queue}:jobs")
}

fn ready_key(queue: &str) -> String {
    format!("q:{queue}:ready")
}

fn delayed_key(queue: &str) -> String {
    format!("q:{queue}:delayed")
}

fn active_key(queue: &str) -> String {
    format!("q:{queue}:active")
}

fn completed_key(queue: &str) -> String {
    format!("q:{queue}:completed")
}

fn failed_key(queue: &str) -> String {
    format!("q:{queue}:failed")
}

fn seq_key(queue: &str) -> String {
    format!("q:{queue}:seq")
}
