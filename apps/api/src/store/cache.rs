//! Redis cache in front of the submission store.
//!
//! Strictly an accelerator: every operation is wrapped in a short timeout and
//! every failure degrades to a miss. A dead Redis makes reads slower, never
//! wrong, and never returns an error to a caller.

use std::time::{Duration, Instant};

use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::submission::SubmissionRow;

/// An unresponsive cache should cost milliseconds, not request deadlines.
const CACHE_OP_TIMEOUT: Duration = Duration::from_millis(500);

fn cache_key(id: Uuid) -> String {
    format!("submission:{id}")
}

#[derive(Clone)]
pub struct SubmissionCache {
    client: redis::Client,
    ttl_secs: u64,
}

impl SubmissionCache {
    pub fn new(client: redis::Client, ttl_secs: u64) -> Self {
        Self { client, ttl_secs }
    }

    /// Looks up a cached submission. Any failure (connection, timeout,
    /// corrupt payload) reads as a miss.
    pub async fn get(&self, id: Uuid) -> Option<SubmissionRow> {
        let raw = tokio::time::timeout(CACHE_OP_TIMEOUT, self.fetch_raw(id)).await;
        let raw = match raw {
            Ok(Ok(raw)) => raw?,
            Ok(Err(e)) => {
                debug!("Cache read for {id} failed: {e}");
                return None;
            }
            Err(_) => {
                debug!("Cache read for {id} timed out");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!("Discarding corrupt cache entry for {id}: {e}");
                None
            }
        }
    }

    /// Write-through refresh. Failures are logged and dropped.
    pub async fn put(&self, row: &SubmissionRow) {
        let payload = match serde_json::to_string(row) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not serialize submission {} for caching: {e}", row.id);
                return;
            }
        };
        let result = tokio::time::timeout(CACHE_OP_TIMEOUT, self.store_raw(row.id, payload)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Cache write for {} failed: {e}", row.id),
            Err(_) => debug!("Cache write for {} timed out", row.id),
        }
    }

    /// Drops a cached entry so the next read refetches from storage.
    pub async fn invalidate(&self, id: Uuid) {
        let result = tokio::time::timeout(CACHE_OP_TIMEOUT, self.delete_raw(id)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Cache invalidation for {id} failed: {e}"),
            Err(_) => debug!("Cache invalidation for {id} timed out"),
        }
    }

    /// Round-trips a PING for health checks. This is the one place cache
    /// errors are reported rather than swallowed.
    pub async fn ping(&self) -> Result<Duration, AppError> {
        let started = Instant::now();
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Cache(format!("connection failed: {e}")))?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| AppError::Cache(format!("ping failed: {e}")))?;
        Ok(started.elapsed())
    }

    async fn fetch_raw(&self, id: Uuid) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.get::<_, Option<String>>(cache_key(id)).await
    }

    async fn store_raw(&self, id: Uuid, payload: String) -> Result<(), redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(cache_key(id), payload, self.ttl_secs)
            .await
    }

    async fn delete_raw(&self, id: Uuid) -> Result<(), redis::RedisError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(cache_key(id)).await
    }
}
