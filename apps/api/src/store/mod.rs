//! Submission persistence.
//!
//! Postgres is the source of truth; Redis sits in front as a read/write-through
//! cache that is allowed to die without anyone noticing ([`cache`]). Raw
//! uploads and rendered artifacts go to S3 as a side channel ([`artifacts`]).
//!
//! Status mutations are guarded in SQL: every UPDATE carries the expected
//! current status in its WHERE clause, so a stale caller gets zero rows back
//! instead of clobbering a concurrent transition.

pub mod artifacts;
pub mod cache;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::submission::{SubmissionRow, SubmissionStatus};

pub use cache::SubmissionCache;

/// Fields the upload handler provides when creating a submission.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub cv_file_name: String,
    pub cv_media_type: String,
    pub cv_text: String,
    pub job_spec_file_name: Option<String>,
    pub job_spec_media_type: Option<String>,
    pub job_spec_text: String,
}

/// Storage backend seam. Production wires [`PgBackend`]; tests wire an
/// in-memory fake that mirrors the same guarded-update semantics.
#[async_trait]
pub trait SubmissionBackend: Send + Sync {
    async fn insert(&self, row: &SubmissionRow) -> Result<(), AppError>;

    async fn fetch(&self, id: Uuid) -> Result<Option<SubmissionRow>, AppError>;

    /// Moves `id` from `from` to `to`. Returns `None` when the row is absent
    /// or no longer in `from`.
    async fn set_status(
        &self,
        id: Uuid,
        from: SubmissionStatus,
        to: SubmissionStatus,
    ) -> Result<Option<SubmissionRow>, AppError>;

    /// Stores the tailored document and flips `tailoring` to `tailored` in
    /// one statement. Returns `None` when the row is not `tailoring`.
    async fn set_tailored(&self, id: Uuid, tailored: &Value)
        -> Result<Option<SubmissionRow>, AppError>;

    /// Marks any non-terminal row `failed`. Returns `None` when the row is
    /// absent or already terminal.
    async fn set_failed(&self, id: Uuid, reason: &str) -> Result<Option<SubmissionRow>, AppError>;

    async fn set_cv_s3_key(&self, id: Uuid, key: &str) -> Result<(), AppError>;

    async fn set_artifact_s3_key(&self, id: Uuid, key: &str) -> Result<(), AppError>;

    /// Round-trips a trivial query for health checks.
    async fn ping(&self) -> Result<Duration, AppError>;
}

/// Postgres implementation of [`SubmissionBackend`].
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionBackend for PgBackend {
    async fn insert(&self, row: &SubmissionRow) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO submissions \
             (id, status, cv_file_name, cv_media_type, cv_text, \
              job_spec_file_name, job_spec_media_type, job_spec_text, \
              created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(row.id)
        .bind(&row.status)
        .bind(&row.cv_file_name)
        .bind(&row.cv_media_type)
        .bind(&row.cv_text)
        .bind(&row.job_spec_file_name)
        .bind(&row.job_spec_media_type)
        .bind(&row.job_spec_text)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<SubmissionRow>, AppError> {
        let row = sqlx::query_as::<_, SubmissionRow>("SELECT * FROM submissions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn set_status(
        &self,
        id: Uuid,
        from: SubmissionStatus,
        to: SubmissionStatus,
    ) -> Result<Option<SubmissionRow>, AppError> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            "UPDATE submissions SET status = $1, updated_at = now() \
             WHERE id = $2 AND status = $3 RETURNING *",
        )
        .bind(to.as_str())
        .bind(id)
        .bind(from.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_tailored(
        &self,
        id: Uuid,
        tailored: &Value,
    ) -> Result<Option<SubmissionRow>, AppError> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            "UPDATE submissions SET status = 'tailored', tailored = $1, updated_at = now() \
             WHERE id = $2 AND status = 'tailoring' RETURNING *",
        )
        .bind(tailored)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_failed(&self, id: Uuid, reason: &str) -> Result<Option<SubmissionRow>, AppError> {
        let row = sqlx::query_as::<_, SubmissionRow>(
            "UPDATE submissions SET status = 'failed', failure_reason = $1, updated_at = now() \
             WHERE id = $2 AND status NOT IN ('tailored', 'failed') RETURNING *",
        )
        .bind(reason)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn set_cv_s3_key(&self, id: Uuid, key: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE submissions SET cv_s3_key = $1, updated_at = now() WHERE id = $2")
            .bind(key)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_artifact_s3_key(&self, id: Uuid, key: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE submissions SET artifact_s3_key = $1, updated_at = now() WHERE id = $2")
            .bind(key)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<Duration, AppError> {
        let started = Instant::now();
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(started.elapsed())
    }
}

/// Cache-fronted submission store. All reads go through the cache; all
/// writes refresh it. Cache failures never surface to callers.
#[derive(Clone)]
pub struct SubmissionStore {
    backend: Arc<dyn SubmissionBackend>,
    cache: SubmissionCache,
}

impl SubmissionStore {
    pub fn new(backend: Arc<dyn SubmissionBackend>, cache: SubmissionCache) -> Self {
        Self { backend, cache }
    }

    pub async fn create(&self, new: NewSubmission) -> Result<SubmissionRow, AppError> {
        let now = Utc::now();
        let row = SubmissionRow {
            id: Uuid::new_v4(),
            status: SubmissionStatus::Uploaded.as_str().to_string(),
            cv_file_name: new.cv_file_name,
            cv_media_type: new.cv_media_type,
            cv_text: new.cv_text,
            job_spec_file_name: new.job_spec_file_name,
            job_spec_media_type: new.job_spec_media_type,
            job_spec_text: new.job_spec_text,
            tailored: None,
            failure_reason: None,
            cv_s3_key: None,
            artifact_s3_key: None,
            created_at: now,
            updated_at: now,
        };
        self.backend.insert(&row).await?;
        self.cache.put(&row).await;
        info!("Created submission {} ({})", row.id, row.cv_file_name);
        Ok(row)
    }

    /// Read-through lookup: cache first, then Postgres, repopulating the
    /// cache on a miss.
    pub async fn get(&self, id: Uuid) -> Result<Option<SubmissionRow>, AppError> {
        if let Some(row) = self.cache.get(id).await {
            debug!("Cache hit for submission {id}");
            return Ok(Some(row));
        }
        let row = self.backend.fetch(id).await?;
        if let Some(ref row) = row {
            self.cache.put(row).await;
        }
        Ok(row)
    }

    /// Moves a submission along the status machine. Rejects transitions the
    /// machine forbids before touching storage, and reports a conflict when
    /// the row moved underneath the caller.
    pub async fn transition(
        &self,
        id: Uuid,
        from: SubmissionStatus,
        to: SubmissionStatus,
    ) -> Result<SubmissionRow, AppError> {
        if !from.can_transition_to(to) {
            return Err(AppError::Validation(format!(
                "illegal status transition {from} -> {to}"
            )));
        }
        let row = self.backend.set_status(id, from, to).await?.ok_or_else(|| {
            AppError::Validation(format!(
                "submission {id} is no longer '{from}', refusing to move it to '{to}'"
            ))
        })?;
        self.cache.put(&row).await;
        Ok(row)
    }

    /// Persists the tailored document for a submission currently in
    /// `tailoring`.
    pub async fn mark_tailored(&self, id: Uuid, tailored: &Value) -> Result<SubmissionRow, AppError> {
        let row = self.backend.set_tailored(id, tailored).await?.ok_or_else(|| {
            AppError::Validation(format!(
                "submission {id} is not being tailored, refusing to store a result"
            ))
        })?;
        self.cache.put(&row).await;
        Ok(row)
    }

    /// Marks a submission failed. `Ok(None)` means the row was already
    /// terminal and was left alone.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
    ) -> Result<Option<SubmissionRow>, AppError> {
        let row = self.backend.set_failed(id, reason).await?;
        if let Some(ref row) = row {
            self.cache.put(row).await;
        }
        Ok(row)
    }

    pub async fn record_cv_s3_key(&self, id: Uuid, key: &str) -> Result<(), AppError> {
        self.backend.set_cv_s3_key(id, key).await?;
        self.cache.invalidate(id).await;
        Ok(())
    }

    pub async fn record_artifact_s3_key(&self, id: Uuid, key: &str) -> Result<(), AppError> {
        self.backend.set_artifact_s3_key(id, key).await?;
        self.cache.invalidate(id).await;
        Ok(())
    }

    pub async fn ping(&self) -> Result<Duration, AppError> {
        self.backend.ping().await
    }

    pub async fn cache_ping(&self) -> Result<Duration, AppError> {
        self.cache.ping().await
    }
}
