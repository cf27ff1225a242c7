use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;

/// Lifecycle of a submission.
///
/// `uploaded → queued → tailoring → {tailored | failed}`. Transitions only
/// move forward; skipping a stage is allowed (the synchronous tailor path
/// goes straight from `uploaded` to `tailoring`), moving backward never is.
/// `tailored` and `failed` are terminal, and `failed` is reachable from any
/// non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Uploaded,
    Queued,
    Tailoring,
    Tailored,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Uploaded => "uploaded",
            SubmissionStatus::Queued => "queued",
            SubmissionStatus::Tailoring => "tailoring",
            SubmissionStatus::Tailored => "tailored",
            SubmissionStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "uploaded" => Some(SubmissionStatus::Uploaded),
            "queued" => Some(SubmissionStatus::Queued),
            "tailoring" => Some(SubmissionStatus::Tailoring),
            "tailored" => Some(SubmissionStatus::Tailored),
            "failed" => Some(SubmissionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Tailored | SubmissionStatus::Failed)
    }

    /// Position in the forward-only ordering. Both terminal statuses share
    /// the final stage, which is what makes `failed` reachable from any
    /// non-terminal status.
    fn stage(&self) -> u8 {
        match self {
            SubmissionStatus::Uploaded => 0,
            SubmissionStatus::Queued => 1,
            SubmissionStatus::Tailoring => 2,
            SubmissionStatus::Tailored => 3,
            SubmissionStatus::Failed => 3,
        }
    }

    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        !self.is_terminal() && next.stage() > self.stage()
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A CV submission: the extracted document texts, the lifecycle status, the
/// tailored output once produced, and the object-storage keys for the raw
/// upload and the rendered artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SubmissionRow {
    pub id: Uuid,
    pub status: String,
    pub cv_file_name: String,
    pub cv_media_type: String,
    pub cv_text: String,
    pub job_spec_file_name: Option<String>,
    pub job_spec_media_type: Option<String>,
    pub job_spec_text: String,
    pub tailored: Option<Value>,
    pub failure_reason: Option<String>,
    pub cv_s3_key: Option<String>,
    pub artifact_s3_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubmissionRow {
    /// Parses the stored status string. Rows are only ever written through
    /// the store, so an unrecognized value is an internal invariant breach.
    pub fn current_status(&self) -> Result<SubmissionStatus, AppError> {
        SubmissionStatus::parse(&self.status).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "submission {} has unrecognized status '{}'",
                self.id,
                self.status
            ))
        })
    }
}
