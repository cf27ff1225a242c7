//! Tailoring orchestrator.
//!
//! Drives one submission through the generative model and the status
//! machine:
//!
//! Flow:
//!   gate (one flight per submission) -> status check -> transition to
//!   tailoring -> prompt -> model, reparsing up to [`MAX_FORMAT_ATTEMPTS`]
//!   times on malformed output -> persist tailored document | mark failed
//!
//! Transport failures abort immediately; only well-formed HTTP responses
//! with unusable bodies burn format attempts. Submissions already tailored
//! are returned as-is without touching the model, so a re-render never pays
//! for a second generation.

pub mod prompts;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm_client::{strip_json_fences, GenerativeClient, LlmError};
use crate::models::submission::SubmissionStatus;
use crate::models::tailored::{RawTailoredCv, TailoredCv};
use crate::queue::{JobHandler, QueuedJob};
use crate::store::SubmissionStore;

/// Fresh model invocations allowed when responses parse but do not conform.
pub const MAX_FORMAT_ATTEMPTS: u32 = 3;

/// Per-submission single-flight gate. Concurrent tailoring requests for the
/// same id serialize here; the loser reads the winner's persisted result
/// instead of invoking the model again.
#[derive(Clone, Default)]
pub struct TailorGate {
    slots: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TailorGate {
    fn slot(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(id).or_default().clone()
    }

    fn cleanup(&self, id: Uuid) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get(&id) {
            // Strong count 1 means ours is the last handle.
            if Arc::strong_count(slot) == 1 {
                slots.remove(&id);
            }
        }
    }
}

/// Tailors one submission end to end, returning the structured document.
pub async fn tailor_submission(
    store: &SubmissionStore,
    llm: &dyn GenerativeClient,
    gate: &TailorGate,
    id: Uuid,
) -> Result<TailoredCv, AppError> {
    let slot = gate.slot(id);
    let guard = slot.lock().await;
    let result = tailor_locked(store, llm, id).await;
    drop(guard);
    drop(slot);
    gate.cleanup(id);
    result
}

async fn tailor_locked(
    store: &SubmissionStore,
    llm: &dyn GenerativeClient,
    id: Uuid,
) -> Result<TailoredCv, AppError> {
    let submission = store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("submission {id} does not exist")))?;

    match submission.current_status()? {
        SubmissionStatus::Tailored => {
            // A previous flight finished while we waited on the gate, or the
            // caller asked for a re-render. Reuse the stored document.
            let stored = submission.tailored.ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!(
                    "submission {id} is tailored but has no stored document"
                ))
            })?;
            let cv: TailoredCv = serde_json::from_value(stored).map_err(|e| {
                AppError::Internal(anyhow::anyhow!(
                    "stored document for {id} does not deserialize: {e}"
                ))
            })?;
            return Ok(cv);
        }
        SubmissionStatus::Failed => {
            let reason = submission
                .failure_reason
                .unwrap_or_else(|| "unknown failure".to_string());
            return Err(AppError::Validation(format!(
                "submission {id} already failed: {reason}"
            )));
        }
        SubmissionStatus::Uploaded => {
            store
                .transition(id, SubmissionStatus::Uploaded, SubmissionStatus::Tailoring)
                .await?;
        }
        SubmissionStatus::Queued => {
            store
                .transition(id, SubmissionStatus::Queued, SubmissionStatus::Tailoring)
                .await?;
        }
        // A crashed predecessor can leave the row parked here; the gate
        // guarantees nobody else is working on it now, so take over.
        SubmissionStatus::Tailoring => {}
    }

    match run_model(llm, &submission.cv_text, &submission.job_spec_text).await {
        Ok(cv) => {
            let document = serde_json::to_value(&cv).map_err(|e| {
                AppError::Internal(anyhow::anyhow!("tailored document does not serialize: {e}"))
            })?;
            store.mark_tailored(id, &document).await?;
            info!("Submission {id} tailored ({} experience entries)", cv.experience.len());
            Ok(cv)
        }
        Err(e) => {
            let reason = e.to_string();
            if store.mark_failed(id, &reason).await?.is_none() {
                warn!("Submission {id} was already terminal while failing it: {reason}");
            }
            Err(e)
        }
    }
}

/// Calls the model with the deterministic prompt, retrying from scratch on
/// malformed output.
async fn run_model(
    llm: &dyn GenerativeClient,
    cv_text: &str,
    job_spec_text: &str,
) -> Result<TailoredCv, AppError> {
    let prompt = prompts::build_tailor_prompt(cv_text, job_spec_text);

    for attempt in 1..=MAX_FORMAT_ATTEMPTS {
        let raw = llm
            .complete(&prompt, prompts::TAILOR_SYSTEM)
            .await
            .map_err(|e| match e {
                LlmError::Http(ref inner) if inner.is_timeout() => {
                    AppError::Timeout(format!("generative model call timed out: {e}"))
                }
                other => AppError::Internal(anyhow::anyhow!("generative model call failed: {other}")),
            })?;

        match parse_tailored(&raw) {
            Ok(cv) => return Ok(cv),
            Err(reason) => {
                warn!(
                    "Model output unusable (attempt {attempt} of {MAX_FORMAT_ATTEMPTS}): {reason}"
                );
            }
        }
    }

    Err(AppError::GenerativeFormat {
        attempts: MAX_FORMAT_ATTEMPTS,
    })
}

/// Parses one model response into a normalized document.
fn parse_tailored(raw: &str) -> Result<TailoredCv, String> {
    let text = strip_json_fences(raw);
    let loose: RawTailoredCv =
        serde_json::from_str(text).map_err(|e| format!("invalid JSON: {e}"))?;
    loose.normalize()
}

/// Consumes jobs from the tailoring queue.
pub struct TailorJobHandler {
    store: SubmissionStore,
    llm: Arc<dyn GenerativeClient>,
    gate: TailorGate,
}

impl TailorJobHandler {
    pub fn new(store: SubmissionStore, llm: Arc<dyn GenerativeClient>, gate: TailorGate) -> Self {
        Self { store, llm, gate }
    }
}

#[derive(Debug, Deserialize)]
struct TailorJobPayload {
    submission_id: Uuid,
}

#[async_trait]
impl JobHandler for TailorJobHandler {
    async fn handle(&self, job: &QueuedJob) -> Result<(), AppError> {
        let payload: TailorJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| AppError::Queue(format!("malformed tailoring payload: {e}")))?;
        tailor_submission(&self.store, self.llm.as_ref(), &self.gate, payload.submission_id)
            .await?;
        Ok(())
    }
}
