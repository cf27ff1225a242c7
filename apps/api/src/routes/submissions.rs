//! Submission endpoints: upload, tailor, fetch.
//!
//! Flow for one CV:
//!   POST /upload        multipart in, text extracted, row created, job queued
//!   worker              tailors in the background
//!   POST /tailor-cv     tailors on demand (or reuses the stored result) and
//!                       streams back the rendered PDF
//!   GET /submission/:id current status and stored documents

use axum::extract::multipart::Field;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::extract::{ensure_allowed, extract_text, DocumentKind};
use crate::models::submission::{SubmissionRow, SubmissionStatus};
use crate::queue::{JobOptions, TAILORING_QUEUE};
use crate::render::render_cv;
use crate::state::AppState;
use crate::store::NewSubmission;
use crate::tailor::tailor_submission;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub data: Vec<UploadedSubmission>,
}

#[derive(Debug, Serialize)]
pub struct UploadedSubmission {
    pub id: Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct TailorRequest {
    #[serde(rename = "submissionId")]
    pub submission_id: Uuid,
}

struct UploadedFile {
    file_name: String,
    media_type: String,
    bytes: Bytes,
}

enum JobSpecSource {
    File(UploadedFile),
    Text(String),
}

/// POST /upload
/// Multipart form: `cv` (required file) plus exactly one of `job_spec`
/// (file) or `job_spec_text_input` (text).
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut cv: Option<UploadedFile> = None;
    let mut job_spec: Option<JobSpecSource> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("malformed multipart request: {e}")))?
    {
        match field.name().unwrap_or("") {
            "cv" => {
                cv = Some(read_file_field(field, state.config.max_cv_bytes, "cv").await?);
            }
            "job_spec" => {
                if job_spec.is_some() {
                    return Err(both_job_specs());
                }
                let file =
                    read_file_field(field, state.config.max_job_spec_bytes, "job_spec").await?;
                job_spec = Some(JobSpecSource::File(file));
            }
            "job_spec_text_input" => {
                if job_spec.is_some() {
                    return Err(both_job_specs());
                }
                let text = field.text().await.map_err(|e| {
                    AppError::Validation(format!("could not read 'job_spec_text_input': {e}"))
                })?;
                job_spec = Some(JobSpecSource::Text(text));
            }
            other => {
                debug!("Ignoring unknown multipart field '{other}'");
            }
        }
    }

    let cv = cv.ok_or_else(|| {
        AppError::Validation("a CV file is required in the 'cv' field".to_string())
    })?;
    let job_spec = job_spec.ok_or_else(|| {
        AppError::Validation(
            "a job specification is required: attach 'job_spec' or provide 'job_spec_text_input'"
                .to_string(),
        )
    })?;

    // CV: allow-list gate, then format dispatch, then extraction.
    ensure_allowed(
        &cv.media_type,
        &cv.file_name,
        &state.config.allowed_cv_media_types,
        &state.config.allowed_cv_extensions,
    )?;
    let cv_kind = DocumentKind::detect(&cv.media_type, &cv.file_name).ok_or_else(|| {
        AppError::Validation(format!(
            "unsupported CV format '{}' ({})",
            cv.media_type, cv.file_name
        ))
    })?;
    let cv_text = extract_text(cv_kind, cv.bytes.clone()).await?;

    let (job_spec_text, job_spec_file_name, job_spec_media_type) = match job_spec {
        JobSpecSource::File(file) => {
            let kind = DocumentKind::detect(&file.media_type, &file.file_name).ok_or_else(|| {
                AppError::Validation(format!(
                    "unsupported job spec format '{}' ({})",
                    file.media_type, file.file_name
                ))
            })?;
            let text = extract_text(kind, file.bytes).await?;
            (text, Some(file.file_name), Some(file.media_type))
        }
        JobSpecSource::Text(text) => {
            let text = text.trim().to_string();
            if text.is_empty() {
                return Err(AppError::Validation(
                    "'job_spec_text_input' must not be empty".to_string(),
                ));
            }
            (text, None, None)
        }
    };

    let mut submission = state
        .store
        .create(NewSubmission {
            cv_file_name: cv.file_name.clone(),
            cv_media_type: cv.media_type.clone(),
            cv_text,
            job_spec_file_name,
            job_spec_media_type,
            job_spec_text,
        })
        .await?;

    // Raw-upload archival is best effort; the extracted text is already safe
    // in Postgres.
    match state
        .artifacts
        .put_upload(submission.id, &cv.file_name, &cv.media_type, cv.bytes)
        .await
    {
        Ok(Some(key)) => {
            if let Err(e) = state.store.record_cv_s3_key(submission.id, &key).await {
                warn!("Could not record CV archive key for {}: {e}", submission.id);
            }
        }
        Ok(None) => {}
        Err(e) => warn!("Could not archive CV for {}: {e}", submission.id),
    }

    // Queue the tailoring job. A broker outage is not an upload failure: the
    // row stays 'uploaded' and /tailor-cv can still drive it on demand.
    let payload = serde_json::json!({ "submission_id": submission.id });
    match state
        .queue
        .enqueue(TAILORING_QUEUE, payload, JobOptions::default())
        .await
    {
        Ok(job_id) => {
            info!("Submission {} queued for tailoring (job {job_id})", submission.id);
            submission = state
                .store
                .transition(submission.id, SubmissionStatus::Uploaded, SubmissionStatus::Queued)
                .await?;
        }
        Err(e) => {
            warn!("Could not queue submission {} for tailoring: {e}", submission.id);
        }
    }

    Ok(Json(UploadResponse {
        message: "CV uploaded successfully".to_string(),
        data: vec![UploadedSubmission {
            id: submission.id,
            status: submission.status.clone(),
        }],
    }))
}

/// POST /tailor-cv
/// Tailors the submission (reusing a stored result when present) and returns
/// the rendered PDF as an attachment.
pub async fn handle_tailor(
    State(state): State<AppState>,
    Json(req): Json<TailorRequest>,
) -> Result<Response, AppError> {
    let id = req.submission_id;
    let cv = tailor_submission(&state.store, state.llm.as_ref(), &state.tailor_gate, id).await?;
    let pdf = render_cv(state.renderer.as_ref(), &cv).await?;

    match state.artifacts.put_artifact(id, pdf.clone()).await {
        Ok(Some(key)) => {
            if let Err(e) = state.store.record_artifact_s3_key(id, &key).await {
                warn!("Could not record artifact key for {id}: {e}");
            }
        }
        Ok(None) => {}
        Err(e) => warn!("Could not archive rendered PDF for {id}: {e}"),
    }

    let headers = [
        (header::CONTENT_TYPE, "application/pdf".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"tailored_cv_{id}.pdf\""),
        ),
    ];
    Ok((headers, pdf).into_response())
}

/// GET /submission/:id
pub async fn handle_get_submission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubmissionRow>, AppError> {
    let submission = state
        .store
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("submission {id} not found")))?;
    Ok(Json(submission))
}

fn both_job_specs() -> AppError {
    AppError::Validation(
        "provide either 'job_spec' or 'job_spec_text_input', not both".to_string(),
    )
}

async fn read_file_field(
    field: Field<'_>,
    max_bytes: usize,
    name: &str,
) -> Result<UploadedFile, AppError> {
    let file_name = field.file_name().unwrap_or("upload").to_string();
    let media_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let bytes = field
        .bytes()
        .await
        .map_err(|e| AppError::Validation(format!("could not read the '{name}' field: {e}")))?;
    if bytes.is_empty() {
        return Err(AppError::Validation(format!("the '{name}' file is empty")));
    }
    if bytes.len() > max_bytes {
        return Err(AppError::Validation(format!(
            "the '{name}' file exceeds the {max_bytes} byte limit"
        )));
    }
    Ok(UploadedFile {
        file_name,
        media_type,
        bytes,
    })
}
