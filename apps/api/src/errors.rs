use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Application-level error type, returned from handlers as
/// `Result<T, AppError>`.
///
/// Caller-fixable problems (validation, extraction, not-found) keep their
/// message in the response. Server-side failures log the detail and hand the
/// caller a generic message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The cache layer is fail-open and swallows its own errors; this
    /// variant only exists so a stray cache error still maps somewhere.
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Generative output invalid after {attempts} attempts")]
    GenerativeFormat { attempts: u32 },

    #[error("Render error: {0}")]
    Render(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::Extraction(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_)
            | AppError::Cache(_)
            | AppError::GenerativeFormat { .. }
            | AppError::Render(_)
            | AppError::Timeout(_)
            | AppError::Queue(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Extraction(_) => "EXTRACTION_ERROR",
            AppError::Database(_) => "STORAGE_ERROR",
            AppError::Cache(_) => "CACHE_ERROR",
            AppError::GenerativeFormat { .. } => "GENERATIVE_FORMAT_ERROR",
            AppError::Render(_) => "RENDER_ERROR",
            AppError::Timeout(_) => "TIMEOUT_ERROR",
            AppError::Queue(_) => "QUEUE_ERROR",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// The message shown to the caller. Server-side variants hide their
    /// detail behind generic wording.
    fn public_message(&self) -> String {
        match self {
            AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::Extraction(msg) => msg.clone(),
            AppError::Database(_) => "A storage error occurred".to_string(),
            AppError::Cache(_) => "A cache error occurred".to_string(),
            AppError::GenerativeFormat { .. } => {
                "The AI response could not be processed".to_string()
            }
            AppError::Render(_) => "PDF rendering failed".to_string(),
            AppError::Timeout(_) => "An upstream service timed out".to_string(),
            AppError::Queue(_) => "A queue error occurred".to_string(),
            AppError::RateLimited => "Too many requests, slow down".to_string(),
            AppError::Internal(_) => "An internal server error occurred".to_string(),
        }
    }

    fn log_server_detail(&self) {
        match self {
            AppError::NotFound(_)
            | AppError::Validation(_)
            | AppError::Extraction(_)
            | AppError::RateLimited => {}
            AppError::Internal(e) => error!("Internal error: {e:?}"),
            other => error!("{other}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log_server_detail();
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}
