//! PDF artifact rendering.
//!
//! A tailored document becomes HTML ([`html`]) and the HTML becomes a PDF via
//! an external headless-browser engine ([`engine`]). Sections with no content
//! are omitted from the markup entirely, so a thin CV renders as a short
//! clean page rather than a scaffold of empty headings.

pub mod engine;
mod html;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::AppError;
use crate::models::tailored::TailoredCv;

pub use engine::HttpRenderEngine;
pub use html::render_html;

/// HTML-to-PDF seam. Production wires the HTTP engine; tests wire a stub
/// that returns a fixed binary.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn render_pdf(&self, html: &str) -> Result<Bytes, AppError>;
}

/// Renders a tailored document to PDF bytes. Either the whole binary comes
/// back or an error does; callers never see a partial artifact.
pub async fn render_cv(engine: &dyn RenderEngine, cv: &TailoredCv) -> Result<Bytes, AppError> {
    let markup = html::render_html(cv);
    let pdf = engine.render_pdf(&markup).await?;
    if pdf.is_empty() {
        return Err(AppError::Render("render engine returned an empty body".to_string()));
    }
    Ok(pdf)
}
