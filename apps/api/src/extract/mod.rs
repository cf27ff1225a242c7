//! Document text extraction.
//!
//! Uploads arrive as PDF, DOCX, or plain text. Format detection is explicit:
//! the declared media type wins, the file extension breaks ties, and anything
//! unrecognized is rejected before a byte is parsed. Extraction itself is a
//! match on `DocumentKind`, so adding a format means adding a variant and an
//! arm, not another content sniffer.

mod docx;

use bytes::Bytes;
use tracing::warn;

use crate::errors::AppError;

pub const MEDIA_TYPE_PDF: &str = "application/pdf";
pub const MEDIA_TYPE_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MEDIA_TYPE_TEXT: &str = "text/plain";

/// Supported upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    PlainText,
}

impl DocumentKind {
    /// Resolves a format from the declared media type, falling back to the
    /// file extension when the type is absent or unknown (browsers routinely
    /// send `application/octet-stream` for .docx).
    pub fn detect(media_type: &str, file_name: &str) -> Option<Self> {
        // Strip any charset suffix: "text/plain; charset=utf-8".
        let essence = media_type.split(';').next().unwrap_or("").trim();
        match essence {
            MEDIA_TYPE_PDF => return Some(Self::Pdf),
            MEDIA_TYPE_DOCX => return Some(Self::Docx),
            MEDIA_TYPE_TEXT => return Some(Self::PlainText),
            _ => {}
        }

        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".pdf") {
            Some(Self::Pdf)
        } else if lower.ends_with(".docx") {
            Some(Self::Docx)
        } else if lower.ends_with(".txt") {
            Some(Self::PlainText)
        } else {
            None
        }
    }
}

/// Rejects uploads whose media type and extension are both outside the
/// configured allow-lists.
pub fn ensure_allowed(
    media_type: &str,
    file_name: &str,
    allowed_types: &[String],
    allowed_extensions: &[String],
) -> Result<(), AppError> {
    let essence = media_type.split(';').next().unwrap_or("").trim();
    if allowed_types.iter().any(|allowed| allowed == essence) {
        return Ok(());
    }
    let lower = file_name.to_ascii_lowercase();
    if allowed_extensions.iter().any(|ext| lower.ends_with(ext.as_str())) {
        return Ok(());
    }
    Err(AppError::Validation(format!(
        "unsupported document type '{essence}' for file '{file_name}'"
    )))
}

/// Extracts plain text from an uploaded document.
///
/// PDF parsing is CPU-bound and runs on the blocking pool; DOCX and plain
/// text are cheap enough to decode inline.
pub async fn extract_text(kind: DocumentKind, bytes: Bytes) -> Result<String, AppError> {
    let text = match kind {
        DocumentKind::Pdf => {
            let raw = bytes.to_vec();
            let parsed = tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text_from_mem(&raw)
            })
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("PDF extraction task failed: {e}")))?;
            match parsed {
                Ok(text) => text,
                Err(e) => {
                    warn!("PDF extraction failed: {e}");
                    return Err(AppError::Extraction(
                        "could not extract text from the PDF document".to_string(),
                    ));
                }
            }
        }
        DocumentKind::Docx => docx::extract_docx_text(&bytes)?,
        DocumentKind::PlainText => String::from_utf8_lossy(&bytes).into_owned(),
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(AppError::Extraction(
            "the document contains no extractable text".to_string(),
        ));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_prefers_the_declared_media_type() {
        assert_eq!(
            DocumentKind::detect(MEDIA_TYPE_PDF, "resume.bin"),
            Some(DocumentKind::Pdf)
        );
        assert_eq!(
            DocumentKind::detect(MEDIA_TYPE_DOCX, "resume"),
            Some(DocumentKind::Docx)
        );
    }

    #[test]
    fn test_detect_strips_charset_suffixes() {
        assert_eq!(
            DocumentKind::detect("text/plain; charset=utf-8", "notes"),
            Some(DocumentKind::PlainText)
        );
    }

    #[test]
    fn test_detect_falls_back_to_the_extension() {
        assert_eq!(
            DocumentKind::detect("application/octet-stream", "Resume.DOCX"),
            Some(DocumentKind::Docx)
        );
        assert_eq!(
            DocumentKind::detect("", "cv.txt"),
            Some(DocumentKind::PlainText)
        );
    }

    #[test]
    fn test_detect_rejects_unknown_formats() {
        assert_eq!(DocumentKind::detect("image/png", "photo.png"), None);
        assert_eq!(DocumentKind::detect("application/octet-stream", "cv"), None);
    }

    #[test]
    fn test_ensure_allowed_accepts_listed_types_and_extensions() {
        let types = vec![MEDIA_TYPE_PDF.to_string()];
        let exts = vec![".txt".to_string()];
        assert!(ensure_allowed(MEDIA_TYPE_PDF, "cv.bin", &types, &exts).is_ok());
        assert!(ensure_allowed("application/octet-stream", "cv.txt", &types, &exts).is_ok());
        assert!(ensure_allowed("image/png", "cv.png", &types, &exts).is_err());
    }

    #[tokio::test]
    async fn test_plaintext_extraction_is_lossy_on_bad_utf8() {
        let bytes = Bytes::from(vec![b'h', b'i', 0xFF, b'!', b'\n']);
        let text = extract_text(DocumentKind::PlainText, bytes).await.unwrap();
        assert!(text.starts_with("hi"), "lossy decode should keep valid prefix: {text}");
        assert!(text.ends_with('!'));
    }

    #[tokio::test]
    async fn test_whitespace_only_documents_are_rejected() {
        let bytes = Bytes::from_static(b"  \n\t  ");
        let err = extract_text(DocumentKind::PlainText, bytes).await.unwrap_err();
        assert!(matches!(err, AppError::Extraction(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_garbage_pdf_bytes_report_an_extraction_error() {
        let bytes = Bytes::from_static(b"not a pdf at all");
        let err = extract_text(DocumentKind::Pdf, bytes).await.unwrap_err();
        assert!(matches!(err, AppError::Extraction(_)), "got {err:?}");
    }
}
