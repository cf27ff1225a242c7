//! DOCX text extraction.
//!
//! A .docx file is a zip archive whose main body lives in
//! `word/document.xml`. The text we want sits inside `<w:t>` runs grouped
//! into `<w:p>` paragraphs. Pulling a handful of known tags out of a known
//! document shape does not need a full XML parser, so this scans for the run
//! markers directly and decodes the five standard entities.

use std::io::{Cursor, Read};

use crate::errors::AppError;

const DOCUMENT_PART: &str = "word/document.xml";

/// Extracts paragraph text from DOCX bytes, one line per paragraph.
pub fn extract_docx_text(bytes: &[u8]) -> Result<String, AppError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| AppError::Extraction(format!("not a valid DOCX archive: {e}")))?;
    let mut document = archive
        .by_name(DOCUMENT_PART)
        .map_err(|_| AppError::Extraction("the DOCX archive has no document body".to_string()))?;
    let mut xml = String::new();
    document
        .read_to_string(&mut xml)
        .map_err(|e| AppError::Extraction(format!("unreadable DOCX document body: {e}")))?;
    Ok(collect_text_runs(&xml))
}

fn collect_text_runs(xml: &str) -> String {
    let mut paragraphs = Vec::new();
    for chunk in xml.split("</w:p>") {
        let mut paragraph = String::new();
        let mut rest = chunk;
        while let Some(i) = rest.find("<w:t") {
            rest = &rest[i + 4..];
            // "<w:t" also prefixes <w:tbl> and <w:tab/>; a text run continues
            // with '>' or an attribute list.
            match rest.as_bytes().first() {
                Some(b'>') | Some(b' ') => {}
                _ => continue,
            }
            let Some(open_end) = rest.find('>') else { break };
            if rest[..open_end].ends_with('/') {
                // Self-closing empty run.
                rest = &rest[open_end + 1..];
                continue;
            }
            let body = &rest[open_end + 1..];
            let Some(close) = body.find("</w:t>") else { break };
            paragraph.push_str(&decode_entities(&body[..close]));
            rest = &body[close..];
        }
        let paragraph = paragraph.trim();
        if !paragraph.is_empty() {
            paragraphs.push(paragraph.to_string());
        }
    }
    paragraphs.join("\n")
}

fn decode_entities(text: &str) -> String {
    // &amp; last, so "&amp;lt;" decodes to "&lt;" and not "<".
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
