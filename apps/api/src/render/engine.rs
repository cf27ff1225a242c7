//! HTTP render engine client.
//!
//! Talks to a headless-Chromium rendering service (Browserless or
//! compatible): POST the HTML with print options, get PDF bytes back. The
//! request either yields the complete binary or an error.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::errors::AppError;
use crate::render::RenderEngine;

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    html: &'a str,
    options: RenderOptions,
}

#[derive(Debug, Serialize)]
struct RenderOptions {
    #[serde(rename = "printBackground")]
    print_background: bool,
    format: &'static str,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            print_background: true,
            format: "A4",
        }
    }
}

pub struct HttpRenderEngine {
    client: Client,
    endpoint: String,
}

impl HttpRenderEngine {
    pub fn new(endpoint: String, timeout: std::time::Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
            endpoint,
        }
    }
}

#[async_trait]
impl RenderEngine for HttpRenderEngine {
    async fn render_pdf(&self, html: &str) -> Result<Bytes, AppError> {
        let request = RenderRequest {
            html,
            options: RenderOptions::default(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!("render engine timed out: {e}"))
                } else {
                    AppError::Render(format!("render engine unreachable: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Render(format!(
                "render engine returned {status}: {detail}"
            )));
        }

        let pdf = response
            .bytes()
            .await
            .map_err(|e| AppError::Render(format!("render engine response truncated: {e}")))?;
        debug!("Render engine returned {} bytes", pdf.len());
        Ok(pdf)
    }
}
