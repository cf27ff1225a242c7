use std::sync::Arc;

use crate::config::Config;
use crate::health::metrics::MetricsState;
use crate::health::SystemMonitor;
use crate::llm_client::GenerativeClient;
use crate::queue::JobQueue;
use crate::render::RenderEngine;
use crate::store::{artifacts::ArtifactStore, SubmissionStore};
use crate::tailor::TailorGate;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: SubmissionStore,
    pub artifacts: ArtifactStore,
    pub queue: Arc<JobQueue>,
    /// Pluggable text-completion client. Production: the Anthropic-backed
    /// LlmClient; tests: a scripted fake.
    pub llm: Arc<dyn GenerativeClient>,
    /// Pluggable HTML-to-PDF engine. Production: the HTTP render service.
    pub renderer: Arc<dyn RenderEngine>,
    pub metrics: MetricsState,
    pub monitor: SystemMonitor,
    pub tailor_gate: TailorGate,
}
