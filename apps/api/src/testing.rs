//! Shared test fakes and fixtures.
//!
//! Every seam the crate exposes (storage backend, queue broker, generative
//! client, render engine) has an in-memory stand-in here, so handler and
//! pipeline tests run the real orchestration code against fakes that honor
//! the same contracts. Redis is represented by a client pointed at a closed
//! port: connecting fails fast, which is exactly what the fail-open cache
//! paths need exercised.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::AppError;
use crate::health::metrics::MetricsState;
use crate::health::SystemMonitor;
use crate::llm_client::{GenerativeClient, LlmError};
use crate::models::submission::{SubmissionRow, SubmissionStatus};
use crate::queue::{
    Broker, JobOutcome, JobQueue, MaintenanceReport, QueueCounts, QueuePolicy, QueuedJob,
};
use crate::render::RenderEngine;
use crate::state::AppState;
use crate::store::{artifacts::ArtifactStore, SubmissionBackend, SubmissionCache, SubmissionStore};
use crate::tailor::TailorGate;

// ────────────────────────────────────────────────────────────────────────────
// Storage
// ────────────────────────────────────────────────────────────────────────────

/// In-memory [`SubmissionBackend`] mirroring the guarded-update semantics of
/// the SQL statements in the Postgres backend.
#[derive(Default)]
pub struct FakeBackend {
    rows: Mutex<HashMap<Uuid, SubmissionRow>>,
}

impl FakeBackend {
    pub async fn row(&self, id: Uuid) -> Option<SubmissionRow> {
        self.rows.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl SubmissionBackend for FakeBackend {
    async fn insert(&self, row: &SubmissionRow) -> Result<(), AppError> {
        self.rows.lock().unwrap().insert(row.id, row.clone());
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<SubmissionRow>, AppError> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn set_status(
        &self,
        id: Uuid,
        from: SubmissionStatus,
        to: SubmissionStatus,
    ) -> Result<Option<SubmissionRow>, AppError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if row.status != from.as_str() {
            return Ok(None);
        }
        row.status = to.as_str().to_string();
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn set_tailored(
        &self,
        id: Uuid,
        tailored: &Value,
    ) -> Result<Option<SubmissionRow>, AppError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if row.status != SubmissionStatus::Tailoring.as_str() {
            return Ok(None);
        }
        row.status = SubmissionStatus::Tailored.as_str().to_string();
        row.tailored = Some(tailored.clone());
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn set_failed(&self, id: Uuid, reason: &str) -> Result<Option<SubmissionRow>, AppError> {
        let mut rows = self.rows.lock().unwrap();
        let Some(row) = rows.get_mut(&id) else {
            return Ok(None);
        };
        let status = SubmissionStatus::parse(&row.status);
        if matches!(status, Some(s) if s.is_terminal()) {
            return Ok(None);
        }
        row.status = SubmissionStatus::Failed.as_str().to_string();
        row.failure_reason = Some(reason.to_string());
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn set_cv_s3_key(&self, id: Uuid, key: &str) -> Result<(), AppError> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.cv_s3_key = Some(key.to_string());
        }
        Ok(())
    }

    async fn set_artifact_s3_key(&self, id: Uuid, key: &str) -> Result<(), AppError> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.artifact_s3_key = Some(key.to_string());
        }
        Ok(())
    }

    async fn ping(&self) -> Result<Duration, AppError> {
        Ok(Duration::from_millis(1))
    }
}

/// Cache client pointed at a port nothing listens on. `open` only parses the
/// URL; connecting fails fast, so every cache operation exercises the
/// fail-open path.
pub fn dead_cache() -> SubmissionCache {
    let client = redis::Client::open("redis://127.0.0.1:1/").expect("static redis url parses");
    SubmissionCache::new(client, 60)
}

// ────────────────────────────────────────────────────────────────────────────
// Queue
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct QueueSlots {
    jobs: HashMap<Uuid, QueuedJob>,
    /// (priority, seq, id), kept sorted; lowest tuple pops first.
    ready: Vec<(u8, u64, Uuid)>,
    /// (fire_at_ms, id)
    delayed: Vec<(i64, Uuid)>,
    /// (lease_until_ms, id)
    active: Vec<(i64, Uuid)>,
    /// Newest first, like the Redis LPUSH lists.
    completed: Vec<QueuedJob>,
    failed: Vec<(QueuedJob, String)>,
}

/// In-memory [`Broker`] with the same contract as the Redis one.
#[derive(Default)]
pub struct InMemoryBroker {
    queues: Mutex<HashMap<String, QueueSlots>>,
    paused: AtomicBool,
    seq: AtomicU64,
    push_broken: AtomicBool,
    retry_fires: Mutex<Vec<i64>>,
}

impl InMemoryBroker {
    /// Makes every push fail, simulating a broker outage.
    pub fn break_pushes(&self) {
        self.push_broken.store(true, Ordering::SeqCst);
    }

    /// Fire times of every retry settled so far, in order.
    pub fn retry_fires(&self) -> Vec<i64> {
        self.retry_fires.lock().unwrap().clone()
    }

    /// Payloads currently waiting (ready or delayed) on a queue.
    pub fn waiting_payloads(&self, queue: &str) -> Vec<Value> {
        let queues = self.queues.lock().unwrap();
        let Some(slots) = queues.get(queue) else {
            return Vec::new();
        };
        let ready = slots.ready.iter().map(|(_, _, id)| id);
        let delayed = slots.delayed.iter().map(|(_, id)| id);
        ready
            .chain(delayed)
            .filter_map(|id| slots.jobs.get(id).map(|job| job.payload.clone()))
            .collect()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn promote_in(&self, slots: &mut QueueSlots, now_ms: i64) -> u64 {
        let mut promoted = 0;
        let mut remaining = Vec::new();
        for (fire_at, id) in slots.delayed.drain(..) {
            if fire_at <= now_ms {
                if let Some(job) = slots.jobs.get(&id) {
                    slots.ready.push((job.priority, self.next_seq(), id));
                    promoted += 1;
                }
            } else {
                remaining.push((fire_at, id));
            }
        }
        slots.delayed = remaining;
        slots.ready.sort();
        promoted
    }

    fn ensure_pushable(&self) -> Result<(), AppError> {
        if self.push_broken.load(Ordering::SeqCst) {
            return Err(AppError::Queue("broker offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn push_ready(&self, job: &QueuedJob) -> Result<(), AppError> {
        self.ensure_pushable()?;
        let mut queues = self.queues.lock().unwrap();
        let slots = queues.entry(job.queue.clone()).or_default();
        slots.jobs.insert(job.id, job.clone());
        slots.ready.push((job.priority, self.next_seq(), job.id));
        slots.ready.sort();
        Ok(())
    }

    async fn push_delayed(&self, job: &QueuedJob, fire_at_ms: i64) -> Result<(), AppError> {
        self.ensure_pushable()?;
        let mut queues = self.queues.lock().unwrap();
        let slots = queues.entry(job.queue.clone()).or_default();
        slots.jobs.insert(job.id, job.clone());
        slots.delayed.push((fire_at_ms, job.id));
        Ok(())
    }

    async fn promote_due(&self, queue: &str, now_ms: i64) -> Result<u64, AppError> {
        let mut queues = self.queues.lock().unwrap();
        let Some(slots) = queues.get_mut(queue) else {
            return Ok(0);
        };
        Ok(self.promote_in(slots, now_ms))
    }

    async fn pop_ready(
        &self,
        queue: &str,
        lease_until_ms: i64,
    ) -> Result<Option<QueuedJob>, AppError> {
        let mut queues = self.queues.lock().unwrap();
        let Some(slots) = queues.get_mut(queue) else {
            return Ok(None);
        };
        if slots.ready.is_empty() {
            return Ok(None);
        }
        let (_, _, id) = slots.ready.remove(0);
        slots.active.push((lease_until_ms, id));
        Ok(slots.jobs.get(&id).cloned())
    }

    async fn settle(
        &self,
        job: &QueuedJob,
        outcome: JobOutcome,
        retention: usize,
    ) -> Result<(), AppError> {
        let mut queues = self.queues.lock().unwrap();
        let slots = queues.entry(job.queue.clone()).or_default();
        slots.active.retain(|(_, id)| *id != job.id);
        match outcome {
            JobOutcome::Completed => {
                slots.jobs.remove(&job.id);
                slots.completed.insert(0, job.clone());
                slots.completed.truncate(retention);
            }
            JobOutcome::Retry { fire_at_ms } => {
                slots.jobs.insert(job.id, job.clone());
                slots.delayed.push((fire_at_ms, job.id));
                self.retry_fires.lock().unwrap().push(fire_at_ms);
            }
            JobOutcome::Failed { error } => {
                slots.jobs.remove(&job.id);
                slots.failed.insert(0, (job.clone(), error));
                slots.failed.truncate(retention);
            }
        }
        Ok(())
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts, AppError> {
        let queues = self.queues.lock().unwrap();
        let Some(slots) = queues.get(queue) else {
            return Ok(QueueCounts::default());
        };
        Ok(QueueCounts {
            waiting: (slots.ready.len() + slots.delayed.len()) as u64,
            active: slots.active.len() as u64,
            completed: slots.completed.len() as u64,
            failed: slots.failed.len() as u64,
        })
    }

    async fn set_paused(&self, paused: bool) -> Result<(), AppError> {
        self.paused.store(paused, Ordering::SeqCst);
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool, AppError> {
        Ok(self.paused.load(Ordering::SeqCst))
    }

    async fn maintain(
        &self,
        queue: &str,
        now_ms: i64,
        retention: usize,
    ) -> Result<MaintenanceReport, AppError> {
        let mut queues = self.queues.lock().unwrap();
        let Some(slots) = queues.get_mut(queue) else {
            return Ok(MaintenanceReport::default());
        };
        let promoted = self.promote_in(slots, now_ms);

        let mut reclaimed = 0;
        let mut still_leased = Vec::new();
        let expired: Vec<Uuid> = {
            let mut expired = Vec::new();
            for (lease_until, id) in slots.active.drain(..) {
                if lease_until <= now_ms {
                    expired.push(id);
                } else {
                    still_leased.push((lease_until, id));
                }
            }
            expired
        };
        slots.active = still_leased;
        for id in expired {
            if let Some(job) = slots.jobs.get(&id) {
                slots.ready.push((job.priority, self.next_seq(), id));
                reclaimed += 1;
            }
        }
        slots.ready.sort();

        let over_completed = slots.completed.len().saturating_sub(retention);
        let over_failed = slots.failed.len().saturating_sub(retention);
        slots.completed.truncate(retention);
        slots.failed.truncate(retention);

        Ok(MaintenanceReport {
            promoted,
            reclaimed,
            trimmed: (over_completed + over_failed) as u64,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Generative client and render engine
// ────────────────────────────────────────────────────────────────────────────

/// Replays a fixed list of responses, counting calls. An exhausted script
/// answers with `EmptyContent`.
pub struct ScriptedGenerative {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicU32,
    delay: Option<Duration>,
}

impl ScriptedGenerative {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicU32::new(0),
            delay: None,
        }
    }

    /// Adds latency per call so concurrency tests have a window to overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerativeClient for ScriptedGenerative {
    async fn complete(&self, _prompt: &str, _system: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        next.ok_or(LlmError::EmptyContent)
    }
}

/// Minimal but signature-correct PDF bytes.
pub const PDF_STUB: &[u8] =
    b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n<< /Root 1 0 R >>\n%%EOF\n";

/// Records rendered markup and returns [`PDF_STUB`].
#[derive(Default)]
pub struct StubRenderEngine {
    htmls: Mutex<Vec<String>>,
}

impl StubRenderEngine {
    pub fn rendered(&self) -> Vec<String> {
        self.htmls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RenderEngine for StubRenderEngine {
    async fn render_pdf(&self, html: &str) -> Result<Bytes, AppError> {
        self.htmls.lock().unwrap().push(html.to_string());
        Ok(Bytes::from_static(PDF_STUB))
    }
}

/// A well-formed model response. `soft_skills` is deliberately a single
/// comma-separated string to exercise loose-list normalization.
pub const GOOD_TAILORED_JSON: &str = r#"{
  "name": "Ada Lovelace",
  "title": "Systems Engineer",
  "contact": {"email": "ada@example.com", "links": ["ada.dev"]},
  "summary": "Engineer with a record of building analytical machinery.",
  "experience": [
    {
      "title": "Engineer",
      "organization": "Analytical Engines Ltd",
      "date_range": "1835 - 1852",
      "bullets": ["Designed and published the first machine algorithm"]
    }
  ],
  "education": [
    {"degree": "Mathematics", "institution": "Private tuition, London"}
  ],
  "technical_skills": ["Rust", "Postgres"],
  "soft_skills": "Documentation, Mentoring",
  "portfolio": []
}"#;

// ────────────────────────────────────────────────────────────────────────────
// Wiring
// ────────────────────────────────────────────────────────────────────────────

pub fn test_policy() -> QueuePolicy {
    QueuePolicy {
        max_attempts: 3,
        backoff_base_ms: 2_000,
        backoff_cap_ms: 60_000,
        retention: 5,
        lease_secs: 120,
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        redis_url: "redis://127.0.0.1:1/".to_string(),
        s3_bucket: "unused".to_string(),
        s3_endpoint: "http://127.0.0.1:1".to_string(),
        aws_access_key_id: "unused".to_string(),
        aws_secret_access_key: "unused".to_string(),
        anthropic_api_key: "unused".to_string(),
        renderer_url: "http://127.0.0.1:1/pdf".to_string(),
        port: 0,
        rust_log: "info".to_string(),
        cors_origin: "*".to_string(),
        rate_limit_window_secs: 60,
        rate_limit_max_upload: 50,
        rate_limit_max_tailor: 50,
        max_cv_bytes: 64 * 1024,
        max_job_spec_bytes: 64 * 1024,
        allowed_cv_media_types: vec![
            "application/pdf".to_string(),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document".to_string(),
            "text/plain".to_string(),
        ],
        allowed_cv_extensions: vec![".pdf".to_string(), ".docx".to_string(), ".txt".to_string()],
        cache_ttl_secs: 60,
        queue_max_attempts: 3,
        queue_backoff_base_ms: 2_000,
        queue_backoff_cap_ms: 60_000,
        queue_retention: 5,
        queue_lease_secs: 120,
        worker_poll_ms: 10,
        maintenance_interval_secs: 60,
        health_sample_interval_secs: 300,
        render_timeout_secs: 5,
    }
}

/// Full application state over fakes, with handles kept for assertions.
pub struct TestHarness {
    pub state: AppState,
    pub backend: Arc<FakeBackend>,
    pub broker: Arc<InMemoryBroker>,
    pub llm: Arc<ScriptedGenerative>,
    pub renderer: Arc<StubRenderEngine>,
}

pub fn test_harness(llm_responses: Vec<String>) -> TestHarness {
    test_harness_with(test_config(), llm_responses)
}

pub fn test_harness_with(config: Config, llm_responses: Vec<String>) -> TestHarness {
    let backend = Arc::new(FakeBackend::default());
    let broker = Arc::new(InMemoryBroker::default());
    let llm = Arc::new(ScriptedGenerative::new(llm_responses));
    let renderer = Arc::new(StubRenderEngine::default());

    let store = SubmissionStore::new(backend.clone(), dead_cache());
    let queue = Arc::new(JobQueue::new(broker.clone(), QueuePolicy::from_config(&config)));

    let state = AppState {
        config,
        store,
        artifacts: ArtifactStore::disabled(),
        queue,
        llm: llm.clone(),
        renderer: renderer.clone(),
        metrics: MetricsState::init(),
        monitor: SystemMonitor::default(),
        tailor_gate: TailorGate::default(),
    };

    TestHarness {
        state,
        backend,
        broker,
        llm,
        renderer,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Multipart
// ────────────────────────────────────────────────────────────────────────────

const BOUNDARY: &str = "retailor-test-boundary-7f2c";

/// Hand-rolled multipart/form-data body for router tests.
#[derive(Default)]
pub struct MultipartBody {
    body: Vec<u8>,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> Self {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        self.body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n"
            )
            .as_bytes(),
        );
        self.body
            .extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        self.body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Returns the content-type header value and the finished body.
    pub fn build(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        (
            format!("multipart/form-data; boundary={BOUNDARY}"),
            self.body,
        )
    }
}
