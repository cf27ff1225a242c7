//! Request metrics.
//!
//! Counter state lives in [`MetricsState`], created once at startup and
//! injected wherever it is read or written; nothing here is process-global.
//! The [`track_metrics`] middleware records every response that passes
//! through the router.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use serde::Serialize;

#[derive(Default)]
struct MetricsInner {
    request_count: AtomicU64,
    error_count: AtomicU64,
    latency_total_ms: AtomicU64,
}

#[derive(Clone, Default)]
pub struct MetricsState {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
}

impl MetricsState {
    pub fn init() -> Self {
        Self::default()
    }

    pub fn record(&self, status: StatusCode, latency_ms: u64) {
        self.inner.request_count.fetch_add(1, Ordering::Relaxed);
        self.inner.latency_total_ms.fetch_add(latency_ms, Ordering::Relaxed);
        if status.is_client_error() || status.is_server_error() {
            self.inner.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let request_count = self.inner.request_count.load(Ordering::Relaxed);
        let error_count = self.inner.error_count.load(Ordering::Relaxed);
        let latency_total = self.inner.latency_total_ms.load(Ordering::Relaxed);
        let avg_latency_ms = if request_count == 0 {
            0.0
        } else {
            latency_total as f64 / request_count as f64
        };
        MetricsSnapshot {
            request_count,
            error_count,
            avg_latency_ms,
        }
    }

    /// Zeroes all counters.
    #[allow(dead_code)]
    pub fn reset(&self) {
        self.inner.request_count.store(0, Ordering::Relaxed);
        self.inner.error_count.store(0, Ordering::Relaxed);
        self.inner.latency_total_ms.store(0, Ordering::Relaxed);
    }
}

/// Middleware recording count, error count, and latency for each response.
pub async fn track_metrics(
    State(metrics): State<MetricsState>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let response = next.run(request).await;
    let latency_ms = started.elapsed().as_millis() as u64;
    metrics.record(response.status(), latency_ms);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_averages_recorded_latencies() {
        let metrics = MetricsState::init();
        metrics.record(StatusCode::OK, 10);
        metrics.record(StatusCode::OK, 30);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 0);
        assert!((snapshot.avg_latency_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_client_and_server_errors_both_count() {
        let metrics = MetricsState::init();
        metrics.record(StatusCode::BAD_REQUEST, 1);
        metrics.record(StatusCode::INTERNAL_SERVER_ERROR, 1);
        metrics.record(StatusCode::NO_CONTENT, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.request_count, 3);
        assert_eq!(snapshot.error_count, 2);
    }

    #[test]
    fn test_an_empty_state_averages_to_zero() {
        let snapshot = MetricsState::init().snapshot();
        assert_eq!(snapshot.request_count, 0);
        assert_eq!(snapshot.avg_latency_ms, 0.0);
    }

    #[test]
    fn test_reset_zeroes_every_counter() {
        let metrics = MetricsState::init();
        metrics.record(StatusCode::NOT_FOUND, 42);
        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.request_count, 0);
        assert_eq!(snapshot.error_count, 0);
        assert_eq!(snapshot.avg_latency_ms, 0.0);
    }

    #[test]
    fn test_clones_share_the_same_counters() {
        let metrics = MetricsState::init();
        let clone = metrics.clone();
        clone.record(StatusCode::OK, 5);
        assert_eq!(metrics.snapshot().request_count, 1);
    }
}
