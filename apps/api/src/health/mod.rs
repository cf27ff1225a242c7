//! Component health checks and the periodic sampler.
//!
//! Each dependency (database, cache, queue, host) is probed into a
//! [`ComponentHealth`] with a three-level tier; the composite report carries
//! the worst tier of any component. A background sampler re-probes on a fixed
//! interval so unhealthy dependencies surface in the logs even when nobody is
//! polling the endpoints.

pub mod metrics;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::System;
use tracing::{debug, error, warn};

use crate::queue::{JobQueue, QueueCounts, TAILORING_QUEUE};
use crate::store::SubmissionStore;

// ────────────────────────────────────────────────────────────────────────────
// Thresholds
// ────────────────────────────────────────────────────────────────────────────

const DB_LATENCY_WARN: Duration = Duration::from_millis(500);
const CACHE_LATENCY_WARN: Duration = Duration::from_millis(250);
const QUEUE_WAITING_WARN: u64 = 200;
const QUEUE_WAITING_UNHEALTHY: u64 = 1_000;
const MEMORY_WARN_PCT: f32 = 85.0;
const MEMORY_UNHEALTHY_PCT: f32 = 95.0;
const CPU_WARN_PCT: f32 = 85.0;
const CPU_UNHEALTHY_PCT: f32 = 95.0;

/// Component condition, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthTier {
    Healthy,
    Warning,
    Unhealthy,
}

impl HealthTier {
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }

    /// Warnings still serve 200; only unhealthy flips to 503.
    pub fn http_status(self) -> StatusCode {
        match self {
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::OK,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub tier: HealthTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub tier: HealthTier,
    pub database: ComponentHealth,
    pub cache: ComponentHealth,
    pub queue: ComponentHealth,
    pub system: ComponentHealth,
    pub sampled_at: DateTime<Utc>,
}

// ────────────────────────────────────────────────────────────────────────────
// Probes
// ────────────────────────────────────────────────────────────────────────────

pub async fn check_database(store: &SubmissionStore) -> ComponentHealth {
    match store.ping().await {
        Ok(latency) => {
            let tier = if latency > DB_LATENCY_WARN {
                HealthTier::Warning
            } else {
                HealthTier::Healthy
            };
            ComponentHealth {
                tier,
                latency_ms: Some(latency.as_millis() as u64),
                detail: "connected".to_string(),
            }
        }
        Err(e) => ComponentHealth {
            tier: HealthTier::Unhealthy,
            latency_ms: None,
            detail: format!("ping failed: {e}"),
        },
    }
}

pub async fn check_cache(store: &SubmissionStore) -> ComponentHealth {
    match store.cache_ping().await {
        Ok(latency) => {
            let tier = if latency > CACHE_LATENCY_WARN {
                HealthTier::Warning
            } else {
                HealthTier::Healthy
            };
            ComponentHealth {
                tier,
                latency_ms: Some(latency.as_millis() as u64),
                detail: "connected".to_string(),
            }
        }
        Err(e) => ComponentHealth {
            tier: HealthTier::Unhealthy,
            latency_ms: None,
            detail: format!("ping failed: {e}"),
        },
    }
}

pub async fn check_queue(queue: &JobQueue) -> ComponentHealth {
    match queue.counts(TAILORING_QUEUE).await {
        Ok(counts) => ComponentHealth {
            tier: tier_for_queue(&counts),
            latency_ms: None,
            detail: format!(
                "waiting={}, active={}, completed={}, failed={}",
                counts.waiting, counts.active, counts.completed, counts.failed
            ),
        },
        Err(e) => ComponentHealth {
            tier: HealthTier::Unhealthy,
            latency_ms: None,
            detail: format!("counts unavailable: {e}"),
        },
    }
}

fn tier_for_queue(counts: &QueueCounts) -> HealthTier {
    if counts.waiting >= QUEUE_WAITING_UNHEALTHY {
        HealthTier::Unhealthy
    } else if counts.waiting >= QUEUE_WAITING_WARN {
        HealthTier::Warning
    } else {
        HealthTier::Healthy
    }
}

pub fn check_system(monitor: &SystemMonitor) -> ComponentHealth {
    let (memory_pct, cpu_pct) = monitor.sample();
    let tier = tier_for_usage(memory_pct, MEMORY_WARN_PCT, MEMORY_UNHEALTHY_PCT)
        .worst(tier_for_usage(cpu_pct, CPU_WARN_PCT, CPU_UNHEALTHY_PCT));
    ComponentHealth {
        tier,
        latency_ms: None,
        detail: format!("memory={memory_pct:.1}%, cpu={cpu_pct:.1}%"),
    }
}

fn tier_for_usage(pct: f32, warn: f32, unhealthy: f32) -> HealthTier {
    if pct >= unhealthy {
        HealthTier::Unhealthy
    } else if pct >= warn {
        HealthTier::Warning
    } else {
        HealthTier::Healthy
    }
}

/// Host memory and CPU readings via sysinfo. Refreshing mutates the probe,
/// hence the mutex.
#[derive(Clone)]
pub struct SystemMonitor {
    sys: Arc<Mutex<System>>,
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self {
            sys: Arc::new(Mutex::new(System::new())),
        }
    }
}

impl SystemMonitor {
    /// Returns (memory %, cpu %) of the host.
    pub fn sample(&self) -> (f32, f32) {
        let mut sys = self.sys.lock().unwrap_or_else(|e| e.into_inner());
        sys.refresh_memory();
        sys.refresh_cpu_usage();
        let total = sys.total_memory();
        let memory_pct = if total == 0 {
            0.0
        } else {
            (sys.used_memory() as f32 / total as f32) * 100.0
        };
        let cpu_pct = sys.global_cpu_info().cpu_usage();
        (memory_pct, cpu_pct)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Composite report and sampler
// ────────────────────────────────────────────────────────────────────────────

/// Probes every component and folds the worst tier into the composite.
pub async fn sample_report(
    store: &SubmissionStore,
    queue: &JobQueue,
    monitor: &SystemMonitor,
) -> HealthReport {
    let database = check_database(store).await;
    let cache = check_cache(store).await;
    let queue_health = check_queue(queue).await;
    let system = check_system(monitor);

    let tier = database
        .tier
        .worst(cache.tier)
        .worst(queue_health.tier)
        .worst(system.tier);

    HealthReport {
        tier,
        database,
        cache,
        queue: queue_health,
        system,
        sampled_at: Utc::now(),
    }
}

/// Background loop probing all components on a fixed interval.
pub async fn run_sampler(
    store: SubmissionStore,
    queue: Arc<JobQueue>,
    monitor: SystemMonitor,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let report = sample_report(&store, &queue, &monitor).await;
        match report.tier {
            HealthTier::Healthy => debug!(
                "Health sample: healthy (db {:?}ms, cache {:?}ms)",
                report.database.latency_ms, report.cache.latency_ms
            ),
            HealthTier::Warning => warn!(
                "Health sample: warning (db: {}, cache: {}, queue: {}, system: {})",
                report.database.detail, report.cache.detail, report.queue.detail, report.system.detail
            ),
            HealthTier::Unhealthy => error!(
                "Health sample: UNHEALTHY (db: {}, cache: {}, queue: {}, system: {})",
                report.database.detail, report.cache.detail, report.queue.detail, report.system.detail
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_tier_wins() {
        assert_eq!(HealthTier::Healthy.worst(HealthTier::Warning), HealthTier::Warning);
        assert_eq!(HealthTier::Warning.worst(HealthTier::Unhealthy), HealthTier::Unhealthy);
        assert_eq!(HealthTier::Unhealthy.worst(HealthTier::Healthy), HealthTier::Unhealthy);
        assert_eq!(HealthTier::Healthy.worst(HealthTier::Healthy), HealthTier::Healthy);
    }

    #[test]
    fn test_only_unhealthy_maps_to_503() {
        assert_eq!(HealthTier::Healthy.http_status(), StatusCode::OK);
        assert_eq!(HealthTier::Warning.http_status(), StatusCode::OK);
        assert_eq!(HealthTier::Unhealthy.http_status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_usage_tier_thresholds() {
        assert_eq!(tier_for_usage(50.0, 85.0, 95.0), HealthTier::Healthy);
        assert_eq!(tier_for_usage(85.0, 85.0, 95.0), HealthTier::Warning);
        assert_eq!(tier_for_usage(94.9, 85.0, 95.0), HealthTier::Warning);
        assert_eq!(tier_for_usage(95.0, 85.0, 95.0), HealthTier::Unhealthy);
    }

    #[test]
    fn test_queue_tier_follows_waiting_depth() {
        let mut counts = QueueCounts::default();
        assert_eq!(tier_for_queue(&counts), HealthTier::Healthy);
        counts.waiting = QUEUE_WAITING_WARN;
        assert_eq!(tier_for_queue(&counts), HealthTier::Warning);
        counts.waiting = QUEUE_WAITING_UNHEALTHY;
        assert_eq!(tier_for_queue(&counts), HealthTier::Unhealthy);
    }

    #[test]
    fn test_system_monitor_samples_sane_percentages() {
        let (memory_pct, cpu_pct) = SystemMonitor::default().sample();
        assert!((0.0..=100.0).contains(&memory_pct), "memory {memory_pct}");
        assert!(cpu_pct >= 0.0, "cpu {cpu_pct}");
    }
}
