//! Periodic job scheduler.
//!
//! The schedule itself is pure data: entries on fixed grids anchored at a
//! start time, and `next_fire_time` computes the earliest upcoming fire for
//! any given `now`. The run loop is a thin shell that sleeps until that
//! instant and enqueues a maintenance job, so all the timing arithmetic is
//! testable without a clock.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::queue::{JobOptions, JobQueue, MAINTENANCE_QUEUE};

/// A named task firing on a fixed grid: anchor, anchor + every, anchor + 2*every, ...
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub name: String,
    pub every: Duration,
    pub anchor: DateTime<Utc>,
}

impl ScheduleEntry {
    /// First grid point strictly after `now`. Fires stay on the grid even
    /// when ticks are missed: a stalled loop catches the next point, it does
    /// not replay the past.
    fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if now < self.anchor {
            return self.anchor;
        }
        let period_ms = self.every.num_milliseconds().max(1);
        let elapsed_ms = (now - self.anchor).num_milliseconds();
        let periods = elapsed_ms / period_ms + 1;
        self.anchor + Duration::milliseconds(periods * period_ms)
    }
}

/// The next task due across the whole schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledFire {
    pub name: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    entries: Vec<ScheduleEntry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn every(mut self, name: &str, every: Duration, anchor: DateTime<Utc>) -> Self {
        self.entries.push(ScheduleEntry {
            name: name.to_string(),
            every,
            anchor,
        });
        self
    }

    /// Earliest upcoming fire strictly after `now`, or `None` for an empty
    /// schedule.
    pub fn next_fire_time(&self, now: DateTime<Utc>) -> Option<ScheduledFire> {
        self.entries
            .iter()
            .map(|entry| ScheduledFire {
                name: entry.name.clone(),
                at: entry.next_after(now),
            })
            .min_by_key(|fire| fire.at)
    }
}

/// Sleeps until each fire and enqueues it on the maintenance queue.
pub async fn run_scheduler(scheduler: Scheduler, queue: Arc<JobQueue>) {
    if scheduler.next_fire_time(Utc::now()).is_none() {
        info!("Scheduler has no entries, not starting");
        return;
    }
    info!("Scheduler running");
    loop {
        let Some(fire) = scheduler.next_fire_time(Utc::now()) else {
            return;
        };
        let wait = (fire.at - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);
        tokio::time::sleep(wait).await;
        let payload = serde_json::json!({ "task": fire.name });
        if let Err(e) = queue
            .enqueue(MAINTENANCE_QUEUE, payload, JobOptions::default())
            .await
        {
            warn!("Could not enqueue scheduled task '{}': {e}", fire.name);
        }
    }
}
