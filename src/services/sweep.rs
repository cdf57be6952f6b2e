//! Sweep service: periodic eviction of expired cache entries and stale
//! rate-limit history.
//!
//! DESIGN
//! ======
//! Reads already treat expired data as absent, so the sweep only bounds
//! memory. A missed tick is skipped rather than replayed in a burst.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::cache::ResultCache;
use crate::rate_limit::RateLimiter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub expired_entries: usize,
    pub pruned_timestamps: usize,
}

/// Spawn the background sweep task. Returns a handle for shutdown.
pub fn spawn_sweep_task(cache: ResultCache, limiter: RateLimiter, interval: Duration) -> JoinHandle<()> {
    let interval_secs = interval.as_secs();
    info!(interval_secs, "sweep: configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(&cache, &limiter);
        }
    })
}

/// One sweep pass over both stores.
pub fn sweep_once(cache: &ResultCache, limiter: &RateLimiter) -> SweepReport {
    let report = SweepReport { expired_entries: cache.cleanup(), pruned_timestamps: limiter.prune() };
    if report != SweepReport::default() {
        debug!(
            expired_entries = report.expired_entries,
            pruned_timestamps = report.pruned_timestamps,
            "sweep: evicted stale data"
        );
    }
    report
}

#[cfg(test)]
#[path = "sweep_test.rs"]
mod tests;
