//! In-memory admission control for backend invocations.
//!
//! DESIGN
//! ======
//! Sliding-window counters backed by `VecDeque<Instant>` plus a map of
//! in-flight tickets. Three caps are enforced, and tested in this order:
//! - Concurrent in-flight requests
//! - Requests in the trailing 60 seconds
//! - Requests in the trailing 3600 seconds
//!
//! Concurrency is reported first because a caller can act on it within
//! seconds, while window exhaustion implies a longer wait.
//!
//! TRADE-OFFS
//! ==========
//! Window entries are pruned lazily (on `check_limit`, `get_stats` and the
//! background sweep), never on `end_request`. A ticket leaves the concurrent
//! set as soon as it completes but keeps counting against both windows.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ErrorCode, RATE_LIMIT_EXCEEDED};

pub const DEFAULT_MAX_PER_MINUTE: usize = 10;
pub const DEFAULT_MAX_PER_HOUR: usize = 100;
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

pub const MINUTE_WINDOW: Duration = Duration::from_secs(60);
pub const HOUR_WINDOW: Duration = Duration::from_secs(3600);

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub max_per_minute: usize,
    pub max_per_hour: usize,
    pub max_concurrent: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_minute: DEFAULT_MAX_PER_MINUTE,
            max_per_hour: DEFAULT_MAX_PER_HOUR,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

// =============================================================================
// DECISIONS
// =============================================================================

/// Which cap rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    Concurrent { current: usize, max: usize },
    Minute { count: usize, max: usize },
    Hour { count: usize, max: usize },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Concurrent { current, max } => {
                write!(f, "too many concurrent requests ({current}/{max})")
            }
            Self::Minute { count, max } => {
                write!(f, "minute limit reached ({count}/{max} requests in the last 60s)")
            }
            Self::Hour { count, max } => {
                write!(f, "hour limit reached ({count}/{max} requests in the last 3600s)")
            }
        }
    }
}

/// Snapshot of limiter state at decision time. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    pub remaining_minute: usize,
    pub remaining_hour: usize,
    /// Next minute boundary, milliseconds since Unix epoch.
    pub reset_at_minute: u64,
    /// Next hour boundary, milliseconds since Unix epoch.
    pub reset_at_hour: u64,
    pub current_concurrent: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStats {
    pub total_requests: u64,
    pub rejected_requests: u64,
    pub current_concurrent_requests: usize,
    pub requests_last_minute: usize,
    pub requests_last_hour: usize,
    pub last_reset_ms: u64,
    pub config: RateLimitConfig,
}

/// An admitted, in-flight request.
#[derive(Debug, Clone)]
pub struct RequestTicket {
    pub id: String,
    pub started_at: Instant,
}

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
#[error("{reason}")]
pub struct RateLimitError {
    pub reason: RejectReason,
    pub decision: RateLimitDecision,
}

impl ErrorCode for RateLimitError {
    fn error_code(&self) -> &'static str {
        RATE_LIMIT_EXCEEDED
    }

    fn retryable(&self) -> bool {
        true
    }
}

// =============================================================================
// RATE LIMITER
// =============================================================================

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<RateLimiterInner>>,
}

struct RateLimiterInner {
    config: RateLimitConfig,
    /// Admission timestamps within the trailing minute.
    minute_requests: VecDeque<Instant>,
    /// Admission timestamps within the trailing hour.
    hour_requests: VecDeque<Instant>,
    /// Tickets admitted and not yet ended, keyed by id.
    in_flight: HashMap<String, RequestTicket>,
    total_requests: u64,
    rejected_requests: u64,
    last_reset_ms: u64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RateLimiterInner {
                config,
                minute_requests: VecDeque::new(),
                hour_requests: VecDeque::new(),
                in_flight: HashMap::new(),
                total_requests: 0,
                rejected_requests: 0,
                last_reset_ms: now_ms(),
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RateLimiterInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether a request may start now. Does not record anything.
    #[must_use]
    pub fn check_limit(&self, id: Option<&str>) -> RateLimitDecision {
        self.check_limit_at(id, Instant::now())
    }

    fn check_limit_at(&self, id: Option<&str>, now: Instant) -> RateLimitDecision {
        let mut inner = self.lock();
        let decision = inner.decide(now);
        if let Some(reason) = decision.reason {
            debug!(id = id.unwrap_or("-"), %reason, "rate_limit: check rejected");
        }
        decision
    }

    /// Record a new in-flight request without checking any cap.
    ///
    /// Callers are expected to have consulted [`RateLimiter::check_limit`]
    /// first; [`RateLimiter::execute_with_limit`] does both atomically.
    pub fn start_request(&self, id: Option<&str>) -> String {
        self.start_request_at(id, Instant::now())
    }

    fn start_request_at(&self, id: Option<&str>, now: Instant) -> String {
        let id = id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        self.lock().record(&id, now);
        id
    }

    /// Release a concurrency slot. Window counts are untouched.
    pub fn end_request(&self, id: &str) {
        let removed = self.lock().in_flight.remove(id);
        match removed {
            Some(ticket) => {
                debug!(id, elapsed_ms = ticket.started_at.elapsed().as_millis(), "rate_limit: request ended");
            }
            None => warn!(id, "rate_limit: end_request for unknown id"),
        }
    }

    /// Check and record under one lock acquisition.
    fn try_admit(&self, id: Option<&str>, now: Instant) -> Result<String, RateLimitError> {
        let mut inner = self.lock();
        let decision = inner.decide(now);
        if let Some(reason) = decision.reason {
            inner.rejected_requests += 1;
            warn!(id = id.unwrap_or("-"), %reason, "rate_limit: request rejected");
            return Err(RateLimitError { reason, decision });
        }
        let id = id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        inner.record(&id, now);
        Ok(id)
    }

    /// Run `f` inside an admitted slot.
    ///
    /// Fails fast with [`RateLimitError`] (converted into `E`) when any cap is
    /// hit. The slot is released when `f` resolves, errors, panics, or the
    /// returned future is dropped.
    ///
    /// # Errors
    ///
    /// Returns the rejection converted into `E`, or whatever `f` returns.
    pub async fn execute_with_limit<T, E, F, Fut>(&self, id: Option<&str>, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<RateLimitError>,
    {
        let id = self.try_admit(id, Instant::now())?;
        let _slot = SlotGuard { limiter: self, id };
        f().await
    }

    #[must_use]
    pub fn get_stats(&self) -> RateLimitStats {
        self.get_stats_at(Instant::now())
    }

    fn get_stats_at(&self, now: Instant) -> RateLimitStats {
        let mut inner = self.lock();
        inner.prune(now);
        RateLimitStats {
            total_requests: inner.total_requests,
            rejected_requests: inner.rejected_requests,
            current_concurrent_requests: inner.in_flight.len(),
            requests_last_minute: inner.minute_requests.len(),
            requests_last_hour: inner.hour_requests.len(),
            last_reset_ms: inner.last_reset_ms,
            config: inner.config,
        }
    }

    #[must_use]
    pub fn get_config(&self) -> RateLimitConfig {
        self.lock().config
    }

    /// Swap the caps in place. In-flight tickets and window history are kept.
    pub fn update_config(&self, config: RateLimitConfig) {
        let mut inner = self.lock();
        info!(
            max_per_minute = config.max_per_minute,
            max_per_hour = config.max_per_hour,
            max_concurrent = config.max_concurrent,
            "rate_limit: config updated"
        );
        inner.config = config;
    }

    /// Drop all history, tickets and counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.minute_requests.clear();
        inner.hour_requests.clear();
        inner.in_flight.clear();
        inner.total_requests = 0;
        inner.rejected_requests = 0;
        inner.last_reset_ms = now_ms();
        info!("rate_limit: reset");
    }

    /// Prune stale window entries. Returns how many were removed.
    pub fn prune(&self) -> usize {
        self.lock().prune(Instant::now())
    }

    /// Snapshot of the tickets currently holding a concurrency slot.
    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> Vec<RequestTicket> {
        self.lock().in_flight.values().cloned().collect()
    }
}

impl RateLimiterInner {
    fn prune(&mut self, now: Instant) -> usize {
        prune_window(&mut self.minute_requests, now, MINUTE_WINDOW) + prune_window(&mut self.hour_requests, now, HOUR_WINDOW)
    }

    fn decide(&mut self, now: Instant) -> RateLimitDecision {
        self.prune(now);
        let cfg = self.config;
        let current = self.in_flight.len();
        let minute = self.minute_requests.len();
        let hour = self.hour_requests.len();

        let reason = if current >= cfg.max_concurrent {
            Some(RejectReason::Concurrent { current, max: cfg.max_concurrent })
        } else if minute >= cfg.max_per_minute {
            Some(RejectReason::Minute { count: minute, max: cfg.max_per_minute })
        } else if hour >= cfg.max_per_hour {
            Some(RejectReason::Hour { count: hour, max: cfg.max_per_hour })
        } else {
            None
        };

        let wall = now_ms();
        RateLimitDecision {
            allowed: reason.is_none(),
            reason,
            remaining_minute: cfg.max_per_minute.saturating_sub(minute),
            remaining_hour: cfg.max_per_hour.saturating_sub(hour),
            reset_at_minute: next_boundary_ms(wall, window_ms(MINUTE_WINDOW)),
            reset_at_hour: next_boundary_ms(wall, window_ms(HOUR_WINDOW)),
            current_concurrent: current,
        }
    }

    fn record(&mut self, id: &str, now: Instant) {
        self.minute_requests.push_back(now);
        self.hour_requests.push_back(now);
        self.total_requests += 1;
        let previous = self
            .in_flight
            .insert(id.to_string(), RequestTicket { id: id.to_string(), started_at: now });
        if previous.is_some() {
            debug!(id, "rate_limit: ticket id reused while in flight");
        }
    }
}

/// Releases a concurrency slot on drop.
struct SlotGuard<'a> {
    limiter: &'a RateLimiter,
    id: String,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.limiter.end_request(&self.id);
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn prune_window(deque: &mut VecDeque<Instant>, now: Instant, window: Duration) -> usize {
    let mut removed = 0;
    while let Some(&front) = deque.front() {
        if now.duration_since(front) > window {
            deque.pop_front();
            removed += 1;
        } else {
            break;
        }
    }
    removed
}

fn window_ms(window: Duration) -> u64 {
    u64::try_from(window.as_millis()).unwrap_or(u64::MAX)
}

/// First multiple of `window_ms` strictly after `now_ms`.
#[must_use]
pub fn next_boundary_ms(now_ms: u64, window_ms: u64) -> u64 {
    if window_ms == 0 {
        return now_ms;
    }
    (now_ms / window_ms).saturating_add(1).saturating_mul(window_ms)
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    u64::try_from(dur.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
