//! Analysis orchestrator: cache, admission, invocation and retry.
//!
//! DESIGN
//! ======
//! Every attempt walks the same path: consult the cache, ask the rate
//! limiter for a slot, invoke the backend inside that slot, and classify
//! the failure if there is one. Rate-limit rejections wait for the window
//! to move (or a fixed pause for concurrency); transient backend failures
//! back off exponentially; everything else is terminal.
//!
//! Callers never see a transport-level error once the service is up. A
//! call that exhausts its attempts resolves to a structured failure
//! response with `success == false`.
//!
//! RETRY ACCOUNTING
//! ================
//! `retry_count` on success is the number of failed attempts before it.
//! On failure it is the number of attempts made. A rate-limit rejection
//! spends an attempt without invoking the backend.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::AnalysisBackend;
use crate::backend::types::{AnalysisRequest, AnalysisResponse, InvokerStatus};
use crate::cache::{CacheStats, ResultCache, cache_key};
use crate::error::{AnalysisError, ErrorCode};
use crate::rate_limit::{RateLimitConfig, RateLimitDecision, RateLimitStats, RateLimiter, RejectReason, now_ms};

pub const DEFAULT_USE_CACHE: bool = true;
pub const DEFAULT_CACHE_TTL_MINUTES: u64 = 5;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 2;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Pause after a concurrency rejection; slots free up as calls finish.
pub const CONCURRENT_WAIT: Duration = Duration::from_secs(2);
/// Floor for window waits so a reset that is due "now" still yields.
pub const MIN_WINDOW_WAIT: Duration = Duration::from_secs(1);

// =============================================================================
// OPTIONS
// =============================================================================

/// Scheduling hint. Carried through logs and responses; it does not reorder work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        })
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(format!("unknown priority `{other}` (expected low, normal or high)")),
        }
    }
}

/// Per-call knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisOptions {
    pub use_cache: bool,
    pub cache_ttl_minutes: u64,
    /// Retries after the first attempt; total attempts is this plus one.
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub priority: Priority,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            use_cache: DEFAULT_USE_CACHE,
            cache_ttl_minutes: DEFAULT_CACHE_TTL_MINUTES,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            priority: Priority::Normal,
        }
    }
}

impl AnalysisOptions {
    /// Short-lived cache, a single retry.
    #[must_use]
    pub fn quick(self) -> Self {
        Self { cache_ttl_minutes: 2, retry_attempts: 1, ..self }
    }

    /// Long-lived cache, three retries, high priority.
    #[must_use]
    pub fn detailed(self) -> Self {
        Self { cache_ttl_minutes: 15, retry_attempts: 3, priority: Priority::High, ..self }
    }
}

// =============================================================================
// RESPONSES
// =============================================================================

/// Backend response plus orchestration metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratedResponse {
    #[serde(flatten)]
    pub response: AnalysisResponse,
    pub from_cache: bool,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_status: Option<RateLimitDecision>,
    /// Code of the last error on a failed call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub initialized: bool,
    pub backend: InvokerStatus,
    pub rate_limit: RateLimitStats,
    pub cache: CacheStats,
    pub defaults: AnalysisOptions,
}

// =============================================================================
// RETRY POLICY
// =============================================================================

/// Whether a failed attempt may be repeated.
#[must_use]
pub fn should_retry(error: &AnalysisError) -> bool {
    error.retryable()
}

/// `base_ms * 2^attempt`, attempt counted from zero. Saturates.
#[must_use]
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(2u64.saturating_pow(attempt)))
}

/// How long to wait before retrying after a rate-limit rejection.
#[must_use]
pub fn rate_limit_wait(reason: &RejectReason, decision: &RateLimitDecision, now_ms: u64) -> Duration {
    let reset_at = match reason {
        RejectReason::Concurrent { .. } => return CONCURRENT_WAIT,
        RejectReason::Minute { .. } => decision.reset_at_minute,
        RejectReason::Hour { .. } => decision.reset_at_hour,
    };
    Duration::from_millis(reset_at.saturating_sub(now_ms)).max(MIN_WINDOW_WAIT)
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

pub struct AnalysisOrchestrator {
    backend: Arc<dyn AnalysisBackend>,
    limiter: RateLimiter,
    cache: ResultCache,
    defaults: AnalysisOptions,
    initialized: AtomicBool,
}

impl AnalysisOrchestrator {
    #[must_use]
    pub fn new(
        backend: Arc<dyn AnalysisBackend>,
        limiter: RateLimiter,
        cache: ResultCache,
        defaults: AnalysisOptions,
    ) -> Self {
        Self { backend, limiter, cache, defaults, initialized: AtomicBool::new(false) }
    }

    /// Probe the backend and open the service for calls.
    ///
    /// # Errors
    ///
    /// Returns the backend's probe failure; the service stays closed.
    pub async fn initialize(&self) -> Result<(), AnalysisError> {
        if let Err(e) = self.backend.initialize().await {
            self.initialized.store(false, Ordering::Release);
            warn!(error = %e, "analysis: backend unavailable");
            return Err(e.into());
        }
        self.initialized.store(true, Ordering::Release);
        info!(defaults = ?self.defaults, "analysis: service ready");
        Ok(())
    }

    #[must_use]
    pub fn defaults(&self) -> AnalysisOptions {
        self.defaults
    }

    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Run one analysis with caching, admission control and retries.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::NotInitialized`] before a successful
    /// [`initialize`](Self::initialize). All later failures are reported in
    /// the response itself.
    pub async fn analyze(
        &self,
        request: &AnalysisRequest,
        options: &AnalysisOptions,
    ) -> Result<OrchestratedResponse, AnalysisError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(AnalysisError::NotInitialized);
        }

        let key = options.use_cache.then(|| {
            cache_key(&request.prompt, request.instrument_code.as_deref(), request.context.as_deref())
        });
        let request_id = Uuid::new_v4();
        let mut rate_limit_status = None;
        let mut last_error: Option<AnalysisError> = None;
        let mut attempts = 0;

        debug!(
            %request_id,
            priority = %options.priority,
            instrument = request.instrument_code.as_deref().unwrap_or("-"),
            "analysis: request received"
        );

        for attempt in 0..=options.retry_attempts {
            if let Some(cached) = key.as_deref().and_then(|k| self.cache.get(k)) {
                info!(%request_id, attempt, "analysis: served from cache");
                return Ok(OrchestratedResponse {
                    response: cached,
                    from_cache: true,
                    retry_count: attempt,
                    cache_key: key,
                    rate_limit_status,
                    error_code: None,
                    priority: options.priority,
                });
            }

            attempts = attempt + 1;
            let ticket = format!("{request_id}-{attempt}");
            let result = self
                .limiter
                .execute_with_limit(Some(&ticket), || async {
                    self.backend.analyze(request).await.map_err(AnalysisError::from)
                })
                .await;

            let err = match result {
                Ok(response) => {
                    if let Some(k) = key.as_deref() {
                        self.cache.set(k, response.clone(), options.cache_ttl_minutes);
                    }
                    info!(
                        %request_id,
                        attempt,
                        elapsed_ms = response.execution_time_ms.unwrap_or_default(),
                        "analysis: completed"
                    );
                    return Ok(OrchestratedResponse {
                        response,
                        from_cache: false,
                        retry_count: attempt,
                        cache_key: key,
                        rate_limit_status: Some(self.limiter.check_limit(None)),
                        error_code: None,
                        priority: options.priority,
                    });
                }
                Err(err) => err,
            };

            let wait = match &err {
                AnalysisError::RateLimited(limited) => {
                    rate_limit_status = Some(limited.decision);
                    Some(rate_limit_wait(&limited.reason, &limited.decision, now_ms()))
                }
                other if should_retry(other) => Some(backoff_delay(options.retry_delay_ms, attempt)),
                _ => None,
            };

            match wait {
                Some(delay) if attempt < options.retry_attempts => {
                    warn!(
                        %request_id,
                        attempt,
                        code = err.error_code(),
                        error = %err,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "analysis: attempt failed; retrying"
                    );
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
                _ => {
                    last_error = Some(err);
                    break;
                }
            }
        }

        let (message, code) = last_error.map_or_else(
            || ("analysis failed".to_string(), None),
            |e| (e.to_string(), Some(e.error_code())),
        );
        warn!(%request_id, attempts, code = code.unwrap_or("-"), error = %message, "analysis: giving up");

        Ok(OrchestratedResponse {
            response: AnalysisResponse::failure(message),
            from_cache: false,
            retry_count: attempts,
            cache_key: key,
            rate_limit_status,
            error_code: code,
            priority: options.priority,
        })
    }

    /// [`analyze`](Self::analyze) with the quick preset over the defaults.
    ///
    /// # Errors
    ///
    /// Same as [`analyze`](Self::analyze).
    pub async fn quick_analysis(&self, request: &AnalysisRequest) -> Result<OrchestratedResponse, AnalysisError> {
        self.analyze(request, &self.defaults.quick()).await
    }

    /// [`analyze`](Self::analyze) with the detailed preset over the defaults.
    ///
    /// # Errors
    ///
    /// Same as [`analyze`](Self::analyze).
    pub async fn detailed_analysis(&self, request: &AnalysisRequest) -> Result<OrchestratedResponse, AnalysisError> {
        self.analyze(request, &self.defaults.detailed()).await
    }

    pub fn update_rate_limits(&self, config: RateLimitConfig) {
        self.limiter.update_config(config);
    }

    /// Clear the cache and all limiter state.
    pub fn reset(&self) {
        self.cache.clear();
        self.limiter.reset();
        info!("analysis: state reset");
    }

    /// Cancel pending backend calls and close the service.
    pub fn shutdown(&self) {
        self.initialized.store(false, Ordering::Release);
        self.backend.shutdown();
        self.reset();
        info!("analysis: shut down");
    }

    #[must_use]
    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            initialized: self.initialized.load(Ordering::Acquire),
            backend: self.backend.status(),
            rate_limit: self.limiter.get_stats(),
            cache: self.cache.get_stats(),
            defaults: self.defaults,
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
