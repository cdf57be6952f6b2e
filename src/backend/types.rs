//! Backend types: requests, responses, errors and the invocation trait.

use serde::{Deserialize, Serialize};

use crate::error::{self, ErrorCode};

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced while invoking the external analysis tool.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// `analyze` was called before a successful `initialize`.
    #[error("analysis backend not initialized")]
    NotInitialized,

    /// The availability probe failed; the tool is missing or broken.
    #[error("analysis backend unavailable: {0}")]
    ProbeFailed(String),

    /// The caller supplied a request the backend can't run.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The executable could not be started.
    #[error("failed to spawn `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    /// Reading from or writing to the child failed.
    #[error("process io failed: {0}")]
    Io(String),

    /// The child ran past the configured deadline and was killed.
    #[error("analysis timeout after {after:?}")]
    Timeout { after: std::time::Duration },

    /// The child exited non-zero without producing stdout.
    #[error("backend exited with status {status}: {stderr}")]
    ProcessFailed { status: i32, stderr: String },

    /// The tool reported its own failure in its result envelope.
    #[error("backend reported an error: {0}")]
    Reported(String),

    /// Output was present but unusable, even as fallback text.
    #[error("unusable backend output: {0}")]
    Parse(String),

    /// The invoker was shut down while this call was pending.
    #[error("analysis cancelled: backend shutting down")]
    Cancelled,
}

impl ErrorCode for BackendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotInitialized | Self::ProbeFailed(_) => error::NOT_INITIALIZED,
            Self::InvalidRequest(_) => error::INVALID_REQUEST,
            Self::Spawn { .. } => error::SPAWN_FAILED,
            Self::Io(_) => error::IO_ERROR,
            Self::Timeout { .. } => error::TIMEOUT,
            Self::ProcessFailed { .. } | Self::Reported(_) => error::PROCESS_FAILED,
            Self::Parse(_) => error::PARSE_ERROR,
            Self::Cancelled => error::CANCELLED,
        }
    }

    fn retryable(&self) -> bool {
        error::is_transient(self.error_code(), &self.to_string())
    }
}

// =============================================================================
// REQUEST / RESPONSE
// =============================================================================

/// Caller-supplied analysis request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_code: Option<String>,
    /// Free-form market snapshot. Never part of the cache key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl AnalysisRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), ..Self::default() }
    }

    #[must_use]
    pub fn with_instrument(mut self, code: impl Into<String>) -> Self {
        self.instrument_code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    #[must_use]
    pub fn with_market_data(mut self, data: serde_json::Value) -> Self {
        self.market_data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Buy,
    Sell,
    #[default]
    Hold,
}

impl Recommendation {
    /// Case-insensitive parse. Anything unrecognized is `Hold`.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => Self::Buy,
            "SELL" => Self::Sell,
            _ => Self::Hold,
        }
    }
}

/// Result of one analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    /// 0 to 100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<Recommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

impl AnalysisResponse {
    /// Structured failure carrying a human-readable message.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), ..Self::default() }
    }
}

/// Snapshot reported by [`AnalysisBackend::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokerStatus {
    pub initialized: bool,
    pub pending_requests: usize,
}

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// Async seam between the orchestrator and the expensive backend.
/// Enables mocking in tests.
#[async_trait::async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Probe the backend. Must succeed before `analyze` is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ProbeFailed`] when the tool is missing or broken.
    async fn initialize(&self) -> Result<(), BackendError>;

    /// Run one analysis.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] on timeout, spawn or process failure, or
    /// unusable output.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, BackendError>;

    fn status(&self) -> InvokerStatus;

    /// Cancel pending work and mark the backend uninitialized.
    fn shutdown(&self);
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
