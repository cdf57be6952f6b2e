//! Error taxonomy shared by the admission, cache and invocation layers.
//!
//! DESIGN
//! ======
//! Each layer owns its own `thiserror` enum and converts upward with `From`.
//! Every error carries a grepable code through [`ErrorCode`], and the
//! orchestrator's retry classifier keys off that code before it falls back
//! to message inspection.

use crate::backend::types::BackendError;
use crate::rate_limit::RateLimitError;

// =============================================================================
// CODES
// =============================================================================

pub const NOT_INITIALIZED: &str = "NOT_INITIALIZED";
pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
pub const TIMEOUT: &str = "TIMEOUT";
pub const PROCESS_FAILED: &str = "PROCESS_FAILED";
pub const SPAWN_FAILED: &str = "SPAWN_FAILED";
pub const IO_ERROR: &str = "IO_ERROR";
pub const CANCELLED: &str = "CANCELLED";

/// Codes that terminate a call on the first failure, whatever the message says.
pub const NON_RETRYABLE_CODES: [&str; 3] = [NOT_INITIALIZED, PARSE_ERROR, INVALID_REQUEST];

/// Lowercased message fragments that mark an error as transient.
pub const TRANSIENT_MARKERS: [&str; 5] = ["timeout", "network", "connection", "econnreset", "etimedout"];

/// Transient means: not a terminal code, and the message names a transient cause.
#[must_use]
pub fn is_transient(code: &str, message: &str) -> bool {
    if NON_RETRYABLE_CODES.contains(&code) {
        return false;
    }
    let message = message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker))
}

/// Error types that expose a stable code and a retry hint.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// ANALYSIS ERROR
// =============================================================================

/// Crate-level error surfaced by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis service not initialized")]
    NotInitialized,
    #[error("rate limit exceeded: {0}")]
    RateLimited(#[from] RateLimitError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ErrorCode for AnalysisError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotInitialized => NOT_INITIALIZED,
            Self::RateLimited(_) => RATE_LIMIT_EXCEEDED,
            Self::Backend(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::NotInitialized => false,
            Self::RateLimited(_) => true,
            Self::Backend(e) => e.retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_codes_win_over_message() {
        assert!(!is_transient(INVALID_REQUEST, "network unreachable"));
        assert!(!is_transient(PARSE_ERROR, "timeout while parsing"));
        assert!(!is_transient(NOT_INITIALIZED, "connection refused"));
    }

    #[test]
    fn markers_are_case_insensitive() {
        assert!(is_transient(PROCESS_FAILED, "read ECONNRESET"));
        assert!(is_transient(IO_ERROR, "Connection reset by peer"));
        assert!(is_transient(TIMEOUT, "analysis timeout after 60s"));
        assert!(!is_transient(PROCESS_FAILED, "unknown flag --foo"));
    }

    #[test]
    fn analysis_error_delegates_to_backend() {
        let err = AnalysisError::from(BackendError::Timeout { after: std::time::Duration::from_secs(3) });
        assert_eq!(err.error_code(), TIMEOUT);
        assert!(err.retryable());
        assert!(!AnalysisError::NotInitialized.retryable());
    }
}
