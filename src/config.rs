//! Gateway configuration parsed from environment variables.
//!
//! Every field has a default; unset or unparseable values fall back to it.
//! Parsing goes through a key lookup so tests can feed a map instead of
//! mutating process env.

use std::str::FromStr;
use std::time::Duration;

use crate::backend::config::InvokerConfig;
use crate::rate_limit::{DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_PER_HOUR, DEFAULT_MAX_PER_MINUTE, RateLimitConfig};
use crate::services::orchestrator::AnalysisOptions;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Key → value source. `std::env::var` in production.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub rate_limit: RateLimitConfig,
    /// Options applied when a caller doesn't override them.
    pub defaults: AnalysisOptions,
    pub invoker: InvokerConfig,
    /// Period of the background cache/window sweep.
    pub sweep_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            defaults: AnalysisOptions::default(),
            invoker: InvokerConfig::default(),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

impl GatewayConfig {
    /// Build typed gateway config from the process environment.
    ///
    /// Optional:
    /// - `MAX_REQUESTS_PER_MINUTE`: default 10
    /// - `MAX_REQUESTS_PER_HOUR`: default 100
    /// - `MAX_CONCURRENT_REQUESTS`: default 3
    /// - `ANALYSIS_USE_CACHE`: default true
    /// - `ANALYSIS_CACHE_TTL_MINUTES`: default 5
    /// - `ANALYSIS_RETRY_ATTEMPTS`: default 2
    /// - `ANALYSIS_RETRY_DELAY_MS`: default 1000
    /// - `ANALYSIS_SWEEP_INTERVAL_SECS`: default 60
    /// - `ANALYSIS_*` invoker keys, see [`InvokerConfig::from_lookup`]
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        let rate_limit = RateLimitConfig {
            max_per_minute: parse_or(lookup, "MAX_REQUESTS_PER_MINUTE", DEFAULT_MAX_PER_MINUTE),
            max_per_hour: parse_or(lookup, "MAX_REQUESTS_PER_HOUR", DEFAULT_MAX_PER_HOUR),
            max_concurrent: parse_or(lookup, "MAX_CONCURRENT_REQUESTS", DEFAULT_MAX_CONCURRENT),
        };

        let base = AnalysisOptions::default();
        let defaults = AnalysisOptions {
            use_cache: parse_or(lookup, "ANALYSIS_USE_CACHE", base.use_cache),
            cache_ttl_minutes: parse_or(lookup, "ANALYSIS_CACHE_TTL_MINUTES", base.cache_ttl_minutes),
            retry_attempts: parse_or(lookup, "ANALYSIS_RETRY_ATTEMPTS", base.retry_attempts),
            retry_delay_ms: parse_or(lookup, "ANALYSIS_RETRY_DELAY_MS", base.retry_delay_ms),
            priority: base.priority,
        };

        let sweep_secs = parse_or(lookup, "ANALYSIS_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS).max(1);

        Self {
            rate_limit,
            defaults,
            invoker: InvokerConfig::from_lookup(lookup),
            sweep_interval: Duration::from_secs(sweep_secs),
        }
    }
}

#[must_use]
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

pub(crate) fn parse_or<T>(lookup: Lookup<'_>, key: &str, default: T) -> T
where
    T: FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
