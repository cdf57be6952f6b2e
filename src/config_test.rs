use std::collections::HashMap;

use super::*;
use crate::services::orchestrator::Priority;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn from_lookup_defaults() {
    let cfg = GatewayConfig::from_lookup(&lookup_from(&[]));
    assert_eq!(cfg, GatewayConfig::default());
    assert_eq!(cfg.rate_limit, RateLimitConfig { max_per_minute: 10, max_per_hour: 100, max_concurrent: 3 });
    assert!(cfg.defaults.use_cache);
    assert_eq!(cfg.defaults.cache_ttl_minutes, 5);
    assert_eq!(cfg.defaults.retry_attempts, 2);
    assert_eq!(cfg.defaults.retry_delay_ms, 1000);
    assert_eq!(cfg.defaults.priority, Priority::Normal);
    assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
}

#[test]
fn from_lookup_overrides() {
    let cfg = GatewayConfig::from_lookup(&lookup_from(&[
        ("MAX_REQUESTS_PER_MINUTE", "30"),
        ("MAX_REQUESTS_PER_HOUR", "500"),
        ("MAX_CONCURRENT_REQUESTS", "8"),
        ("ANALYSIS_USE_CACHE", "false"),
        ("ANALYSIS_CACHE_TTL_MINUTES", "15"),
        ("ANALYSIS_RETRY_ATTEMPTS", "4"),
        ("ANALYSIS_RETRY_DELAY_MS", " 250 "),
        ("ANALYSIS_SWEEP_INTERVAL_SECS", "5"),
        ("ANALYSIS_COMMAND", "analyst"),
    ]));
    assert_eq!(cfg.rate_limit, RateLimitConfig { max_per_minute: 30, max_per_hour: 500, max_concurrent: 8 });
    assert!(!cfg.defaults.use_cache);
    assert_eq!(cfg.defaults.cache_ttl_minutes, 15);
    assert_eq!(cfg.defaults.retry_attempts, 4);
    assert_eq!(cfg.defaults.retry_delay_ms, 250);
    assert_eq!(cfg.sweep_interval, Duration::from_secs(5));
    assert_eq!(cfg.invoker.command, "analyst");
}

#[test]
fn unparseable_values_fall_back() {
    let cfg = GatewayConfig::from_lookup(&lookup_from(&[
        ("MAX_CONCURRENT_REQUESTS", "-1"),
        ("ANALYSIS_USE_CACHE", "yes please"),
        ("ANALYSIS_SWEEP_INTERVAL_SECS", "0"),
    ]));
    assert_eq!(cfg.rate_limit.max_concurrent, DEFAULT_MAX_CONCURRENT);
    assert!(cfg.defaults.use_cache);
    assert_eq!(cfg.sweep_interval, Duration::from_secs(1));
}
