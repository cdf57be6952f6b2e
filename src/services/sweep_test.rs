use super::*;
use crate::rate_limit::RateLimitConfig;
use crate::state::test_helpers::ok_response;

#[test]
fn sweep_once_evicts_expired_entries() {
    let cache = ResultCache::new();
    let limiter = RateLimiter::new(RateLimitConfig::default());
    cache.set_with_ttl("stale", ok_response("old"), Duration::ZERO);
    cache.set("fresh", ok_response("new"), 5);

    let report = sweep_once(&cache, &limiter);
    assert_eq!(report.expired_entries, 1);
    assert_eq!(report.pruned_timestamps, 0);
    assert_eq!(cache.get_stats().entries, 1);
}

#[test]
fn sweep_once_on_empty_stores_is_a_noop() {
    let report = sweep_once(&ResultCache::new(), &RateLimiter::new(RateLimitConfig::default()));
    assert_eq!(report, SweepReport::default());
}

#[tokio::test(start_paused = true)]
async fn background_task_sweeps_on_interval() {
    let cache = ResultCache::new();
    let limiter = RateLimiter::new(RateLimitConfig::default());
    let handle = spawn_sweep_task(cache.clone(), limiter, Duration::from_secs(1));

    cache.set_with_ttl("stale", ok_response("old"), Duration::ZERO);
    assert_eq!(cache.get_stats().entries, 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(cache.get_stats().entries, 0);

    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
}
