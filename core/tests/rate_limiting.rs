//! Rate limiter tests: window admission, the N/N+1 boundary, rollover at
//! the reset time, and fail-open on store errors.

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use triage_core::cache::{KvError, KvResult, KvStore, MemoryKv, RateLimiter, WindowCount};
use triage_core::clock::{Clock, ManualClock};
use triage_core::error::TriageError;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap(),
    ))
}

fn limiter(clock: &Arc<ManualClock>, window_ms: u64, max: u64) -> RateLimiter {
    let shared: Arc<dyn Clock> = clock.clone();
    let kv = Arc::new(MemoryKv::new(Arc::clone(&shared)));
    RateLimiter::new(kv, shared, window_ms, max)
}

/// Test 1: with (W=60s, N=5) the 6th request in the window is rejected and
/// retry-after never exceeds the window.
#[test]
fn sixth_request_rejected() {
    let clock = clock();
    let limiter = limiter(&clock, 60_000, 5);

    for i in 0..5 {
        let decision = limiter.check("client-a").expect("within budget");
        assert_eq!(decision.remaining, 4 - i);
    }

    match limiter.check("client-a") {
        Err(TriageError::RateLimited { retry_after_secs }) => {
            assert!(retry_after_secs <= 60, "retry_after {retry_after_secs} > window");
            assert!(retry_after_secs > 0);
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

/// Test 2: the counter rolls over exactly at the reset time.
#[test]
fn window_rollover() {
    let clock = clock();
    let limiter = limiter(&clock, 60_000, 2);

    limiter.check("client-b").unwrap();
    limiter.check("client-b").unwrap();
    assert!(limiter.check("client-b").is_err());

    // One millisecond short of the reset: still limited.
    clock.advance_ms(59_999);
    assert!(limiter.check("client-b").is_err());

    // At the reset time the window restarts.
    clock.advance_ms(1);
    let decision = limiter.check("client-b").expect("fresh window");
    assert_eq!(decision.remaining, 1);
}

/// Test 3: clients do not share windows.
#[test]
fn per_client_isolation() {
    let clock = clock();
    let limiter = limiter(&clock, 60_000, 1);

    limiter.check("client-c").unwrap();
    assert!(limiter.check("client-c").is_err());
    limiter.check("client-d").expect("separate window");
}

/// Test 4: a broken backing store fails open.
#[test]
fn fails_open_on_store_error() {
    struct BrokenKv;
    impl KvStore for BrokenKv {
        fn get(&self, _key: &str) -> KvResult<Option<String>> {
            Err(KvError::Unavailable("down".to_string()))
        }
        fn set_with_ttl(&self, _key: &str, _value: &str, _ttl_ms: u64) -> KvResult<()> {
            Err(KvError::Unavailable("down".to_string()))
        }
        fn delete(&self, _key: &str) -> KvResult<()> {
            Err(KvError::Unavailable("down".to_string()))
        }
        fn incr_window(&self, _key: &str, _window_ms: u64) -> KvResult<WindowCount> {
            Err(KvError::Unavailable("down".to_string()))
        }
    }

    let clock = clock();
    let shared: Arc<dyn Clock> = clock;
    let limiter = RateLimiter::new(Arc::new(BrokenKv), shared, 60_000, 1);

    // Every request is admitted while the store is down.
    limiter.check("client-e").unwrap();
    limiter.check("client-e").unwrap();
    limiter.check("client-e").unwrap();
}
