//! Circuit breaker tests: open after three consecutive failures, immediate
//! rejection while open, probe after the reset period, success clears.

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use triage_core::agent::Step;
use triage_core::breaker::BreakerRegistry;
use triage_core::clock::{Clock, ManualClock};
use triage_core::error::TriageError;

fn registry() -> (Arc<ManualClock>, BreakerRegistry) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
    ));
    let shared: Arc<dyn Clock> = clock.clone();
    (clock, BreakerRegistry::new(shared, 3, 30_000))
}

/// Test 1: two failures keep the circuit closed; the third opens it.
#[test]
fn opens_after_three_consecutive_failures() {
    let (_clock, breakers) = registry();

    breakers.record_failure(Step::RiskSignals);
    breakers.record_failure(Step::RiskSignals);
    assert!(breakers.check(Step::RiskSignals).is_ok());
    assert!(!breakers.is_open(Step::RiskSignals));

    breakers.record_failure(Step::RiskSignals);
    assert!(breakers.is_open(Step::RiskSignals));
    match breakers.check(Step::RiskSignals) {
        Err(TriageError::CircuitOpen { step }) => assert_eq!(step, "risk_signals"),
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
}

/// Test 2: a success resets the consecutive-failure count.
#[test]
fn success_resets_counter() {
    let (_clock, breakers) = registry();

    breakers.record_failure(Step::KbLookup);
    breakers.record_failure(Step::KbLookup);
    breakers.record_success(Step::KbLookup);
    breakers.record_failure(Step::KbLookup);
    breakers.record_failure(Step::KbLookup);

    assert!(breakers.check(Step::KbLookup).is_ok());
    assert!(!breakers.is_open(Step::KbLookup));
}

/// Test 3: the circuit admits a probe 30s after the last failure, and the
/// probe's success closes it for good.
#[test]
fn reset_after_quiet_period() {
    let (clock, breakers) = registry();

    for _ in 0..3 {
        breakers.record_failure(Step::Decide);
    }
    assert!(breakers.check(Step::Decide).is_err());

    clock.advance_ms(29_999);
    assert!(breakers.check(Step::Decide).is_err());

    clock.advance_ms(1);
    assert!(breakers.check(Step::Decide).is_ok(), "probe admitted");

    breakers.record_success(Step::Decide);
    assert!(!breakers.is_open(Step::Decide));
    assert!(breakers.check(Step::Decide).is_ok());
}

/// Test 4: breaker state is per step.
#[test]
fn per_step_isolation() {
    let (_clock, breakers) = registry();

    for _ in 0..3 {
        breakers.record_failure(Step::RiskSignals);
    }
    assert!(breakers.check(Step::RiskSignals).is_err());
    assert!(breakers.check(Step::GetProfile).is_ok());
    assert!(breakers.check(Step::KbLookup).is_ok());
}
