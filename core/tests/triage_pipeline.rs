//! End-to-end pipeline tests: the happy path, the high-risk path, fallback
//! on a slow step, the critical-step short circuit, and the run-level
//! invariants (trace contiguity, redacted traces, conflict admission).

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use triage_core::agent::{Step, StepContext, StepDetail, TriageAgent};
use triage_core::breaker::BreakerRegistry;
use triage_core::cache::MemoryKv;
use triage_core::clock::{SharedClock, SystemClock};
use triage_core::config::EngineConfig;
use triage_core::error::{TriageError, TriageResult};
use triage_core::orchestrator::{Orchestrator, TriageRequest};
use triage_core::redactor::redact_str;
use triage_core::store::{
    AlertRecord, CardRecord, CustomerRecord, TransactionRecord, TriageStore,
};
use triage_core::stream::EventStream;
use triage_core::types::{
    AlertStatus, CardStatus, KycLevel, RecommendedAction, RiskLevel, Role,
};

const CUSTOMER: &str = "cust-pipe-001";
const CARD: &str = "card-pipe-001";
const ALERT: &str = "alert-pipe-001";
const SUSPECT: &str = "txn-suspect";

fn engine(store: &TriageStore) -> Orchestrator {
    let config = EngineConfig::default_test();
    let clock: SharedClock = Arc::new(SystemClock);
    let kv = Arc::new(MemoryKv::new(Arc::clone(&clock)));
    let stream = Arc::new(EventStream::new(
        Arc::clone(&clock),
        config.stream_buffer,
        config.heartbeat_interval_ms,
        config.completed_grace_ms,
    ));
    let breakers = Arc::new(BreakerRegistry::new(
        Arc::clone(&clock),
        config.circuit_fail_threshold,
        config.circuit_reset_ms,
    ));
    Orchestrator::new(store.clone(), kv, stream, breakers, clock, config)
}

fn request(role: Role) -> TriageRequest {
    TriageRequest {
        alert_id: ALERT.to_string(),
        customer_id: CUSTOMER.to_string(),
        suspect_txn_id: SUSPECT.to_string(),
        role,
        client_id: "tester".to_string(),
    }
}

fn base_book(store: &TriageStore) -> TriageResult<()> {
    let created = Utc::now() - Duration::days(400);
    store.insert_customer(&CustomerRecord {
        id: CUSTOMER.to_string(),
        name: "Pipeline Tester".to_string(),
        email_masked: "pi***@example.com".to_string(),
        kyc_level: KycLevel::Verified,
        created_at: created,
    })?;
    store.insert_card(&CardRecord {
        id: CARD.to_string(),
        customer_id: CUSTOMER.to_string(),
        last4: "0001".to_string(),
        network: "visa".to_string(),
        status: CardStatus::Active,
        created_at: created,
    })?;
    Ok(())
}

fn insert_txn(
    store: &TriageStore,
    id: &str,
    ts: DateTime<Utc>,
    amount_minor: i64,
    merchant: &str,
    mcc: &str,
    device: Option<&str>,
    place: Option<(&str, &str)>,
) -> TriageResult<()> {
    store.insert_transaction(&TransactionRecord {
        id: id.to_string(),
        customer_id: CUSTOMER.to_string(),
        card_id: CARD.to_string(),
        mcc: mcc.to_string(),
        merchant: merchant.to_string(),
        amount_minor,
        currency: "USD".to_string(),
        ts,
        device_id: device.map(str::to_string),
        country: place.map(|p| p.0.to_string()),
        city: place.map(|p| p.1.to_string()),
    })?;
    Ok(())
}

fn insert_alert(store: &TriageStore, risk: RiskLevel, at: DateTime<Utc>) -> TriageResult<()> {
    store.insert_alert(&AlertRecord {
        id: ALERT.to_string(),
        customer_id: CUSTOMER.to_string(),
        suspect_txn_id: SUSPECT.to_string(),
        risk,
        status: AlertStatus::Open,
        created_at: at,
    })
}

/// Quiet history plus a small odd-hour purchase at the usual merchant.
fn seed_low_risk(store: &TriageStore) -> TriageResult<()> {
    base_book(store)?;
    let suspect_ts = (Utc::now() - Duration::days(1))
        .date_naive()
        .and_hms_opt(2, 0, 0)
        .map(|t| t.and_utc())
        .expect("valid time");

    for day in 1..=90i64 {
        for (slot, hour) in [9u32, 13, 18].iter().enumerate() {
            let ts = (suspect_ts - Duration::days(day))
                .date_naive()
                .and_hms_opt(*hour, 15, 0)
                .map(|t| t.and_utc())
                .expect("valid time");
            insert_txn(
                store,
                &format!("txn-{day:03}-{slot}"),
                ts,
                6_000 + (day % 5) * 150,
                "Hilltop Grocers",
                "5411",
                Some("device-home"),
                Some(("US", "Portland")),
            )?;
        }
    }
    insert_txn(
        store,
        SUSPECT,
        suspect_ts,
        12_000,
        "Hilltop Grocers",
        "5411",
        Some("device-home"),
        Some(("US", "Portland")),
    )?;
    insert_alert(store, RiskLevel::Low, suspect_ts + Duration::hours(1))
}

/// Velocity burst with new device, new merchant and unseen location.
fn seed_high_risk(store: &TriageStore) -> TriageResult<()> {
    base_book(store)?;
    let suspect_ts = Utc::now() - Duration::hours(2);

    for day in 2..=90i64 {
        for slot in 0..2i64 {
            insert_txn(
                store,
                &format!("txn-h-{day:03}-{slot}"),
                suspect_ts - Duration::days(day) - Duration::hours(slot * 3),
                5_000,
                "Hilltop Grocers",
                "5411",
                Some("device-home"),
                Some(("US", "Portland")),
            )?;
        }
    }
    for i in 0..19i64 {
        insert_txn(
            store,
            &format!("txn-burst-{i:02}"),
            suspect_ts - Duration::minutes(30 + i * 60),
            5_000,
            "Hilltop Grocers",
            "5411",
            Some("device-home"),
            Some(("US", "Portland")),
        )?;
    }
    insert_txn(
        store,
        SUSPECT,
        suspect_ts,
        180_000,
        "Nightowl Imports",
        "5969",
        Some("device-new"),
        Some(("RO", "Bucharest")),
    )?;
    insert_alert(store, RiskLevel::High, suspect_ts + Duration::minutes(10))
}

struct SlowAgent {
    step: Step,
    sleep_ms: u64,
}

impl TriageAgent for SlowAgent {
    fn step(&self) -> Step {
        self.step
    }
    fn run(&self, _ctx: &StepContext) -> TriageResult<StepDetail> {
        std::thread::sleep(std::time::Duration::from_millis(self.sleep_ms));
        Ok(StepDetail::Fallback {
            reason: "too late to matter".to_string(),
        })
    }
}

struct FailingAgent {
    step: Step,
}

impl TriageAgent for FailingAgent {
    fn step(&self) -> Step {
        self.step
    }
    fn run(&self, _ctx: &StepContext) -> TriageResult<StepDetail> {
        Err(TriageError::StepFailure {
            step: self.step.name(),
            message: "store read failed".to_string(),
        })
    }
}

/// Test 1 (S1): happy path. Low risk, false positive, no fallback, six
/// clean traces with contiguous seq.
#[tokio::test]
async fn happy_path_low_risk() -> TriageResult<()> {
    let store = TriageStore::in_memory()?;
    store.migrate()?;
    seed_low_risk(&store)?;

    let orch = engine(&store);
    let outcome = orch.execute(&request(Role::Agent)).await?;

    assert_eq!(outcome.risk, RiskLevel::Low);
    assert_eq!(outcome.proposed_action, RecommendedAction::MarkFalsePositive);
    assert!(!outcome.fallback_used);

    let traces = store.traces_for_run(&outcome.run_id)?;
    assert_eq!(traces.len(), 6);
    for (i, trace) in traces.iter().enumerate() {
        assert_eq!(trace.seq, i as i64, "seq gap at {i}");
        assert!(trace.ok, "step {} failed", trace.step);
    }
    assert_eq!(traces[0].step, "get_profile");
    assert_eq!(traces[5].step, "propose_action");

    let run = store.get_run(&outcome.run_id)?.expect("run persisted");
    assert!(run.ended_at.is_some());
    assert_eq!(run.risk, Some(RiskLevel::Low));
    assert!(!run.fallback_used);
    Ok(())
}

/// Test 2 (S2): velocity burst as lead. High risk, freeze proposed, OTP
/// required; the amount gate is the first failing policy check.
#[tokio::test]
async fn velocity_burst_high_risk_lead() -> TriageResult<()> {
    let store = TriageStore::in_memory()?;
    store.migrate()?;
    seed_high_risk(&store)?;

    let orch = engine(&store);
    let outcome = orch.execute(&request(Role::Lead)).await?;

    assert_eq!(outcome.risk, RiskLevel::High);
    assert_eq!(outcome.proposed_action, RecommendedAction::FreezeCard);
    assert!(outcome.requires_otp);
    assert!(!outcome.fallback_used);
    assert_eq!(outcome.confidence, 95.0);
    // $1,800 sits above the freeze amount limit, so compliance reports it
    // as the blocking check even though the role gate passed for the lead.
    assert_eq!(outcome.blocked_by.as_deref(), Some("amount_limits"));
    Ok(())
}

/// Test 3 (S3): a non-critical step that exceeds its deadline is replaced
/// by its fallback and the run still completes with a decision.
#[tokio::test]
async fn slow_risk_signals_falls_back() -> TriageResult<()> {
    let store = TriageStore::in_memory()?;
    store.migrate()?;
    seed_low_risk(&store)?;

    let mut orch = engine(&store);
    orch.set_agent(
        Step::RiskSignals,
        Arc::new(SlowAgent {
            step: Step::RiskSignals,
            sleep_ms: 600,
        }),
    );

    let outcome = orch.execute(&request(Role::Agent)).await?;

    // The substituted score of 50 lands in the medium band.
    assert_eq!(outcome.risk, RiskLevel::Medium);
    assert!(outcome.fallback_used);
    assert_eq!(outcome.reasons, vec!["risk_analysis_unavailable".to_string()]);
    assert_eq!(outcome.confidence, 35.0);

    let traces = store.traces_for_run(&outcome.run_id)?;
    assert_eq!(traces.len(), 6, "pipeline continued after the fallback");
    let signals = &traces[2];
    assert_eq!(signals.step, "risk_signals");
    assert!(!signals.ok);

    let run = store.get_run(&outcome.run_id)?.expect("run persisted");
    assert!(run.fallback_used);
    Ok(())
}

/// Test 4 (S4): a failing critical step short-circuits the run; the
/// decision composes from defaults.
#[tokio::test]
async fn critical_failure_short_circuits() -> TriageResult<()> {
    let store = TriageStore::in_memory()?;
    store.migrate()?;
    seed_low_risk(&store)?;

    let mut orch = engine(&store);
    orch.set_agent(
        Step::GetProfile,
        Arc::new(FailingAgent {
            step: Step::GetProfile,
        }),
    );

    let outcome = orch.execute(&request(Role::Agent)).await?;

    assert_eq!(outcome.risk, RiskLevel::Low);
    assert_eq!(outcome.proposed_action, RecommendedAction::MarkFalsePositive);
    assert!(outcome.fallback_used);

    let traces = store.traces_for_run(&outcome.run_id)?;
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].seq, 0);
    assert_eq!(traces[0].step, "get_profile");
    assert!(!traces[0].ok);
    Ok(())
}

/// Test 5: every persisted trace detail is a fixed point of the redactor.
#[tokio::test]
async fn traces_are_redacted() -> TriageResult<()> {
    let store = TriageStore::in_memory()?;
    store.migrate()?;
    seed_high_risk(&store)?;

    let orch = engine(&store);
    let outcome = orch.execute(&request(Role::Lead)).await?;

    for trace in store.traces_for_run(&outcome.run_id)? {
        let clean = redact_str(&trace.detail);
        assert_eq!(
            &*clean, trace.detail,
            "trace {} for step {} not a redaction fixed point",
            trace.seq, trace.step
        );
    }
    Ok(())
}

/// Test 6: a second triage for the same alert conflicts with the in-flight
/// run and reports its id.
#[tokio::test]
async fn one_active_run_per_alert() -> TriageResult<()> {
    let store = TriageStore::in_memory()?;
    store.migrate()?;
    seed_low_risk(&store)?;

    let orch = engine(&store);
    let first = orch.begin(&request(Role::Agent))?;
    let first_id = first.run_id.clone();

    match orch.begin(&request(Role::Agent)) {
        Err(TriageError::Conflict { existing_id, .. }) => {
            assert_eq!(existing_id.as_deref(), Some(first_id.as_str()));
        }
        other => panic!("expected Conflict, got {other:?}"),
    }

    // Once the first run completes the alert is triageable again, except
    // the alert now has a terminal-ish status; admission only checks for
    // an in-flight run.
    orch.drive(first).await?;
    assert!(orch.begin(&request(Role::Agent)).is_ok());
    Ok(())
}

/// Test 7: unknown alert and mismatched customer are rejected up front.
#[tokio::test]
async fn admission_validation() -> TriageResult<()> {
    let store = TriageStore::in_memory()?;
    store.migrate()?;
    seed_low_risk(&store)?;

    let orch = engine(&store);

    let mut req = request(Role::Agent);
    req.alert_id = "alert-missing".to_string();
    assert!(matches!(
        orch.begin(&req),
        Err(TriageError::NotFound { entity: "alert", .. })
    ));

    let mut req = request(Role::Agent);
    req.customer_id = "cust-wrong".to_string();
    assert!(matches!(
        orch.begin(&req),
        Err(TriageError::Validation { .. })
    ));

    let mut req = request(Role::Agent);
    req.suspect_txn_id = String::new();
    assert!(matches!(
        orch.begin(&req),
        Err(TriageError::Validation { .. })
    ));
    Ok(())
}
