//! Risk-signal scoring tests against controlled transaction histories.

use chrono::{DateTime, Duration, TimeZone, Utc};
use triage_core::agent::{Step, StepContext, StepDetail, TriageAgent};
use triage_core::error::TriageResult;
use triage_core::risk_signals_agent::{RiskSignalsAgent, RiskSignalsDetail};
use triage_core::store::{AlertRecord, CardRecord, CustomerRecord, TransactionRecord, TriageStore};
use triage_core::types::{ActionSuggestion, AlertStatus, CardStatus, KycLevel, RiskLevel};

const CUSTOMER: &str = "cust-risk-001";
const CARD: &str = "card-risk-001";

fn store_with_customer() -> TriageResult<TriageStore> {
    let store = TriageStore::in_memory()?;
    store.migrate()?;
    let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    store.insert_customer(&CustomerRecord {
        id: CUSTOMER.to_string(),
        name: "Risk Tester".to_string(),
        email_masked: "ri***@example.com".to_string(),
        kyc_level: KycLevel::Verified,
        created_at: created,
    })?;
    store.insert_card(&CardRecord {
        id: CARD.to_string(),
        customer_id: CUSTOMER.to_string(),
        last4: "9876".to_string(),
        network: "visa".to_string(),
        status: CardStatus::Active,
        created_at: created,
    })?;
    Ok(store)
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

fn context(store: &TriageStore, suspect_id: &str) -> TriageResult<StepContext> {
    let suspect = store.get_transaction(suspect_id)?.expect("suspect seeded");
    Ok(StepContext {
        run_id: "run-test".to_string(),
        role: triage_core::types::Role::Agent,
        client_id: "tester".to_string(),
        alert: AlertRecord {
            id: "alert-test".to_string(),
            customer_id: CUSTOMER.to_string(),
            suspect_txn_id: suspect_id.to_string(),
            risk: RiskLevel::Medium,
            status: AlertStatus::Open,
            created_at: suspect.ts,
        },
        now: suspect.ts,
        suspect_txn: suspect,
        profile: None,
        recent_tx: None,
        risk_signals: None,
        kb: None,
        decision: None,
        proposal: None,
    })
}

fn run_signals(store: &TriageStore, suspect_id: &str) -> TriageResult<RiskSignalsDetail> {
    let agent = RiskSignalsAgent::new(store.clone());
    assert_eq!(agent.step(), Step::RiskSignals);
    let ctx = context(store, suspect_id)?;
    match agent.run(&ctx)? {
        StepDetail::RiskSignals(detail) => Ok(detail),
        other => panic!("unexpected detail {other:?}"),
    }
}

/// Test 1: a $120 purchase at a known merchant on a known device, at an
/// hour the customer never uses, scores only the unusual-time points.
#[test]
fn known_pattern_odd_hour_scores_low() -> TriageResult<()> {
    let store = store_with_customer()?;
    let suspect_ts = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();

    // Three daytime transactions a day, ~$60, same merchant and device.
    for day in 1..=90i64 {
        for (slot, hour) in [9u32, 13, 18].iter().enumerate() {
            let ts = (suspect_ts - Duration::days(day))
                .date_naive()
                .and_hms_opt(*hour, 15, 0)
                .map(|t| t.and_utc())
                .expect("valid time");
            insert_txn(
                &store,
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
        &store,
        "txn-suspect",
        suspect_ts,
        12_000,
        "Hilltop Grocers",
        "5411",
        Some("device-home"),
        Some(("US", "Portland")),
    )?;

    let detail = run_signals(&store, "txn-suspect")?;

    assert!(detail.patterns.unusual_time);
    assert!(!detail.device.new_device);
    assert!(!detail.merchant.new_merchant);
    assert!(!detail.patterns.unusual_location);
    assert!(!detail.patterns.velocity_spike);
    assert!(
        (15.0..=30.0).contains(&detail.score),
        "score {} out of expected band",
        detail.score
    );
    assert_eq!(detail.suggestion, Some(ActionSuggestion::Monitor));
    Ok(())
}

/// Test 2: a velocity burst with new device, new merchant and unseen
/// location clamps to 100 and suggests a freeze.
#[test]
fn velocity_burst_clamps_to_hundred() -> TriageResult<()> {
    let store = store_with_customer()?;
    let suspect_ts = Utc.with_ymd_and_hms(2026, 3, 1, 14, 0, 0).unwrap();

    // Two quiet transactions a day for the preceding 89 days.
    for day in 2..=90i64 {
        for slot in 0..2i64 {
            insert_txn(
                &store,
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
    // Nineteen transactions in the last 24 hours, then the suspect.
    for i in 0..19i64 {
        insert_txn(
            &store,
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
        &store,
        "txn-suspect",
        suspect_ts,
        180_000,
        "Nightowl Imports",
        "5969",
        Some("device-new"),
        Some(("RO", "Bucharest")),
    )?;

    let detail = run_signals(&store, "txn-suspect")?;

    assert_eq!(detail.velocity.txns_24h, 20);
    assert!(detail.device.new_device);
    assert!(detail.merchant.new_merchant);
    assert!(detail.patterns.unusual_location);
    assert!(detail.patterns.velocity_spike);
    assert_eq!(detail.score, 100.0);
    assert_eq!(detail.suggestion, Some(ActionSuggestion::FreezeCard));
    assert!(detail.reasons.len() > 3);
    Ok(())
}

/// Test 3: merchant risk combines MCC, name pattern and novelty, capped.
#[test]
fn merchant_risk_components() -> TriageResult<()> {
    let store = store_with_customer()?;
    let suspect_ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    for day in 1..=30i64 {
        insert_txn(
            &store,
            &format!("txn-{day:03}"),
            suspect_ts - Duration::days(day),
            7_500,
            "Hilltop Grocers",
            "5411",
            Some("device-home"),
            None,
        )?;
    }
    // Quasi-cash MCC, suspicious name, never seen before: 30 + 20 + 15.
    insert_txn(
        &store,
        "txn-suspect",
        suspect_ts,
        10_000,
        "ATM CASH POINT",
        "6051",
        Some("device-home"),
        None,
    )?;

    let detail = run_signals(&store, "txn-suspect")?;
    assert!(detail.merchant.high_risk_mcc);
    assert!(detail.merchant.suspicious_name);
    assert!(detail.merchant.new_merchant);
    assert_eq!(detail.merchant.risk_score, 65.0);
    Ok(())
}

/// Test 4: the fallback detail is the documented deterministic substitute.
#[test]
fn fallback_shape() {
    let detail = RiskSignalsDetail::fallback();
    assert_eq!(detail.score, 50.0);
    assert_eq!(detail.reasons, vec!["risk_analysis_unavailable".to_string()]);
    assert!(detail.suggestion.is_none());
}
