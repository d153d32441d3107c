//! Evaluation report tests over a small book of completed runs and cases.

use chrono::{Duration, Utc};
use std::sync::Arc;
use triage_core::cache::MemoryKv;
use triage_core::clock::{SharedClock, SystemClock};
use triage_core::config::EngineConfig;
use triage_core::error::TriageResult;
use triage_core::service::{StartTriageRequest, TriageService};
use triage_core::store::{
    AlertRecord, CardRecord, CustomerRecord, KbDocRecord, TransactionRecord, TriageStore,
};
use triage_core::types::{AlertStatus, CardStatus, KycLevel, RiskLevel, Role};

const CUSTOMER: &str = "cust-ev-0001";
const CARD: &str = "card-ev-0001";
const ALERT: &str = "alert-ev-001";
const SUSPECT: &str = "txn-ev-suspect";

fn seeded_service() -> TriageResult<(TriageStore, TriageService)> {
    let store = TriageStore::in_memory()?;
    store.migrate()?;

    let suspect_ts = Utc::now() - Duration::hours(3);
    store.insert_customer(&CustomerRecord {
        id: CUSTOMER.to_string(),
        name: "Eval Tester".to_string(),
        email_masked: "ev***@example.com".to_string(),
        kyc_level: KycLevel::Verified,
        created_at: suspect_ts - Duration::days(300),
    })?;
    store.insert_card(&CardRecord {
        id: CARD.to_string(),
        customer_id: CUSTOMER.to_string(),
        last4: "8888".to_string(),
        network: "visa".to_string(),
        status: CardStatus::Active,
        created_at: suspect_ts - Duration::days(290),
    })?;

    for day in 2..=90i64 {
        for slot in 0..2i64 {
            store.insert_transaction(&TransactionRecord {
                id: format!("txn-ev-{day:03}-{slot}"),
                customer_id: CUSTOMER.to_string(),
                card_id: CARD.to_string(),
                mcc: "5411".to_string(),
                merchant: "Hilltop Grocers".to_string(),
                amount_minor: 5_000,
                currency: "USD".to_string(),
                ts: suspect_ts - Duration::days(day) - Duration::hours(slot * 4),
                device_id: Some("device-home".to_string()),
                country: Some(("US").to_string()),
                city: Some("Portland".to_string()),
            })?;
        }
    }
    for i in 0..19i64 {
        store.insert_transaction(&TransactionRecord {
            id: format!("txn-ev-burst-{i:02}"),
            customer_id: CUSTOMER.to_string(),
            card_id: CARD.to_string(),
            mcc: "5411".to_string(),
            merchant: "Hilltop Grocers".to_string(),
            amount_minor: 5_000,
            currency: "USD".to_string(),
            ts: suspect_ts - Duration::minutes(30 + i * 60),
            device_id: Some("device-home".to_string()),
            country: Some("US".to_string()),
            city: Some("Portland".to_string()),
        })?;
    }
    store.insert_transaction(&TransactionRecord {
        id: SUSPECT.to_string(),
        customer_id: CUSTOMER.to_string(),
        card_id: CARD.to_string(),
        mcc: "6051".to_string(),
        merchant: "QUICKCASH TEMP LLC".to_string(),
        amount_minor: 180_000,
        currency: "USD".to_string(),
        ts: suspect_ts,
        device_id: Some("device-new".to_string()),
        country: Some("RO".to_string()),
        city: Some("Bucharest".to_string()),
    })?;
    store.insert_alert(&AlertRecord {
        id: ALERT.to_string(),
        customer_id: CUSTOMER.to_string(),
        suspect_txn_id: SUSPECT.to_string(),
        risk: RiskLevel::High,
        status: AlertStatus::Open,
        created_at: suspect_ts + Duration::minutes(5),
    })?;
    store.insert_kb_doc(&KbDocRecord {
        id: "kb-ev-001".to_string(),
        title: "Transaction Velocity Guidelines".to_string(),
        anchor: "velocity".to_string(),
        content_text: "Velocity spikes and new devices warrant review.".to_string(),
    })?;

    let clock: SharedClock = Arc::new(SystemClock);
    let kv = Arc::new(MemoryKv::new(Arc::clone(&clock)));
    let service = TriageService::new(store.clone(), kv, clock, EngineConfig::default_test());
    Ok((store, service))
}

async fn run_triage_and_freeze(service: &TriageService) -> TriageResult<String> {
    let started = service
        .start_triage(
            "eval-lead",
            Role::Lead,
            &StartTriageRequest {
                alert_id: ALERT.to_string(),
                customer_id: CUSTOMER.to_string(),
                suspect_txn_id: SUSPECT.to_string(),
            },
        )
        .await?;

    for _ in 0..100 {
        if service.run_status(&started.run_id)?.status == "completed" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    // Lead override freeze resolves the alert.
    service.freeze_card("eval-lead", Role::Lead, CARD, Some(ALERT), None, None)?;
    Ok(started.run_id)
}

/// Test 1: all four report families are produced with consistent counts.
#[tokio::test]
async fn report_families_present() -> TriageResult<()> {
    let (_store, service) = seeded_service()?;
    run_triage_and_freeze(&service).await?;

    let reports = service.evals()?;
    let ids: Vec<&str> = reports.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "fraud_detection",
            "agent_performance",
            "knowledge_base",
            "case_handling"
        ]
    );
    for report in &reports {
        assert_eq!(report.test_cases, report.passed + report.failed, "{}", report.id);
        assert!((0.0..=1.0).contains(&report.accuracy), "{}", report.id);
    }
    Ok(())
}

/// Test 2: the high-risk run against the high alert scores a clean
/// confusion-matrix diagonal.
#[tokio::test]
async fn fraud_detection_confusion_matrix() -> TriageResult<()> {
    let (_store, service) = seeded_service()?;
    run_triage_and_freeze(&service).await?;

    let reports = service.evals()?;
    let fraud = &reports[0];
    assert_eq!(fraud.test_cases, 1);
    assert_eq!(fraud.passed, 1);
    assert_eq!(fraud.accuracy, 1.0);

    let matrix = fraud.confusion_matrix.as_ref().expect("matrix");
    // Predicted high (row 2) for a high alert (column 2).
    assert_eq!(matrix.counts[2][2], 1);
    Ok(())
}

/// Test 3: agent performance counts every persisted trace, and the frozen
/// card's case is consistent with the resolved alert.
#[tokio::test]
async fn performance_and_case_consistency() -> TriageResult<()> {
    let (store, service) = seeded_service()?;
    let run_id = run_triage_and_freeze(&service).await?;

    let trace_count = store.traces_for_run(&run_id)?.len() as i64;
    let reports = service.evals()?;

    let perf = &reports[1];
    assert_eq!(perf.test_cases, trace_count);
    assert_eq!(perf.failed, 0);

    let cases = &reports[3];
    assert_eq!(cases.test_cases, 1);
    assert_eq!(cases.passed, 1, "freeze case must match resolved alert");
    Ok(())
}
