//! Service façade tests: start/status semantics, the 404/409/429 error
//! surface, KB search validation, and the alert work queue.

use chrono::{Duration, Utc};
use std::sync::Arc;
use triage_core::cache::MemoryKv;
use triage_core::clock::{SharedClock, SystemClock};
use triage_core::config::EngineConfig;
use triage_core::error::{TriageError, TriageResult};
use triage_core::service::{StartTriageRequest, TriageService};
use triage_core::store::{
    AlertRecord, CardRecord, CustomerRecord, TransactionRecord, TriageStore,
};
use triage_core::types::{AlertStatus, CardStatus, KycLevel, RiskLevel, Role};

const CUSTOMER: &str = "cust-svc-0001";
const CARD: &str = "card-svc-0001";
const ALERT: &str = "alert-svc-001";
const SUSPECT: &str = "txn-svc-suspect";

fn seeded_service(config: EngineConfig) -> TriageResult<(TriageStore, TriageService)> {
    let store = TriageStore::in_memory()?;
    store.migrate()?;

    let base = Utc::now() - Duration::days(1);
    store.insert_customer(&CustomerRecord {
        id: CUSTOMER.to_string(),
        name: "Service Tester".to_string(),
        email_masked: "se***@example.com".to_string(),
        kyc_level: KycLevel::Verified,
        created_at: base - Duration::days(200),
    })?;
    store.insert_card(&CardRecord {
        id: CARD.to_string(),
        customer_id: CUSTOMER.to_string(),
        last4: "3333".to_string(),
        network: "mastercard".to_string(),
        status: CardStatus::Active,
        created_at: base - Duration::days(190),
    })?;
    for day in 1..=15i64 {
        store.insert_transaction(&TransactionRecord {
            id: format!("txn-svc-{day:03}"),
            customer_id: CUSTOMER.to_string(),
            card_id: CARD.to_string(),
            mcc: "5411".to_string(),
            merchant: "Hilltop Grocers".to_string(),
            amount_minor: 3_000,
            currency: "USD".to_string(),
            ts: base - Duration::days(day),
            device_id: Some("device-home".to_string()),
            country: None,
            city: None,
        })?;
    }
    store.insert_transaction(&TransactionRecord {
        id: SUSPECT.to_string(),
        customer_id: CUSTOMER.to_string(),
        card_id: CARD.to_string(),
        mcc: "5411".to_string(),
        merchant: "Hilltop Grocers".to_string(),
        amount_minor: 3_200,
        currency: "USD".to_string(),
        ts: base,
        device_id: Some("device-home".to_string()),
        country: None,
        city: None,
    })?;
    store.insert_alert(&AlertRecord {
        id: ALERT.to_string(),
        customer_id: CUSTOMER.to_string(),
        suspect_txn_id: SUSPECT.to_string(),
        risk: RiskLevel::Low,
        status: AlertStatus::Open,
        created_at: base + Duration::hours(2),
    })?;

    let clock: SharedClock = Arc::new(SystemClock);
    let kv = Arc::new(MemoryKv::new(Arc::clone(&clock)));
    let service = TriageService::new(store.clone(), kv, clock, config);
    Ok((store, service))
}

fn start_request() -> StartTriageRequest {
    StartTriageRequest {
        alert_id: ALERT.to_string(),
        customer_id: CUSTOMER.to_string(),
        suspect_txn_id: SUSPECT.to_string(),
    }
}

async fn wait_until_completed(service: &TriageService, run_id: &str) -> TriageResult<()> {
    for _ in 0..100 {
        if service.run_status(run_id)?.status == "completed" {
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("run {run_id} never completed");
}

/// Test 1: a started run reports running, then completed with traces.
#[tokio::test]
async fn start_and_status() -> TriageResult<()> {
    let (_store, service) = seeded_service(EngineConfig::default_test())?;

    let started = service
        .start_triage("client-1", Role::Agent, &start_request())
        .await?;
    assert_eq!(started.status, "started");

    wait_until_completed(&service, &started.run_id).await?;
    let status = service.run_status(&started.run_id)?;
    assert_eq!(status.status, "completed");
    assert!(status.ended_at.is_some());
    assert!(status.risk.is_some());
    assert_eq!(status.traces.len(), 6);
    assert!(status.latency_ms.is_some());
    Ok(())
}

/// Test 2: unknown runs and unknown alerts are NotFound.
#[tokio::test]
async fn not_found_surfaces() -> TriageResult<()> {
    let (_store, service) = seeded_service(EngineConfig::default_test())?;

    assert!(matches!(
        service.run_status("run-missing"),
        Err(TriageError::NotFound { entity: "run", .. })
    ));

    let mut req = start_request();
    req.alert_id = "alert-missing".to_string();
    assert!(matches!(
        service.start_triage("client-1", Role::Agent, &req).await,
        Err(TriageError::NotFound { entity: "alert", .. })
    ));
    Ok(())
}

/// Test 3 (S5): with a 5-request budget the sixth start is rate limited
/// with a retry hint bounded by the window.
#[tokio::test]
async fn rate_limited_start() -> TriageResult<()> {
    let mut config = EngineConfig::default_test();
    config.rate_limit_max_requests = 5;
    let (_store, service) = seeded_service(config)?;

    // First start wins; the next four spend budget on conflicts.
    let started = service
        .start_triage("client-burst", Role::Agent, &start_request())
        .await?;
    for _ in 0..4 {
        match service
            .start_triage("client-burst", Role::Agent, &start_request())
            .await
        {
            Err(TriageError::Conflict { .. }) | Ok(_) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    match service
        .start_triage("client-burst", Role::Agent, &start_request())
        .await
    {
        Err(TriageError::RateLimited { retry_after_secs }) => {
            assert!(retry_after_secs <= 60);
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }

    wait_until_completed(&service, &started.run_id).await?;
    Ok(())
}

/// Test 4: a concurrent start for the same alert conflicts and points at
/// the in-flight run.
#[tokio::test]
async fn conflicting_start() -> TriageResult<()> {
    let (_store, service) = seeded_service(EngineConfig::default_test())?;

    let started = service
        .start_triage("client-a", Role::Agent, &start_request())
        .await?;
    match service
        .start_triage("client-b", Role::Agent, &start_request())
        .await
    {
        Err(TriageError::Conflict { existing_id, .. }) => {
            assert_eq!(existing_id.as_deref(), Some(started.run_id.as_str()));
        }
        // The first run may already have finished on a fast machine.
        Ok(_) => {}
        other => panic!("unexpected {other:?}"),
    }

    wait_until_completed(&service, &started.run_id).await?;
    Ok(())
}

/// Test 5: KB search validates query and limit bounds.
#[tokio::test]
async fn kb_search_validation() -> TriageResult<()> {
    let (_store, service) = seeded_service(EngineConfig::default_test())?;

    assert!(matches!(
        service.kb_search("", None),
        Err(TriageError::Validation { .. })
    ));
    assert!(matches!(
        service.kb_search(&"q".repeat(501), None),
        Err(TriageError::Validation { .. })
    ));
    assert!(matches!(
        service.kb_search("velocity", Some(51)),
        Err(TriageError::Validation { .. })
    ));

    let response = service.kb_search("velocity", Some(5))?;
    assert_eq!(response.query, "velocity");
    assert_eq!(response.total_results, response.results.len());
    Ok(())
}

/// Test 6: the alert queue embeds customer and transaction summaries,
/// newest alert first, with masked customer ids.
#[tokio::test]
async fn alert_queue_listing() -> TriageResult<()> {
    let (store, service) = seeded_service(EngineConfig::default_test())?;

    // An older, second alert on the same suspect's history.
    store.insert_alert(&AlertRecord {
        id: "alert-svc-000".to_string(),
        customer_id: CUSTOMER.to_string(),
        suspect_txn_id: "txn-svc-001".to_string(),
        risk: RiskLevel::Medium,
        status: AlertStatus::Open,
        created_at: Utc::now() - Duration::days(3),
    })?;

    let alerts = service.list_alerts()?;
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0].alert_id, ALERT, "newest first");
    assert_eq!(alerts[0].customer_name, "Service Tester");
    assert_eq!(alerts[0].txn_merchant, "Hilltop Grocers");
    // Customer ids are masked on the wire.
    assert!(alerts[0].customer_id.contains("***"));
    assert_ne!(alerts[0].customer_id, CUSTOMER);
    Ok(())
}
