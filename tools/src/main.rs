//! triage-runner: headless demo runner for the triage engine.
//!
//! Usage:
//!   triage-runner --db run.db
//!   triage-runner --db :memory:
//!
//! Seeds a demo book, raises an alert on a suspicious transaction, runs a
//! triage while printing the live event feed, applies the recommended
//! action, and prints a run summary plus the evaluation reports.

use anyhow::Result;
use chrono::{Duration, Utc};
use std::env;
use std::sync::Arc;
use triage_core::cache::MemoryKv;
use triage_core::clock::{SharedClock, SystemClock};
use triage_core::config::EngineConfig;
use triage_core::service::{StartTriageRequest, TriageService};
use triage_core::store::{
    AccountRecord, AlertRecord, CardRecord, CustomerRecord, KbDocRecord, TransactionRecord,
    TriageStore,
};
use triage_core::types::{AlertStatus, CardStatus, KycLevel, RiskLevel, Role};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");

    println!("triage-runner");
    println!("  db: {db}");
    println!();

    let store = if db == ":memory:" {
        TriageStore::in_memory()?
    } else {
        TriageStore::open(db)?
    };
    store.migrate()?;

    let (alert_id, customer_id, suspect_txn_id, card_id) = seed(&store)?;

    let clock: SharedClock = Arc::new(SystemClock);
    let kv = Arc::new(MemoryKv::new(Arc::clone(&clock)));
    let service = TriageService::new(store.clone(), kv, clock, EngineConfig::from_env());

    let started = service
        .start_triage(
            "demo-lead",
            Role::Lead,
            &StartTriageRequest {
                alert_id: alert_id.clone(),
                customer_id: customer_id.clone(),
                suspect_txn_id,
            },
        )
        .await?;
    println!("run started: {}", started.run_id);
    println!();

    // Print the live feed until the stream closes with `completed`.
    if let Some(mut subscription) = service.subscribe(&started.run_id) {
        while let Some(event) = subscription.next().await {
            println!("  [{}] {}", event.event_type, event.data);
        }
    }
    println!();

    let status = service.run_status(&started.run_id)?;
    println!("=== RUN SUMMARY ===");
    println!("  run_id:        {}", status.run_id);
    println!("  status:        {}", status.status);
    println!("  risk:          {:?}", status.risk.map(|r| r.as_str()));
    println!("  fallback_used: {}", status.fallback_used);
    println!("  latency_ms:    {:?}", status.latency_ms);
    println!("  traces:");
    for trace in &status.traces {
        println!(
            "    #{} {:<16} ok={} {}ms",
            trace.seq, trace.step, trace.ok, trace.duration_ms
        );
    }
    println!();

    // Apply the obvious action for a high-risk run: freeze with lead override.
    if status.risk == Some(RiskLevel::High) {
        let outcome = service.freeze_card(
            "demo-lead",
            Role::Lead,
            &card_id,
            Some(&alert_id),
            None,
            Some("demo-freeze-1"),
        )?;
        println!("freeze_card: {:?} case={:?}", outcome.status, outcome.case_id);
        println!();
    }

    println!("=== EVALS ===");
    for report in service.evals()? {
        println!(
            "  {:<24} cases={} passed={} accuracy={:.2}",
            report.id, report.test_cases, report.passed, report.accuracy
        );
    }

    Ok(())
}

/// Seed one customer with a quiet 90-day history and one loud outlier.
fn seed(store: &TriageStore) -> Result<(String, String, String, String)> {
    let now = Utc::now();
    let customer_id = "cust-00000001".to_string();
    let card_id = "card-00000001".to_string();

    store.insert_customer(&CustomerRecord {
        id: customer_id.clone(),
        name: "Dana Whitfield".to_string(),
        email_masked: "da***@example.com".to_string(),
        kyc_level: KycLevel::Verified,
        created_at: now - Duration::days(400),
    })?;
    store.insert_card(&CardRecord {
        id: card_id.clone(),
        customer_id: customer_id.clone(),
        last4: "4242".to_string(),
        network: "visa".to_string(),
        status: CardStatus::Active,
        created_at: now - Duration::days(380),
    })?;
    store.insert_account(&AccountRecord {
        id: "acct-00000001".to_string(),
        customer_id: customer_id.clone(),
        balance_minor: 812_550,
        currency: "USD".to_string(),
    })?;

    // Two groceries-sized purchases a day, same device, same city.
    for day in 1..=90i64 {
        for slot in 0..2i64 {
            let ts = now - Duration::days(day) - Duration::hours(10 + slot * 6);
            store.insert_transaction(&TransactionRecord {
                id: format!("txn-{day:03}-{slot}"),
                customer_id: customer_id.clone(),
                card_id: card_id.clone(),
                mcc: "5411".to_string(),
                merchant: "Hilltop Grocers".to_string(),
                amount_minor: 2_400 + (day % 7) * 310,
                currency: "USD".to_string(),
                ts,
                device_id: Some("device-home".to_string()),
                country: Some("US".to_string()),
                city: Some("Portland".to_string()),
            })?;
        }
    }

    // The outlier: new merchant, new device, unseen location, 03:00, $1,800.
    let suspect_txn_id = "txn-suspect".to_string();
    let suspect_ts = now
        .date_naive()
        .and_hms_opt(3, 12, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now);
    store.insert_transaction(&TransactionRecord {
        id: suspect_txn_id.clone(),
        customer_id: customer_id.clone(),
        card_id: card_id.clone(),
        mcc: "6051".to_string(),
        merchant: "QUICKCASH TEMP LLC".to_string(),
        amount_minor: 180_000,
        currency: "USD".to_string(),
        ts: suspect_ts,
        device_id: Some("device-unknown-7".to_string()),
        country: Some("RO".to_string()),
        city: Some("Bucharest".to_string()),
    })?;

    let alert_id = "alert-00000001".to_string();
    store.insert_alert(&AlertRecord {
        id: alert_id.clone(),
        customer_id: customer_id.clone(),
        suspect_txn_id: suspect_txn_id.clone(),
        risk: RiskLevel::High,
        status: AlertStatus::Open,
        created_at: now,
    })?;

    for (doc_id, title, anchor, body) in [
        (
            "kb-001",
            "Transaction Velocity Guidelines",
            "velocity-guidelines",
            "Velocity spikes above three times the customer's daily average \
             warrant review. Combine the 24 hour window with the device and \
             location signals before freezing a card.",
        ),
        (
            "kb-002",
            "Device Fingerprinting Playbook",
            "device-playbook",
            "A device never seen for the customer raises risk, especially \
             together with an unusual location or merchant. Confirm with the \
             customer before acting on device signals alone.",
        ),
        (
            "kb-003",
            "Merchant Risk Classification",
            "merchant-risk",
            "Cash-like merchant categories (quasi-cash, money transfer, \
             gambling) carry elevated risk. Temporary or test merchant names \
             are a strong fraud marker.",
        ),
    ] {
        store.insert_kb_doc(&KbDocRecord {
            id: doc_id.to_string(),
            title: title.to_string(),
            anchor: anchor.to_string(),
            content_text: body.to_string(),
        })?;
    }

    Ok((alert_id, customer_id, suspect_txn_id, card_id))
}
