//! Read-only evaluation reports over persisted runs, traces and cases.
//!
//! Four report families: fraud_detection (decision vs alert risk),
//! agent_performance (per-step health), knowledge_base (retrieval
//! coverage), case_handling (case/alert consistency).

use crate::error::TriageResult;
use crate::store::TriageStore;
use crate::types::{AlertStatus, CaseStatus, CaseType, RiskLevel};
use serde::Serialize;
use serde_json::json;

const TOP_FAILURES: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct ConfusionMatrix {
    /// Row = predicted level, column = alert level, in `labels` order.
    pub labels: [&'static str; 3],
    pub counts: [[i64; 3]; 3],
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub id: String,
    pub name: String,
    pub test_cases: i64,
    pub passed: i64,
    pub failed: i64,
    pub accuracy: f64,
    pub confusion_matrix: Option<ConfusionMatrix>,
    pub top_failures: Vec<String>,
    pub additional_metrics: Option<serde_json::Value>,
}

pub fn run_all(store: &TriageStore) -> TriageResult<Vec<EvalReport>> {
    Ok(vec![
        fraud_detection(store)?,
        agent_performance(store)?,
        knowledge_base(store)?,
        case_handling(store)?,
    ])
}

fn accuracy(passed: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        passed as f64 / total as f64
    }
}

fn level_index(level: RiskLevel) -> usize {
    match level {
        RiskLevel::Low => 0,
        RiskLevel::Medium => 1,
        RiskLevel::High => 2,
    }
}

/// Decision quality: the run's risk against the alert's labelled risk.
fn fraud_detection(store: &TriageStore) -> TriageResult<EvalReport> {
    let rows = store.runs_with_alert_risk()?;
    let mut counts = [[0i64; 3]; 3];
    let mut passed = 0i64;
    let mut top_failures = Vec::new();

    for (run_id, predicted, expected) in &rows {
        counts[level_index(*predicted)][level_index(*expected)] += 1;
        if predicted == expected {
            passed += 1;
        } else if top_failures.len() < TOP_FAILURES {
            top_failures.push(format!(
                "run {run_id}: predicted {} for a {} alert",
                predicted.as_str(),
                expected.as_str()
            ));
        }
    }

    let total = rows.len() as i64;
    Ok(EvalReport {
        id: "fraud_detection".to_string(),
        name: "Fraud Detection Accuracy".to_string(),
        test_cases: total,
        passed,
        failed: total - passed,
        accuracy: accuracy(passed, total),
        confusion_matrix: Some(ConfusionMatrix {
            labels: ["low", "medium", "high"],
            counts,
        }),
        top_failures,
        additional_metrics: None,
    })
}

/// Step health: success rate and average latency per pipeline step.
fn agent_performance(store: &TriageStore) -> TriageResult<EvalReport> {
    let stats = store.trace_step_stats()?;
    let total: i64 = stats.iter().map(|s| s.total).sum();
    let passed: i64 = stats.iter().map(|s| s.ok_count).sum();

    let mut top_failures = Vec::new();
    for stat in &stats {
        let failures = stat.total - stat.ok_count;
        if failures > 0 && top_failures.len() < TOP_FAILURES {
            top_failures.push(format!(
                "step {}: {failures} of {} invocations failed",
                stat.step, stat.total
            ));
        }
    }

    let per_step: Vec<_> = stats
        .iter()
        .map(|s| {
            json!({
                "step": s.step,
                "total": s.total,
                "ok": s.ok_count,
                "avg_duration_ms": s.avg_duration_ms,
            })
        })
        .collect();

    Ok(EvalReport {
        id: "agent_performance".to_string(),
        name: "Agent Performance".to_string(),
        test_cases: total,
        passed,
        failed: total - passed,
        accuracy: accuracy(passed, total),
        confusion_matrix: None,
        top_failures,
        additional_metrics: Some(json!({ "per_step": per_step })),
    })
}

/// Retrieval coverage: how often the KB lookup surfaced material.
fn knowledge_base(store: &TriageStore) -> TriageResult<EvalReport> {
    let details = store.trace_details_for_step("kb_lookup")?;
    let mut passed = 0i64;
    let mut result_total = 0i64;
    let mut citation_total = 0i64;

    for raw in &details {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
            continue;
        };
        let results = value
            .get("results")
            .and_then(|r| r.as_array())
            .map(|r| r.len() as i64)
            .unwrap_or(0);
        let citations = value
            .get("citations")
            .and_then(|c| c.as_array())
            .map(|c| c.len() as i64)
            .unwrap_or(0);
        result_total += results;
        citation_total += citations;
        if results > 0 || citations > 0 {
            passed += 1;
        }
    }

    let total = details.len() as i64;
    Ok(EvalReport {
        id: "knowledge_base".to_string(),
        name: "Knowledge Base Coverage".to_string(),
        test_cases: total,
        passed,
        failed: total - passed,
        accuracy: accuracy(passed, total),
        confusion_matrix: None,
        top_failures: Vec::new(),
        additional_metrics: Some(json!({
            "avg_results": if total > 0 { result_total as f64 / total as f64 } else { 0.0 },
            "avg_citations": if total > 0 { citation_total as f64 / total as f64 } else { 0.0 },
        })),
    })
}

/// Case/alert consistency: each case's terminal state must match the
/// status it drove the originating alert into.
fn case_handling(store: &TriageStore) -> TriageResult<EvalReport> {
    let rows = store.cases_with_alert_status()?;
    let mut passed = 0i64;
    let mut top_failures = Vec::new();

    for (case, alert_status) in &rows {
        let consistent = match (case.case_type, alert_status) {
            (_, None) => true, // case raised outside an alert
            (CaseType::CardFreeze, Some(status)) => *status == AlertStatus::Resolved,
            (CaseType::Dispute, Some(status)) => {
                case.status != CaseStatus::Open || *status == AlertStatus::InvestigatingDisputeOpened
            }
            (CaseType::ContactCustomer, Some(status)) => *status == AlertStatus::Contacted,
            (CaseType::FalsePositive, Some(status)) => {
                *status == AlertStatus::ClosedFalsePositive
            }
        };
        if consistent {
            passed += 1;
        } else if top_failures.len() < TOP_FAILURES {
            top_failures.push(format!(
                "case {}: {} case with alert status {:?}",
                case.id,
                case.case_type.as_str(),
                alert_status.as_ref().map(|s| s.as_str())
            ));
        }
    }

    let total = rows.len() as i64;
    Ok(EvalReport {
        id: "case_handling".to_string(),
        name: "Case Handling Consistency".to_string(),
        test_cases: total,
        passed,
        failed: total - passed,
        accuracy: accuracy(passed, total),
        confusion_matrix: None,
        top_failures,
        additional_metrics: None,
    })
}
