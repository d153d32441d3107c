//! Typed events published to run subscribers.
//!
//! RULE: an event's `data` is redacted at construction time. Nothing is
//! handed to the stream that has not passed through the redactor.

use crate::redactor::redact_json;
use crate::types::RunId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Payload of one stream event, before redaction and envelope wrapping.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventData {
    Connected {},
    PlanBuilt {
        steps: Vec<&'static str>,
    },
    ToolUpdate {
        step: &'static str,
        ok: bool,
        duration_ms: u64,
    },
    FallbackTriggered {
        failed_step: &'static str,
        reason: String,
    },
    DecisionFinalized {
        risk: crate::types::RiskLevel,
        proposed_action: crate::types::RecommendedAction,
        confidence: f64,
        fallback_used: bool,
        reasons: Vec<String>,
        citations: Vec<String>,
        requires_otp: bool,
    },
    Error {
        message: String,
        correlation_id: String,
    },
    Heartbeat {},
    Completed {},
}

/// Extract a stable string name from an event payload.
/// This is the `type` field clients dispatch on; unknown types are no-ops
/// for them, so variants are only ever added.
pub fn event_type_name(data: &EventData) -> &'static str {
    match data {
        EventData::Connected { .. } => "connected",
        EventData::PlanBuilt { .. } => "plan_built",
        EventData::ToolUpdate { .. } => "tool_update",
        EventData::FallbackTriggered { .. } => "fallback_triggered",
        EventData::DecisionFinalized { .. } => "decision_finalized",
        EventData::Error { .. } => "error",
        EventData::Heartbeat { .. } => "heartbeat",
        EventData::Completed { .. } => "completed",
    }
}

/// The envelope every subscriber receives.
#[derive(Debug, Clone, Serialize)]
pub struct TriageEvent {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub timestamp: DateTime<Utc>,
    pub run_id: RunId,
    pub data: Value,
}

impl TriageEvent {
    /// Build an envelope, serializing and redacting the payload.
    pub fn new(run_id: &str, at: DateTime<Utc>, data: &EventData) -> Self {
        let raw = serde_json::to_value(data).unwrap_or(Value::Null);
        let (clean, _) = redact_json(raw);
        Self {
            event_type: event_type_name(data),
            timestamp: at,
            run_id: run_id.to_string(),
            data: clean,
        }
    }
}
