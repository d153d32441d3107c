//! Risk-signals step — velocity, device, merchant and pattern analysis
//! over the 90 days ending at the suspect transaction.
//!
//! The composite score is a sum of bounded indicator contributions,
//! clamped to [0, 100]. Every contributing indicator adds one
//! human-readable reason; the reasons later drive KB retrieval.

use crate::agent::{Step, StepContext, StepDetail, TriageAgent};
use crate::error::{TriageError, TriageResult};
use crate::store::{TransactionRecord, TriageStore};
use crate::types::{ActionSuggestion, Cents};
use chrono::{Duration, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ── Constants ────────────────────────────────────────────────────────────────

const LOOKBACK_DAYS: i64 = 90;
const HISTORICAL_DAYS: f64 = 89.0; // lookback minus the 24h velocity window
const MAX_TRANSACTIONS: usize = 1_000;

const HIGH_RISK_MCCS: [&str; 4] = ["5960", "6051", "7995", "4829"];

const AMOUNT_24H_THRESHOLD: Cents = 100_000; // $1,000
const LARGE_AMOUNT: Cents = 50_000; // $500
const VERY_LARGE_AMOUNT: Cents = 100_000; // $1,000
const COMMON_HOUR_SHARE: f64 = 0.05;
const SPIKE_SAMPLE: usize = 10;
const SPIKE_MULTIPLIER: f64 = 3.0;
const MANY_DEVICES: usize = 5;

const FREEZE_SCORE: f64 = 80.0;
const DISPUTE_SCORE: f64 = 50.0;

static SUSPICIOUS_MERCHANT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)temp|test|unknown|cash|atm").unwrap());

// ── Detail ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VelocitySignal {
    pub txns_24h: i64,
    pub amount_24h_minor: Cents,
    pub daily_avg: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSignal {
    pub new_device: bool,
    pub device_changes: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MerchantSignal {
    pub new_merchant: bool,
    pub high_risk_mcc: bool,
    pub suspicious_name: bool,
    pub risk_score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternSignal {
    pub unusual_time: bool,
    pub unusual_location: bool,
    pub velocity_spike: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSignalsDetail {
    pub score: f64,
    pub velocity: VelocitySignal,
    pub device: DeviceSignal,
    pub merchant: MerchantSignal,
    pub patterns: PatternSignal,
    pub reasons: Vec<String>,
    pub suggestion: Option<ActionSuggestion>,
}

impl RiskSignalsDetail {
    /// The deterministic substitute when risk analysis is unavailable.
    pub fn fallback() -> Self {
        Self {
            score: 50.0,
            velocity: VelocitySignal::default(),
            device: DeviceSignal::default(),
            merchant: MerchantSignal::default(),
            patterns: PatternSignal::default(),
            reasons: vec!["risk_analysis_unavailable".to_string()],
            suggestion: None,
        }
    }
}

// ── Agent ────────────────────────────────────────────────────────────────────

pub struct RiskSignalsAgent {
    store: TriageStore,
}

impl RiskSignalsAgent {
    pub fn new(store: TriageStore) -> Self {
        Self { store }
    }
}

impl TriageAgent for RiskSignalsAgent {
    fn step(&self) -> Step {
        Step::RiskSignals
    }

    fn run(&self, ctx: &StepContext) -> TriageResult<StepDetail> {
        let suspect = &ctx.suspect_txn;
        let window_end = suspect.ts;
        let window_start = window_end - Duration::days(LOOKBACK_DAYS);

        let all = self.store.transactions_between(
            &ctx.alert.customer_id,
            &window_start,
            &window_end,
            MAX_TRANSACTIONS,
        )?;
        if all.is_empty() {
            return Err(TriageError::StepFailure {
                step: Step::RiskSignals.name(),
                message: "no transactions in analysis window".to_string(),
            });
        }

        // Everything but the suspect itself feeds the historical baselines.
        let historical: Vec<&TransactionRecord> =
            all.iter().filter(|t| t.id != suspect.id).collect();

        let velocity = velocity_signal(&all, window_end);
        let device = device_signal(&historical, suspect);
        let merchant = merchant_signal(&historical, suspect);
        let patterns = pattern_signal(&historical, suspect);

        let (score, reasons) = composite(&velocity, &device, &merchant, &patterns, suspect);

        let suggestion = if score >= FREEZE_SCORE {
            ActionSuggestion::FreezeCard
        } else if score >= DISPUTE_SCORE {
            ActionSuggestion::OpenDispute
        } else {
            ActionSuggestion::Monitor
        };

        Ok(StepDetail::RiskSignals(RiskSignalsDetail {
            score,
            velocity,
            device,
            merchant,
            patterns,
            reasons,
            suggestion: Some(suggestion),
        }))
    }
}

// ── Signals ──────────────────────────────────────────────────────────────────

fn velocity_signal(
    all: &[TransactionRecord],
    window_end: chrono::DateTime<chrono::Utc>,
) -> VelocitySignal {
    let day_ago = window_end - Duration::hours(24);

    // The suspect sits at the window edge and counts inside the 24h window.
    let mut txns_24h = 0i64;
    let mut amount_24h_minor = 0;
    let mut older = 0i64;
    for t in all {
        if t.ts > day_ago {
            txns_24h += 1;
            amount_24h_minor += t.amount_minor;
        } else {
            older += 1;
        }
    }

    VelocitySignal {
        txns_24h,
        amount_24h_minor,
        daily_avg: older as f64 / HISTORICAL_DAYS,
    }
}

fn device_signal(historical: &[&TransactionRecord], suspect: &TransactionRecord) -> DeviceSignal {
    let devices: HashSet<&str> = historical
        .iter()
        .filter_map(|t| t.device_id.as_deref())
        .collect();

    let new_device = match suspect.device_id.as_deref() {
        Some(device) => !devices.contains(device),
        None => false,
    };

    DeviceSignal {
        new_device,
        device_changes: devices.len() as i64,
    }
}

fn merchant_signal(historical: &[&TransactionRecord], suspect: &TransactionRecord) -> MerchantSignal {
    let merchants: HashSet<&str> = historical.iter().map(|t| t.merchant.as_str()).collect();
    let new_merchant = !merchants.contains(suspect.merchant.as_str());
    let high_risk_mcc = HIGH_RISK_MCCS.contains(&suspect.mcc.as_str());
    let suspicious_name = SUSPICIOUS_MERCHANT_RE.is_match(&suspect.merchant);

    let mut risk_score: f64 = 0.0;
    if high_risk_mcc {
        risk_score += 30.0;
    }
    if suspicious_name {
        risk_score += 20.0;
    }
    if new_merchant {
        risk_score += 15.0;
    }

    MerchantSignal {
        new_merchant,
        high_risk_mcc,
        suspicious_name,
        risk_score: risk_score.min(100.0),
    }
}

fn pattern_signal(historical: &[&TransactionRecord], suspect: &TransactionRecord) -> PatternSignal {
    // An hour is "common" for the customer when at least 5% of their
    // historical transactions fall in it.
    let mut hour_counts: HashMap<u32, usize> = HashMap::new();
    for t in historical {
        *hour_counts.entry(t.ts.hour()).or_default() += 1;
    }
    let total = historical.len();
    let hour = suspect.ts.hour();
    let hour_is_common = total > 0
        && hour_counts
            .get(&hour)
            .map(|&c| c as f64 / total as f64 >= COMMON_HOUR_SHARE)
            .unwrap_or(false);
    let unusual_time = (hour < 6 || hour > 23) && !hour_is_common;

    let locations: HashSet<(&str, &str)> = historical
        .iter()
        .filter_map(|t| match (t.country.as_deref(), t.city.as_deref()) {
            (Some(country), Some(city)) => Some((country, city)),
            _ => None,
        })
        .collect();
    let unusual_location = match (suspect.country.as_deref(), suspect.city.as_deref()) {
        (Some(country), Some(city)) => !locations.contains(&(country, city)),
        _ => false,
    };

    // Amount spike versus the mean of the last 10 historical transactions.
    let recent: Vec<Cents> = historical
        .iter()
        .take(SPIKE_SAMPLE)
        .map(|t| t.amount_minor)
        .collect();
    let velocity_spike = if recent.is_empty() {
        false
    } else {
        let mean = recent.iter().sum::<Cents>() as f64 / recent.len() as f64;
        mean > 0.0 && suspect.amount_minor as f64 > SPIKE_MULTIPLIER * mean
    };

    PatternSignal {
        unusual_time,
        unusual_location,
        velocity_spike,
    }
}

/// Sum the bounded contributions and clamp to [0, 100].
fn composite(
    velocity: &VelocitySignal,
    device: &DeviceSignal,
    merchant: &MerchantSignal,
    patterns: &PatternSignal,
    suspect: &TransactionRecord,
) -> (f64, Vec<String>) {
    let mut score = 0.0;
    let mut reasons = Vec::new();

    let avg = velocity.daily_avg;
    if avg > 0.0 && velocity.txns_24h as f64 > 3.0 * avg {
        score += 25.0;
        reasons.push(format!(
            "velocity: {} transactions in 24h vs {:.1}/day average",
            velocity.txns_24h, avg
        ));
    } else if avg > 0.0 && velocity.txns_24h as f64 > 2.0 * avg {
        score += 15.0;
        reasons.push(format!(
            "velocity: {} transactions in 24h vs {:.1}/day average",
            velocity.txns_24h, avg
        ));
    }

    if velocity.amount_24h_minor > AMOUNT_24H_THRESHOLD {
        score += 20.0;
        reasons.push("velocity: 24h spend above $1,000".to_string());
    }

    if device.new_device {
        score += 20.0;
        reasons.push("device not seen before for this customer".to_string());
    }
    if device.device_changes > MANY_DEVICES as i64 {
        score += 10.0;
        reasons.push(format!(
            "device churn: {} distinct devices in 90 days",
            device.device_changes
        ));
    }

    score += 0.5 * merchant.risk_score;
    if merchant.high_risk_mcc {
        reasons.push(format!("merchant in high-risk category {}", suspect.mcc));
    }
    if merchant.suspicious_name {
        reasons.push(format!("merchant name flagged: {}", suspect.merchant));
    }
    if merchant.new_merchant {
        reasons.push("first transaction at this merchant".to_string());
    }

    if patterns.unusual_time {
        score += 15.0;
        reasons.push("unusual transaction hour for this customer".to_string());
    }
    if patterns.unusual_location {
        score += 20.0;
        reasons.push("unusual location: country and city not seen before".to_string());
    }
    if patterns.velocity_spike {
        score += 25.0;
        reasons.push("amount spike versus recent transaction average".to_string());
    }

    if suspect.amount_minor > LARGE_AMOUNT {
        score += 15.0;
        reasons.push("amount above $500".to_string());
    }
    if suspect.amount_minor > VERY_LARGE_AMOUNT {
        score += 10.0;
        reasons.push("amount above $1,000".to_string());
    }

    (score.clamp(0.0, 100.0), reasons)
}
