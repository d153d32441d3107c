//! Decide step — folds the risk score and a customer-profile heuristic
//! into the final level and a calibrated confidence.

use crate::agent::{Step, StepContext, StepDetail, TriageAgent};
use crate::error::TriageResult;
use crate::store::TriageStore;
use crate::types::{Cents, RiskLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Constants ────────────────────────────────────────────────────────────────

const BASE_CONFIDENCE: f64 = 70.0;
const MAX_CONFIDENCE: f64 = 95.0;
const MANY_REASONS: usize = 3;

// 30-day spend heuristics (minor units).
const HIGH_TIER_TOTAL: Cents = 2_500_000; // $25k
const HIGH_TIER_AVG: Cents = 100_000; // $1,000
const ELEVATED_TIER_TOTAL: Cents = 500_000; // $5k
const ELEVATED_TIER_AVG: Cents = 25_000; // $250
const HIGH_VALUE_AVG: Cents = 50_000; // $500
const HIGH_FREQUENCY_COUNT: usize = 90; // 3/day over 30 days
const CONCENTRATION_SHARE: f64 = 0.5;
const CONCENTRATION_MIN_TXNS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountTier {
    Standard,
    Elevated,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendPattern {
    Regular,
    Concentrated,
    HighFrequency,
    HighValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionDetail {
    pub level: RiskLevel,
    pub confidence: f64,
    pub tier: AccountTier,
    pub pattern: SpendPattern,
    pub key_factors: Vec<String>,
    pub summary: String,
    pub recommendations: Vec<String>,
}

pub struct DecideAgent {
    store: TriageStore,
}

impl DecideAgent {
    pub fn new(store: TriageStore) -> Self {
        Self { store }
    }
}

impl TriageAgent for DecideAgent {
    fn step(&self) -> Step {
        Step::Decide
    }

    fn run(&self, ctx: &StepContext) -> TriageResult<StepDetail> {
        let (score, reasons) = match ctx.risk_signals.as_ref() {
            Some(signals) => (signals.score, signals.reasons.clone()),
            None => (0.0, Vec::new()),
        };

        let (tier, pattern) = profile_heuristics(ctx);

        let mut level = RiskLevel::for_score(score);
        let mut key_factors = reasons.clone();
        if tier == AccountTier::High && level == RiskLevel::Medium {
            level = RiskLevel::High;
            key_factors.push("escalated: high-exposure account tier".to_string());
        }

        let prior_alerts = self
            .store
            .prior_alert_count(&ctx.alert.customer_id, &ctx.alert.id, &ctx.alert.created_at)
            .unwrap_or(0);

        let mut confidence = BASE_CONFIDENCE;
        if reasons.len() > MANY_REASONS {
            confidence += 15.0;
        }
        if prior_alerts == 0 {
            confidence += 10.0;
        }
        if pattern == SpendPattern::Regular {
            confidence += 5.0;
        }
        let confidence = confidence.min(MAX_CONFIDENCE);

        let summary = format!(
            "{} risk (score {score:.0}) for a {} tier customer with a {} spend pattern",
            level.as_str(),
            tier_name(tier),
            pattern_name(pattern),
        );

        let recommendations = recommendations_for(level);

        Ok(StepDetail::Decision(DecisionDetail {
            level,
            confidence,
            tier,
            pattern,
            key_factors,
            summary,
            recommendations,
        }))
    }
}

/// Tier and spend pattern from the 30-day transaction window.
fn profile_heuristics(ctx: &StepContext) -> (AccountTier, SpendPattern) {
    let Some(recent) = ctx.recent_tx.as_ref() else {
        return (AccountTier::Standard, SpendPattern::Regular);
    };
    let txns = &recent.transactions;
    if txns.is_empty() {
        return (AccountTier::Standard, SpendPattern::Regular);
    }

    let total: Cents = txns.iter().map(|t| t.amount_minor).sum();
    let avg = total / txns.len() as i64;

    let tier = if total > HIGH_TIER_TOTAL || avg > HIGH_TIER_AVG {
        AccountTier::High
    } else if total > ELEVATED_TIER_TOTAL || avg > ELEVATED_TIER_AVG {
        AccountTier::Elevated
    } else {
        AccountTier::Standard
    };

    let mut merchant_totals: HashMap<&str, Cents> = HashMap::new();
    for t in txns {
        *merchant_totals.entry(t.merchant.as_str()).or_default() += t.amount_minor;
    }
    let top_share = merchant_totals
        .values()
        .copied()
        .max()
        .map(|top| top as f64 / total.max(1) as f64)
        .unwrap_or(0.0);

    let pattern = if avg > HIGH_VALUE_AVG {
        SpendPattern::HighValue
    } else if txns.len() >= HIGH_FREQUENCY_COUNT {
        SpendPattern::HighFrequency
    } else if txns.len() >= CONCENTRATION_MIN_TXNS && top_share >= CONCENTRATION_SHARE {
        SpendPattern::Concentrated
    } else {
        SpendPattern::Regular
    };

    (tier, pattern)
}

fn recommendations_for(level: RiskLevel) -> Vec<String> {
    match level {
        RiskLevel::High => vec![
            "Freeze the card pending customer verification".to_string(),
            "Review the last 24 hours of authorizations".to_string(),
        ],
        RiskLevel::Medium => vec![
            "Open a dispute for the suspect transaction".to_string(),
            "Confirm recent activity with the customer".to_string(),
        ],
        RiskLevel::Low => vec![
            "Mark the alert as a false positive if the customer confirms".to_string(),
        ],
    }
}

fn tier_name(tier: AccountTier) -> &'static str {
    match tier {
        AccountTier::Standard => "standard",
        AccountTier::Elevated => "elevated",
        AccountTier::High => "high-exposure",
    }
}

fn pattern_name(pattern: SpendPattern) -> &'static str {
    match pattern {
        SpendPattern::Regular => "regular",
        SpendPattern::Concentrated => "concentrated",
        SpendPattern::HighFrequency => "high-frequency",
        SpendPattern::HighValue => "high-value",
    }
}
