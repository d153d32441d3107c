//! Propose-action step — maps the risk suggestion to a concrete action and
//! evaluates the six compliance checks in priority order.
//!
//! The proposal is advisory: the action executor re-enforces the OTP and
//! role gates when an action is actually applied.

use crate::agent::{Step, StepContext, StepDetail, TriageAgent};
use crate::cache::RateLimiter;
use crate::config::EngineConfig;
use crate::error::TriageResult;
use crate::store::TriageStore;
use crate::types::{ActionSuggestion, KycLevel, RecommendedAction, RiskLevel, Role};
use chrono::{Datelike, Duration, Timelike, Weekday};
use serde::{Deserialize, Serialize};

const OTP_DISPUTE_SCORE: f64 = 70.0;
const ESCALATION_SCORE: f64 = 80.0;
const ESCALATION_CONFIDENCE: f64 = 60.0;
const BUSINESS_OPEN_HOUR: u32 = 9;
const BUSINESS_CLOSE_HOUR: u32 = 17;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCheck {
    pub code: String,
    pub passed: bool,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalDetail {
    pub action: RecommendedAction,
    pub approved: bool,
    pub blocked_by: Option<String>,
    pub requires_otp: bool,
    pub checks: Vec<PolicyCheck>,
}

pub struct ProposeActionAgent {
    store: TriageStore,
    limiter: RateLimiter,
    config: EngineConfig,
}

impl ProposeActionAgent {
    pub fn new(store: TriageStore, limiter: RateLimiter, config: EngineConfig) -> Self {
        Self {
            store,
            limiter,
            config,
        }
    }

    fn check_role(&self, action: RecommendedAction, role: Role) -> PolicyCheck {
        let passed = action != RecommendedAction::FreezeCard || role == Role::Lead;
        PolicyCheck {
            code: "role_authorization".to_string(),
            passed,
            note: if passed {
                format!("{} permitted for role {}", action.as_str(), role.as_str())
            } else {
                "freeze_card requires the lead role".to_string()
            },
        }
    }

    fn check_amount(&self, action: RecommendedAction, ctx: &StepContext) -> PolicyCheck {
        let amount = ctx.suspect_txn.amount_minor;
        let (passed, note) = match action {
            RecommendedAction::FreezeCard if amount > self.config.freeze_amount_limit => (
                false,
                format!(
                    "freeze_card blocked: amount {} above limit {}",
                    amount, self.config.freeze_amount_limit
                ),
            ),
            RecommendedAction::OpenDispute if amount > self.config.dispute_amount_limit => (
                false,
                format!(
                    "open_dispute blocked: amount {} above limit {}",
                    amount, self.config.dispute_amount_limit
                ),
            ),
            _ => (true, "amount within limits".to_string()),
        };
        PolicyCheck {
            code: "amount_limits".to_string(),
            passed,
            note,
        }
    }

    fn check_customer_status(&self, ctx: &StepContext) -> PolicyCheck {
        let kyc = ctx
            .profile
            .as_ref()
            .map(|p| p.customer.kyc_level)
            .unwrap_or(KycLevel::Pending);
        let passed = kyc != KycLevel::Restricted;
        PolicyCheck {
            code: "customer_status".to_string(),
            passed,
            note: if passed {
                format!("kyc level {}", kyc.as_str())
            } else {
                "customer is KYC-restricted: write actions blocked".to_string()
            },
        }
    }

    fn check_rate(&self, action: RecommendedAction, ctx: &StepContext) -> PolicyCheck {
        let key = format!("{}:{}", ctx.client_id, action.as_str());
        match self.limiter.check(&key) {
            Ok(_) => PolicyCheck {
                code: "rate_limits".to_string(),
                passed: true,
                note: "within per-user action budget".to_string(),
            },
            Err(err) => PolicyCheck {
                code: "rate_limits".to_string(),
                passed: false,
                note: err.to_string(),
            },
        }
    }

    fn check_business_hours(
        &self,
        action: RecommendedAction,
        role: Role,
        ctx: &StepContext,
    ) -> PolicyCheck {
        if action != RecommendedAction::FreezeCard || role == Role::Lead {
            return PolicyCheck {
                code: "business_hours".to_string(),
                passed: true,
                note: "not restricted".to_string(),
            };
        }
        let local = ctx.now + Duration::minutes(self.config.business_hours_utc_offset_min as i64);
        let weekday_ok = !matches!(local.weekday(), Weekday::Sat | Weekday::Sun);
        let hour_ok = local.hour() >= BUSINESS_OPEN_HOUR && local.hour() < BUSINESS_CLOSE_HOUR;
        let passed = weekday_ok && hour_ok;
        PolicyCheck {
            code: "business_hours".to_string(),
            passed,
            note: if passed {
                "within business hours".to_string()
            } else {
                "freeze_card outside Mon-Fri 09:00-17:00 requires a lead override".to_string()
            },
        }
    }

    fn check_escalation(&self, score: f64, confidence: f64, role: Role) -> PolicyCheck {
        let blocked = score >= ESCALATION_SCORE
            && confidence < ESCALATION_CONFIDENCE
            && role == Role::Agent;
        PolicyCheck {
            code: "escalation".to_string(),
            passed: !blocked,
            note: if blocked {
                "high score with low confidence requires lead review".to_string()
            } else {
                "no escalation required".to_string()
            },
        }
    }
}

impl TriageAgent for ProposeActionAgent {
    fn step(&self) -> Step {
        Step::ProposeAction
    }

    fn run(&self, ctx: &StepContext) -> TriageResult<StepDetail> {
        let score = ctx.risk_signals.as_ref().map(|s| s.score).unwrap_or(0.0);
        let level = ctx
            .decision
            .as_ref()
            .map(|d| d.level)
            .unwrap_or_else(|| RiskLevel::for_score(score));
        let confidence = ctx
            .decision
            .as_ref()
            .map(|d| d.confidence)
            .unwrap_or(0.0);
        let suggestion = ctx.risk_signals.as_ref().and_then(|s| s.suggestion);

        let action = resolve_action(suggestion, level);

        let checks = vec![
            self.check_role(action, ctx.role),
            self.check_amount(action, ctx),
            self.check_customer_status(ctx),
            self.check_rate(action, ctx),
            self.check_business_hours(action, ctx.role, ctx),
            self.check_escalation(score, confidence, ctx.role),
        ];

        let blocked_by = checks.iter().find(|c| !c.passed).map(|c| c.code.clone());
        if let Some(code) = &blocked_by {
            // Attach the governing policy text when the table has it.
            if let Ok(Some(policy)) = self.store.policy_by_code(code) {
                log::info!(
                    "run={} action {} blocked by policy '{}'",
                    ctx.run_id,
                    action.as_str(),
                    policy.title
                );
            }
        }

        let requires_otp = action == RecommendedAction::FreezeCard
            || (action == RecommendedAction::OpenDispute && score >= OTP_DISPUTE_SCORE);

        Ok(StepDetail::Proposal(ProposalDetail {
            action,
            approved: blocked_by.is_none(),
            blocked_by,
            requires_otp,
            checks,
        }))
    }
}

/// Map the scorer's suggestion to a concrete action. `monitor` resolves by
/// decided level: medium contacts the customer, low marks a false positive.
fn resolve_action(suggestion: Option<ActionSuggestion>, level: RiskLevel) -> RecommendedAction {
    match suggestion {
        Some(ActionSuggestion::FreezeCard) => RecommendedAction::FreezeCard,
        Some(ActionSuggestion::OpenDispute) => RecommendedAction::OpenDispute,
        Some(ActionSuggestion::Monitor) | None => match level {
            RiskLevel::High => RecommendedAction::FreezeCard,
            RiskLevel::Medium => RecommendedAction::ContactCustomer,
            RiskLevel::Low => RecommendedAction::MarkFalsePositive,
        },
    }
}
