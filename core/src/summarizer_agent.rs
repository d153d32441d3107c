//! Summarizer — deterministic narrative templates per decided action.
//!
//! Runs after the decision, best-effort and untraced: a failure here falls
//! back to a fixed template and never affects the decision.

use crate::agent::{Step, StepContext, StepDetail, TriageAgent};
use crate::error::TriageResult;
use crate::types::{RecommendedAction, RiskLevel};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryDetail {
    pub customer_message: String,
    pub internal_note: String,
    pub risk_summary: String,
    pub action_summary: String,
    pub next_steps: Vec<String>,
}

impl SummaryDetail {
    /// Fixed fallback when summarization fails.
    pub fn fallback() -> Self {
        Self {
            customer_message: "We are reviewing recent activity on your account and will \
                               contact you if anything is needed."
                .to_string(),
            internal_note: "Summary unavailable; consult the run traces.".to_string(),
            risk_summary: "See persisted risk signals.".to_string(),
            action_summary: "Manual review recommended.".to_string(),
            next_steps: vec!["Review the triage run manually".to_string()],
        }
    }
}

pub struct SummarizerAgent;

impl TriageAgent for SummarizerAgent {
    fn step(&self) -> Step {
        Step::Summarize
    }

    fn run(&self, ctx: &StepContext) -> TriageResult<StepDetail> {
        let level = ctx
            .decision
            .as_ref()
            .map(|d| d.level)
            .unwrap_or(RiskLevel::Low);
        let action = ctx
            .proposal
            .as_ref()
            .map(|p| p.action)
            .unwrap_or(RecommendedAction::MarkFalsePositive);
        let score = ctx.risk_signals.as_ref().map(|s| s.score).unwrap_or(0.0);
        let merchant = &ctx.suspect_txn.merchant;

        let (customer_message, action_summary, next_steps) = match action {
            RecommendedAction::FreezeCard => (
                format!(
                    "For your protection we are placing a temporary hold on your card \
                     after a charge at {merchant}. Please verify this transaction."
                ),
                "Freeze the card pending verification".to_string(),
                vec![
                    "Issue a one-time passcode to the customer".to_string(),
                    "Freeze the card once verified".to_string(),
                    "Reissue the card if fraud is confirmed".to_string(),
                ],
            ),
            RecommendedAction::OpenDispute => (
                format!(
                    "We flagged a charge at {merchant} on your account. We are opening a \
                     dispute and will keep you informed."
                ),
                "Open a dispute for the suspect charge".to_string(),
                vec![
                    "Open the dispute case".to_string(),
                    "Request supporting documents from the merchant".to_string(),
                ],
            ),
            RecommendedAction::ContactCustomer => (
                format!(
                    "We noticed unusual activity involving a charge at {merchant}. \
                     Please contact us to confirm it was you."
                ),
                "Contact the customer to confirm the charge".to_string(),
                vec!["Reach the customer on their verified channel".to_string()],
            ),
            RecommendedAction::MarkFalsePositive => (
                "Recent activity on your account was reviewed and no action is needed."
                    .to_string(),
                "Close the alert as a false positive".to_string(),
                vec!["Close the alert".to_string()],
            ),
        };

        let risk_summary = format!("Composite risk {score:.0}, classified {}", level.as_str());
        let internal_note = format!(
            "Alert {} triaged as {}; recommended {}",
            ctx.alert.id,
            level.as_str(),
            action.as_str()
        );

        Ok(StepDetail::Summary(SummaryDetail {
            customer_message,
            internal_note,
            risk_summary,
            action_summary,
            next_steps,
        }))
    }
}
