//! Step-agent contract and shared step types.
//!
//! RULE: every pipeline step implements `TriageAgent`. The orchestrator
//! invokes agents through a dispatch map keyed by step, under a deadline;
//! agents never call each other and read earlier results only through the
//! `StepContext` the orchestrator threads forward.

use crate::decide_agent::DecisionDetail;
use crate::error::TriageResult;
use crate::kb::KbLookup;
use crate::profile_agent::ProfileDetail;
use crate::propose_action_agent::ProposalDetail;
use crate::recent_tx_agent::RecentTxDetail;
use crate::risk_signals_agent::RiskSignalsDetail;
use crate::store::{AlertRecord, TransactionRecord};
use crate::summarizer_agent::SummaryDetail;
use crate::types::{Role, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline steps. `PLAN` is the fixed execution order; `Summarize` runs
/// after the decision, outside the plan, and is never traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    GetProfile,
    RecentTx,
    RiskSignals,
    KbLookup,
    Decide,
    ProposeAction,
    Summarize,
}

impl Step {
    pub const PLAN: [Step; 6] = [
        Step::GetProfile,
        Step::RecentTx,
        Step::RiskSignals,
        Step::KbLookup,
        Step::Decide,
        Step::ProposeAction,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetProfile => "get_profile",
            Self::RecentTx => "recent_tx",
            Self::RiskSignals => "risk_signals",
            Self::KbLookup => "kb_lookup",
            Self::Decide => "decide",
            Self::ProposeAction => "propose_action",
            Self::Summarize => "summarize",
        }
    }

    /// Critical steps abort the run on failure instead of falling back.
    pub fn critical(&self) -> bool {
        matches!(self, Self::GetProfile | Self::RecentTx)
    }
}

/// Everything an agent may read: the request, the suspect transaction, and
/// the results of earlier steps (real or substituted).
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: RunId,
    pub role: Role,
    pub client_id: String,
    pub alert: AlertRecord,
    pub suspect_txn: TransactionRecord,
    pub now: DateTime<Utc>,
    pub profile: Option<ProfileDetail>,
    pub recent_tx: Option<RecentTxDetail>,
    pub risk_signals: Option<RiskSignalsDetail>,
    pub kb: Option<KbLookup>,
    pub decision: Option<DecisionDetail>,
    pub proposal: Option<ProposalDetail>,
}

impl StepContext {
    /// Fold a completed step's result back into the context.
    pub fn absorb(&mut self, detail: &StepDetail) {
        match detail {
            StepDetail::Profile(d) => self.profile = Some(d.clone()),
            StepDetail::RecentTx(d) => self.recent_tx = Some(d.clone()),
            StepDetail::RiskSignals(d) => self.risk_signals = Some(d.clone()),
            StepDetail::KbLookup(d) => self.kb = Some(d.clone()),
            StepDetail::Decision(d) => self.decision = Some(d.clone()),
            StepDetail::Proposal(d) => self.proposal = Some(d.clone()),
            StepDetail::Summary(_)
            | StepDetail::Fallback { .. }
            | StepDetail::CircuitOpen {}
            | StepDetail::Failed { .. } => {}
        }
    }
}

/// Tagged result variant per step. The same value is serialized into the
/// persisted trace and the `tool_update` stream payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepDetail {
    Profile(ProfileDetail),
    RecentTx(RecentTxDetail),
    RiskSignals(RiskSignalsDetail),
    KbLookup(KbLookup),
    Decision(DecisionDetail),
    Proposal(ProposalDetail),
    Summary(SummaryDetail),
    Fallback { reason: String },
    CircuitOpen {},
    Failed { message: String },
}

/// The deterministic substitute for a failed non-critical step.
pub fn fallback_for(step: Step) -> StepDetail {
    match step {
        Step::RiskSignals => StepDetail::RiskSignals(RiskSignalsDetail::fallback()),
        Step::KbLookup => StepDetail::KbLookup(KbLookup {
            results: Vec::new(),
            citations: vec!["Fallback: Manual review recommended".to_string()],
        }),
        _ => StepDetail::Fallback {
            reason: "Service unavailable".to_string(),
        },
    }
}

/// The contract every step agent fulfills. `run` must do bounded work: the
/// orchestrator enforces the deadline but abandons, not interrupts.
pub trait TriageAgent: Send + Sync {
    fn step(&self) -> Step;

    fn run(&self, ctx: &StepContext) -> TriageResult<StepDetail>;
}
