//! KB-lookup step — retrieves guidance documents for the risk reasons.

use crate::agent::{Step, StepContext, StepDetail, TriageAgent};
use crate::error::TriageResult;
use crate::kb::KbRetriever;

pub struct KbLookupAgent {
    retriever: KbRetriever,
}

impl KbLookupAgent {
    pub fn new(retriever: KbRetriever) -> Self {
        Self { retriever }
    }
}

impl TriageAgent for KbLookupAgent {
    fn step(&self) -> Step {
        Step::KbLookup
    }

    fn run(&self, ctx: &StepContext) -> TriageResult<StepDetail> {
        let reasons = ctx
            .risk_signals
            .as_ref()
            .map(|s| s.reasons.clone())
            .unwrap_or_default();
        Ok(StepDetail::KbLookup(self.retriever.search_reasons(&reasons)))
    }
}
