//! Recent-transactions step — the last 30 days of activity, newest first.
//!
//! Critical: every later step consumes this output.

use crate::agent::{Step, StepContext, StepDetail, TriageAgent};
use crate::error::TriageResult;
use crate::store::{TransactionRecord, TriageStore};
use chrono::Duration;
use serde::{Deserialize, Serialize};

const LOOKBACK_DAYS: i64 = 30;
const MAX_TRANSACTIONS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentTxDetail {
    pub transactions: Vec<TransactionRecord>,
    pub count: usize,
    pub window_days: i64,
}

pub struct RecentTxAgent {
    store: TriageStore,
}

impl RecentTxAgent {
    pub fn new(store: TriageStore) -> Self {
        Self { store }
    }
}

impl TriageAgent for RecentTxAgent {
    fn step(&self) -> Step {
        Step::RecentTx
    }

    fn run(&self, ctx: &StepContext) -> TriageResult<StepDetail> {
        let since = ctx.now - Duration::days(LOOKBACK_DAYS);
        let transactions = self.store.transactions_since(
            &ctx.alert.customer_id,
            &since,
            MAX_TRANSACTIONS,
        )?;
        let count = transactions.len();

        Ok(StepDetail::RecentTx(RecentTxDetail {
            transactions,
            count,
            window_days: LOOKBACK_DAYS,
        }))
    }
}
