//! Profile step — loads the customer with their cards and accounts.
//!
//! Critical: without a profile there is nothing to triage against, so a
//! failure here aborts the run.

use crate::agent::{Step, StepContext, StepDetail, TriageAgent};
use crate::error::{TriageError, TriageResult};
use crate::store::{AccountRecord, CardRecord, CustomerRecord, TriageStore};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileDetail {
    pub customer: CustomerRecord,
    pub cards: Vec<CardRecord>,
    pub accounts: Vec<AccountRecord>,
}

pub struct ProfileAgent {
    store: TriageStore,
}

impl ProfileAgent {
    pub fn new(store: TriageStore) -> Self {
        Self { store }
    }
}

impl TriageAgent for ProfileAgent {
    fn step(&self) -> Step {
        Step::GetProfile
    }

    fn run(&self, ctx: &StepContext) -> TriageResult<StepDetail> {
        let customer_id = &ctx.alert.customer_id;
        let customer = self
            .store
            .get_customer(customer_id)?
            .ok_or_else(|| TriageError::not_found("customer", customer_id))?;
        let cards = self.store.cards_for_customer(customer_id)?;
        let accounts = self.store.accounts_for_customer(customer_id)?;

        Ok(StepDetail::Profile(ProfileDetail {
            customer,
            cards,
            accounts,
        }))
    }
}
