//! Action executor — applies triage decisions to the world.
//!
//! Every operation is idempotent under a client-chosen idempotency key, and
//! every multi-write commits inside a single store transaction. Card
//! freezes are OTP-gated; a lead-role override may bypass the passcode.

use crate::cache::{IdempotencyCache, OtpStore};
use crate::clock::SharedClock;
use crate::error::{TriageError, TriageResult};
use crate::redactor::redact_json;
use crate::store::{CaseEventRecord, CaseRecord, TriageStore};
use crate::types::{AlertStatus, CardStatus, CaseStatus, CaseType, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FreezeStatus {
    Frozen,
    PendingOtp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeOutcome {
    pub status: FreezeStatus,
    pub card_id: String,
    pub case_id: Option<String>,
    pub alert_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub case_id: String,
    pub case_type: CaseType,
    pub status: CaseStatus,
    pub alert_id: Option<String>,
}

#[derive(Clone)]
pub struct ActionExecutor {
    store: TriageStore,
    otp: OtpStore,
    idempotency: IdempotencyCache,
    clock: SharedClock,
}

impl ActionExecutor {
    pub fn new(
        store: TriageStore,
        otp: OtpStore,
        idempotency: IdempotencyCache,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            otp,
            idempotency,
            clock,
        }
    }

    /// Freeze a card. Already-frozen cards return idempotent success; a
    /// missing OTP issues one and reports `PENDING_OTP` without touching
    /// state, unless a lead override applies.
    pub fn freeze_card(
        &self,
        card_id: &str,
        alert_id: Option<&str>,
        otp: Option<&str>,
        role: Role,
        actor: &str,
        idempotency_key: Option<&str>,
    ) -> TriageResult<FreezeOutcome> {
        let correlation_id = Uuid::new_v4().to_string();
        self.with_idempotency("freeze_card", idempotency_key, || {
            let card = self
                .store
                .get_card(card_id)?
                .ok_or_else(|| TriageError::not_found("card", card_id))?;

            if card.status == CardStatus::Frozen {
                log::info!("[{correlation_id}] freeze_card {card_id}: already frozen");
                return Ok(FreezeOutcome {
                    status: FreezeStatus::Frozen,
                    card_id: card_id.to_string(),
                    case_id: None,
                    alert_id: alert_id.map(str::to_string),
                });
            }
            if card.status == CardStatus::Expired {
                return Err(TriageError::Conflict {
                    message: format!("card {card_id} is expired"),
                    existing_id: None,
                });
            }

            let lead_override = match otp {
                Some(code) => {
                    self.otp.verify(card_id, code)?;
                    false
                }
                None if role == Role::Lead => {
                    log::info!("[{correlation_id}] freeze_card {card_id}: lead override by {actor}");
                    true
                }
                None => {
                    self.otp.issue(card_id)?;
                    log::info!("[{correlation_id}] freeze_card {card_id}: OTP issued, pending");
                    return Ok(FreezeOutcome {
                        status: FreezeStatus::PendingOtp,
                        card_id: card_id.to_string(),
                        case_id: None,
                        alert_id: alert_id.map(str::to_string),
                    });
                }
            };

            let suspect_txn_id = match alert_id {
                Some(id) => self.store.get_alert(id)?.map(|a| a.suspect_txn_id),
                None => None,
            };

            let now = self.clock.now();
            let case = CaseRecord {
                id: Uuid::new_v4().to_string(),
                customer_id: card.customer_id.clone(),
                txn_id: suspect_txn_id,
                case_type: CaseType::CardFreeze,
                status: CaseStatus::Open,
                reason_code: "CARD_FROZEN".to_string(),
                created_at: now,
            };
            let event = CaseEventRecord {
                case_id: case.id.clone(),
                actor: actor.to_string(),
                action: "CARD_FROZEN".to_string(),
                ts: now,
                payload: serde_json::json!({
                    "card_id": card_id,
                    "alert_id": alert_id,
                    "lead_override": lead_override,
                })
                .to_string(),
            };

            self.store
                .apply_card_freeze(card_id, &case, &event, alert_id)?;
            log::info!("[{correlation_id}] freeze_card {card_id}: frozen, case {}", case.id);

            Ok(FreezeOutcome {
                status: FreezeStatus::Frozen,
                card_id: card_id.to_string(),
                case_id: Some(case.id),
                alert_id: alert_id.map(str::to_string),
            })
        })
    }

    /// Open a dispute for a transaction. An existing non-terminal dispute
    /// case for the same transaction is returned as-is.
    pub fn open_dispute(
        &self,
        txn_id: &str,
        reason_code: &str,
        actor: &str,
        idempotency_key: Option<&str>,
    ) -> TriageResult<CaseOutcome> {
        let correlation_id = Uuid::new_v4().to_string();
        self.with_idempotency("open_dispute", idempotency_key, || {
            if let Some(existing) = self.store.open_dispute_for_txn(txn_id)? {
                log::info!(
                    "[{correlation_id}] open_dispute {txn_id}: returning existing case {}",
                    existing.id
                );
                let alert = self.store.alert_for_txn(txn_id)?;
                return Ok(CaseOutcome {
                    case_id: existing.id,
                    case_type: existing.case_type,
                    status: existing.status,
                    alert_id: alert.map(|a| a.id),
                });
            }

            let txn = self
                .store
                .get_transaction(txn_id)?
                .ok_or_else(|| TriageError::not_found("transaction", txn_id))?;
            let alert = self.store.alert_for_txn(txn_id)?;
            let alert_id = alert.map(|a| a.id);

            let now = self.clock.now();
            let case = CaseRecord {
                id: Uuid::new_v4().to_string(),
                customer_id: txn.customer_id.clone(),
                txn_id: Some(txn_id.to_string()),
                case_type: CaseType::Dispute,
                status: CaseStatus::Open,
                reason_code: reason_code.to_string(),
                created_at: now,
            };
            let event = CaseEventRecord {
                case_id: case.id.clone(),
                actor: actor.to_string(),
                action: "DISPUTE_OPENED".to_string(),
                ts: now,
                payload: serde_json::json!({
                    "txn_id": txn_id,
                    "reason_code": reason_code,
                })
                .to_string(),
            };

            self.store.apply_case(
                &case,
                &event,
                alert_id.as_deref(),
                AlertStatus::InvestigatingDisputeOpened,
            )?;
            log::info!("[{correlation_id}] open_dispute {txn_id}: case {}", case.id);

            Ok(CaseOutcome {
                case_id: case.id,
                case_type: CaseType::Dispute,
                status: CaseStatus::Open,
                alert_id,
            })
        })
    }

    /// Record a customer contact and close the loop on the alert.
    pub fn contact_customer(
        &self,
        alert_id: &str,
        customer_id: &str,
        suspect_txn_id: Option<&str>,
        actor: &str,
        idempotency_key: Option<&str>,
    ) -> TriageResult<CaseOutcome> {
        self.close_out_alert(
            "contact_customer",
            alert_id,
            customer_id,
            suspect_txn_id,
            actor,
            idempotency_key,
            CaseType::ContactCustomer,
            CaseStatus::Closed,
            "CUSTOMER_CONTACTED",
            AlertStatus::Contacted,
        )
    }

    /// Close the alert as a false positive.
    pub fn mark_false_positive(
        &self,
        alert_id: &str,
        customer_id: &str,
        suspect_txn_id: Option<&str>,
        actor: &str,
        idempotency_key: Option<&str>,
    ) -> TriageResult<CaseOutcome> {
        self.close_out_alert(
            "mark_false_positive",
            alert_id,
            customer_id,
            suspect_txn_id,
            actor,
            idempotency_key,
            CaseType::FalsePositive,
            CaseStatus::ClosedFalsePositive,
            "MARKED_FALSE_POSITIVE",
            AlertStatus::ClosedFalsePositive,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn close_out_alert(
        &self,
        op: &'static str,
        alert_id: &str,
        customer_id: &str,
        suspect_txn_id: Option<&str>,
        actor: &str,
        idempotency_key: Option<&str>,
        case_type: CaseType,
        case_status: CaseStatus,
        action: &str,
        alert_status: AlertStatus,
    ) -> TriageResult<CaseOutcome> {
        let correlation_id = Uuid::new_v4().to_string();
        self.with_idempotency(op, idempotency_key, || {
            let alert = self
                .store
                .get_alert(alert_id)?
                .ok_or_else(|| TriageError::not_found("alert", alert_id))?;
            if alert.customer_id != customer_id {
                return Err(TriageError::validation(&["customer_id"]));
            }

            let now = self.clock.now();
            let case = CaseRecord {
                id: Uuid::new_v4().to_string(),
                customer_id: customer_id.to_string(),
                txn_id: suspect_txn_id
                    .map(str::to_string)
                    .or(Some(alert.suspect_txn_id.clone())),
                case_type,
                status: case_status,
                reason_code: action.to_string(),
                created_at: now,
            };
            let event = CaseEventRecord {
                case_id: case.id.clone(),
                actor: actor.to_string(),
                action: action.to_string(),
                ts: now,
                payload: serde_json::json!({ "alert_id": alert_id }).to_string(),
            };

            self.store
                .apply_case(&case, &event, Some(alert_id), alert_status)?;
            log::info!("[{correlation_id}] {op} alert={alert_id}: case {}", case.id);

            Ok(CaseOutcome {
                case_id: case.id,
                case_type,
                status: case_status,
                alert_id: Some(alert_id.to_string()),
            })
        })
    }

    /// Replay a cached response for `(op, key)` or run the operation and
    /// cache its redacted response. Errors are never cached.
    fn with_idempotency<T, F>(&self, op: &'static str, key: Option<&str>, f: F) -> TriageResult<T>
    where
        T: Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> TriageResult<T>,
    {
        if let Some(key) = key {
            if let Some(cached) = self.idempotency.replay(op, key) {
                if let Ok(out) = serde_json::from_str(&cached) {
                    log::info!("{op}: idempotent replay for key {}", mask_key(key));
                    return Ok(out);
                }
                log::warn!("{op}: unreadable cached response for key {}, re-executing", mask_key(key));
            }
        }

        let out = f()?;

        if let Some(key) = key {
            let (clean, _) = redact_json(serde_json::to_value(&out)?);
            self.idempotency.record(op, key, &clean.to_string());
        }
        Ok(out)
    }
}

fn mask_key(key: &str) -> String {
    crate::redactor::mask_customer_id(key)
}
