//! Customer, card and account records.

use super::{parse_ts, ts_to_sql, TriageStore};
use crate::error::TriageResult;
use crate::types::{CardStatus, Cents, EntityId, KycLevel};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRecord {
    #[serde(rename = "customer_id")]
    pub id: EntityId,
    pub name: String,
    pub email_masked: String,
    pub kyc_level: KycLevel,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardRecord {
    pub id: EntityId,
    pub customer_id: EntityId,
    pub last4: String,
    pub network: String,
    pub status: CardStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: EntityId,
    pub customer_id: EntityId,
    pub balance_minor: Cents,
    pub currency: String,
}

impl TriageStore {
    pub fn insert_customer(&self, c: &CustomerRecord) -> TriageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO customer (customer_id, name, email_masked, kyc_level, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![c.id, c.name, c.email_masked, c.kyc_level, ts_to_sql(&c.created_at)],
            )?;
            Ok(())
        })
    }

    pub fn get_customer(&self, customer_id: &str) -> TriageResult<Option<CustomerRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT customer_id, name, email_masked, kyc_level, created_at
                 FROM customer WHERE customer_id = ?1",
                params![customer_id],
                |row| {
                    Ok(CustomerRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email_masked: row.get(2)?,
                        kyc_level: row.get(3)?,
                        created_at: parse_ts(4, row.get(4)?)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn insert_card(&self, card: &CardRecord) -> TriageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO card (card_id, customer_id, last4, network, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    card.id,
                    card.customer_id,
                    card.last4,
                    card.network,
                    card.status,
                    ts_to_sql(&card.created_at)
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_card(&self, card_id: &str) -> TriageResult<Option<CardRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT card_id, customer_id, last4, network, status, created_at
                 FROM card WHERE card_id = ?1",
                params![card_id],
                card_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn cards_for_customer(&self, customer_id: &str) -> TriageResult<Vec<CardRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT card_id, customer_id, last4, network, status, created_at
                 FROM card WHERE customer_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![customer_id], card_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    pub fn set_card_status(&self, card_id: &str, status: CardStatus) -> TriageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE card SET status = ?1 WHERE card_id = ?2",
                params![status, card_id],
            )?;
            Ok(())
        })
    }

    pub fn insert_account(&self, account: &AccountRecord) -> TriageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO account (account_id, customer_id, balance_minor, currency)
                 VALUES (?1, ?2, ?3, ?4)",
                params![account.id, account.customer_id, account.balance_minor, account.currency],
            )?;
            Ok(())
        })
    }

    pub fn accounts_for_customer(&self, customer_id: &str) -> TriageResult<Vec<AccountRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT account_id, customer_id, balance_minor, currency
                 FROM account WHERE customer_id = ?1",
            )?;
            let rows = stmt.query_map(params![customer_id], |row| {
                Ok(AccountRecord {
                    id: row.get(0)?,
                    customer_id: row.get(1)?,
                    balance_minor: row.get(2)?,
                    currency: row.get(3)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }
}

fn card_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CardRecord> {
    Ok(CardRecord {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        last4: row.get(2)?,
        network: row.get(3)?,
        status: row.get(4)?,
        created_at: parse_ts(5, row.get(5)?)?,
    })
}
