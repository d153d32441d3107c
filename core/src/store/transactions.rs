//! Transaction records: immutable after insert, deduplicated on
//! `(customer_id, merchant, amount_minor, ts)`, keyset-paginated.

use super::{parse_ts, ts_to_sql, TriageStore};
use crate::error::TriageResult;
use crate::types::{Cents, EntityId};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: EntityId,
    pub customer_id: EntityId,
    pub card_id: EntityId,
    pub mcc: String,
    pub merchant: String,
    pub amount_minor: Cents,
    pub currency: String,
    pub ts: DateTime<Utc>,
    pub device_id: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

impl TriageStore {
    /// Insert one transaction. Returns false when the dedup key already
    /// exists (the row is left untouched).
    pub fn insert_transaction(&self, t: &TransactionRecord) -> TriageResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO transactions
                    (txn_id, customer_id, card_id, mcc, merchant, amount_minor,
                     currency, ts, device_id, country, city)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    t.id,
                    t.customer_id,
                    t.card_id,
                    t.mcc,
                    t.merchant,
                    t.amount_minor,
                    t.currency,
                    ts_to_sql(&t.ts),
                    t.device_id,
                    t.country,
                    t.city
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_transaction(&self, txn_id: &str) -> TriageResult<Option<TransactionRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {TXN_COLS} FROM transactions WHERE txn_id = ?1"),
                params![txn_id],
                txn_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Transactions for a customer with `ts >= since`, newest first, capped.
    pub fn transactions_since(
        &self,
        customer_id: &str,
        since: &DateTime<Utc>,
        cap: usize,
    ) -> TriageResult<Vec<TransactionRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TXN_COLS} FROM transactions
                 WHERE customer_id = ?1 AND ts >= ?2
                 ORDER BY ts DESC, txn_id DESC LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![customer_id, ts_to_sql(since), cap as i64], txn_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    /// Transactions in `[since, until]`, newest first, capped.
    pub fn transactions_between(
        &self,
        customer_id: &str,
        since: &DateTime<Utc>,
        until: &DateTime<Utc>,
        cap: usize,
    ) -> TriageResult<Vec<TransactionRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TXN_COLS} FROM transactions
                 WHERE customer_id = ?1 AND ts >= ?2 AND ts <= ?3
                 ORDER BY ts DESC, txn_id DESC LIMIT ?4"
            ))?;
            let rows = stmt.query_map(
                params![customer_id, ts_to_sql(since), ts_to_sql(until), cap as i64],
                txn_row,
            )?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    /// Keyset page: rows strictly after the `(ts, id)` cursor position in
    /// `(ts DESC, txn_id DESC)` order.
    pub fn transactions_page(
        &self,
        customer_id: &str,
        after: Option<(&str, &DateTime<Utc>)>,
        limit: usize,
    ) -> TriageResult<Vec<TransactionRecord>> {
        self.with_conn(|conn| {
            let rows = match after {
                Some((last_id, last_ts)) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {TXN_COLS} FROM transactions
                         WHERE customer_id = ?1
                           AND (ts < ?2 OR (ts = ?2 AND txn_id < ?3))
                         ORDER BY ts DESC, txn_id DESC LIMIT ?4"
                    ))?;
                    let mapped = stmt.query_map(
                        params![customer_id, ts_to_sql(last_ts), last_id, limit as i64],
                        txn_row,
                    )?;
                    mapped.collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {TXN_COLS} FROM transactions
                         WHERE customer_id = ?1
                         ORDER BY ts DESC, txn_id DESC LIMIT ?2"
                    ))?;
                    let mapped = stmt.query_map(params![customer_id, limit as i64], txn_row)?;
                    mapped.collect::<Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })
    }

    pub fn transaction_count(&self, customer_id: &str) -> TriageResult<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM transactions WHERE customer_id = ?1",
                params![customer_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
        })
    }
}

const TXN_COLS: &str = "txn_id, customer_id, card_id, mcc, merchant, amount_minor, \
                        currency, ts, device_id, country, city";

fn txn_row(row: &Row<'_>) -> rusqlite::Result<TransactionRecord> {
    Ok(TransactionRecord {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        card_id: row.get(2)?,
        mcc: row.get(3)?,
        merchant: row.get(4)?,
        amount_minor: row.get(5)?,
        currency: row.get(6)?,
        ts: parse_ts(7, row.get(7)?)?,
        device_id: row.get(8)?,
        country: row.get(9)?,
        city: row.get(10)?,
    })
}
