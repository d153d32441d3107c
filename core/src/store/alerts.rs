//! Fraud alerts and the alert listing used by the work queue.

use super::{parse_ts, ts_to_sql, TriageStore};
use crate::error::TriageResult;
use crate::types::{AlertStatus, Cents, EntityId, KycLevel, RiskLevel};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: EntityId,
    pub customer_id: EntityId,
    pub suspect_txn_id: EntityId,
    pub risk: RiskLevel,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}

/// One row of the alert work queue: the alert plus customer and
/// suspect-transaction summaries.
#[derive(Debug, Clone, Serialize)]
pub struct AlertListing {
    pub alert: AlertRecord,
    pub customer_name: String,
    pub customer_kyc: KycLevel,
    pub txn_merchant: String,
    pub txn_amount_minor: Cents,
    pub txn_ts: DateTime<Utc>,
}

impl TriageStore {
    pub fn insert_alert(&self, alert: &AlertRecord) -> TriageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO alert (alert_id, customer_id, suspect_txn_id, risk, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    alert.id,
                    alert.customer_id,
                    alert.suspect_txn_id,
                    alert.risk,
                    alert.status,
                    ts_to_sql(&alert.created_at)
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_alert(&self, alert_id: &str) -> TriageResult<Option<AlertRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT alert_id, customer_id, suspect_txn_id, risk, status, created_at
                 FROM alert WHERE alert_id = ?1",
                params![alert_id],
                alert_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn alert_for_txn(&self, txn_id: &str) -> TriageResult<Option<AlertRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT alert_id, customer_id, suspect_txn_id, risk, status, created_at
                 FROM alert WHERE suspect_txn_id = ?1
                 ORDER BY created_at DESC LIMIT 1",
                params![txn_id],
                alert_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn set_alert_status(&self, alert_id: &str, status: AlertStatus) -> TriageResult<()> {
        self.with_conn(|conn| set_alert_status_conn(conn, alert_id, status))
    }

    /// Alerts a customer raised before `before`, excluding one alert.
    /// Used as the "historical incidents" signal.
    pub fn prior_alert_count(
        &self,
        customer_id: &str,
        exclude_alert_id: &str,
        before: &DateTime<Utc>,
    ) -> TriageResult<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM alert
                 WHERE customer_id = ?1 AND alert_id != ?2 AND created_at < ?3",
                params![customer_id, exclude_alert_id, ts_to_sql(before)],
                |row| row.get(0),
            )
            .map_err(Into::into)
        })
    }

    /// The work queue: every alert with customer and suspect-transaction
    /// summaries, newest first.
    pub fn list_alerts(&self) -> TriageResult<Vec<AlertListing>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.alert_id, a.customer_id, a.suspect_txn_id, a.risk, a.status,
                        a.created_at, c.name, c.kyc_level, t.merchant, t.amount_minor, t.ts
                 FROM alert a
                 JOIN customer c ON c.customer_id = a.customer_id
                 JOIN transactions t ON t.txn_id = a.suspect_txn_id
                 ORDER BY a.created_at DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(AlertListing {
                    alert: alert_row(row)?,
                    customer_name: row.get(6)?,
                    customer_kyc: row.get(7)?,
                    txn_merchant: row.get(8)?,
                    txn_amount_minor: row.get(9)?,
                    txn_ts: parse_ts(10, row.get(10)?)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }
}

pub(crate) fn set_alert_status_conn(
    conn: &Connection,
    alert_id: &str,
    status: AlertStatus,
) -> TriageResult<()> {
    conn.execute(
        "UPDATE alert SET status = ?1 WHERE alert_id = ?2",
        params![status, alert_id],
    )?;
    Ok(())
}

fn alert_row(row: &Row<'_>) -> rusqlite::Result<AlertRecord> {
    Ok(AlertRecord {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        suspect_txn_id: row.get(2)?,
        risk: row.get(3)?,
        status: row.get(4)?,
        created_at: parse_ts(5, row.get(5)?)?,
    })
}
