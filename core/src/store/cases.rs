//! Investigation cases, their append-only event logs, and the atomic
//! units of work the action executor commits.

use super::alerts::set_alert_status_conn;
use super::{parse_ts, ts_to_sql, TriageStore};
use crate::error::TriageResult;
use crate::types::{AlertStatus, CardStatus, CaseStatus, CaseType, EntityId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: EntityId,
    pub customer_id: EntityId,
    pub txn_id: Option<EntityId>,
    pub case_type: CaseType,
    pub status: CaseStatus,
    pub reason_code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseEventRecord {
    pub case_id: EntityId,
    pub actor: String,
    pub action: String,
    pub ts: DateTime<Utc>,
    pub payload: String,
}

impl TriageStore {
    pub fn get_case(&self, case_id: &str) -> TriageResult<Option<CaseRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT case_id, customer_id, txn_id, case_type, status, reason_code, created_at
                 FROM case_record WHERE case_id = ?1",
                params![case_id],
                case_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// An existing non-terminal DISPUTE case for the transaction, if any.
    pub fn open_dispute_for_txn(&self, txn_id: &str) -> TriageResult<Option<CaseRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT case_id, customer_id, txn_id, case_type, status, reason_code, created_at
                 FROM case_record
                 WHERE txn_id = ?1 AND case_type = 'DISPUTE' AND status = 'OPEN'
                 ORDER BY created_at ASC LIMIT 1",
                params![txn_id],
                case_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    pub fn case_events(&self, case_id: &str) -> TriageResult<Vec<CaseEventRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT case_id, actor, action, ts, payload
                 FROM case_event WHERE case_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![case_id], |row| {
                Ok(CaseEventRecord {
                    case_id: row.get(0)?,
                    actor: row.get(1)?,
                    action: row.get(2)?,
                    ts: parse_ts(3, row.get(3)?)?,
                    payload: row.get(4)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    pub fn case_count(&self, case_type: CaseType) -> TriageResult<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM case_record WHERE case_type = ?1",
                params![case_type],
                |row| row.get(0),
            )
            .map_err(Into::into)
        })
    }

    /// Freeze a card: card status, case, case event and alert resolution
    /// commit together or not at all.
    pub fn apply_card_freeze(
        &self,
        card_id: &str,
        case: &CaseRecord,
        event: &CaseEventRecord,
        alert_id: Option<&str>,
    ) -> TriageResult<()> {
        self.with_tx(|tx| {
            tx.execute(
                "UPDATE card SET status = ?1 WHERE card_id = ?2",
                params![CardStatus::Frozen, card_id],
            )?;
            insert_case_conn(tx, case)?;
            append_case_event_conn(tx, event)?;
            if let Some(alert_id) = alert_id {
                set_alert_status_conn(tx, alert_id, AlertStatus::Resolved)?;
            }
            Ok(())
        })
    }

    /// Create a case with its first event and move the originating alert,
    /// all in one transaction.
    pub fn apply_case(
        &self,
        case: &CaseRecord,
        event: &CaseEventRecord,
        alert_id: Option<&str>,
        alert_status: AlertStatus,
    ) -> TriageResult<()> {
        self.with_tx(|tx| {
            insert_case_conn(tx, case)?;
            append_case_event_conn(tx, event)?;
            if let Some(alert_id) = alert_id {
                set_alert_status_conn(tx, alert_id, alert_status)?;
            }
            Ok(())
        })
    }
}

fn insert_case_conn(conn: &Connection, case: &CaseRecord) -> TriageResult<()> {
    conn.execute(
        "INSERT INTO case_record (case_id, customer_id, txn_id, case_type, status, reason_code, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            case.id,
            case.customer_id,
            case.txn_id,
            case.case_type,
            case.status,
            case.reason_code,
            ts_to_sql(&case.created_at)
        ],
    )?;
    Ok(())
}

fn append_case_event_conn(conn: &Connection, event: &CaseEventRecord) -> TriageResult<()> {
    conn.execute(
        "INSERT INTO case_event (case_id, actor, action, ts, payload)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.case_id,
            event.actor,
            event.action,
            ts_to_sql(&event.ts),
            event.payload
        ],
    )?;
    Ok(())
}

fn case_row(row: &Row<'_>) -> rusqlite::Result<CaseRecord> {
    Ok(CaseRecord {
        id: row.get(0)?,
        customer_id: row.get(1)?,
        txn_id: row.get(2)?,
        case_type: row.get(3)?,
        status: row.get(4)?,
        reason_code: row.get(5)?,
        created_at: parse_ts(6, row.get(6)?)?,
    })
}
