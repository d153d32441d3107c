//! Read-only aggregate queries backing the evaluation reports.

use super::cases::CaseRecord;
use super::TriageStore;
use crate::error::TriageResult;
use crate::types::{AlertStatus, RiskLevel, RunId};
use rusqlite::params;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct StepStat {
    pub step: String,
    pub total: i64,
    pub ok_count: i64,
    pub avg_duration_ms: f64,
}

impl TriageStore {
    /// Completed runs with a persisted risk, paired with the originating
    /// alert's risk for confusion-matrix scoring.
    pub fn runs_with_alert_risk(&self) -> TriageResult<Vec<(RunId, RiskLevel, RiskLevel)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.run_id, r.risk, a.risk
                 FROM triage_run r
                 JOIN alert a ON a.alert_id = r.alert_id
                 WHERE r.ended_at IS NOT NULL AND r.risk IS NOT NULL",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    /// Per-step success rate and latency over every persisted trace.
    pub fn trace_step_stats(&self) -> TriageResult<Vec<StepStat>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT step, COUNT(*), SUM(ok), AVG(duration_ms)
                 FROM agent_trace GROUP BY step ORDER BY step ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(StepStat {
                    step: row.get(0)?,
                    total: row.get(1)?,
                    ok_count: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    avg_duration_ms: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    /// Detail blobs for every trace of one step.
    pub fn trace_details_for_step(&self, step: &str) -> TriageResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT detail FROM agent_trace WHERE step = ?1")?;
            let rows = stmt.query_map(params![step], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    /// Every case paired with the status of the alert raised on the same
    /// suspect transaction, when one exists.
    pub fn cases_with_alert_status(
        &self,
    ) -> TriageResult<Vec<(CaseRecord, Option<AlertStatus>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.case_id, c.customer_id, c.txn_id, c.case_type, c.status,
                        c.reason_code, c.created_at, a.status
                 FROM case_record c
                 LEFT JOIN alert a ON a.suspect_txn_id = c.txn_id
                 ORDER BY c.created_at ASC",
            )?;
            let rows = stmt.query_map([], |row| {
                let case = CaseRecord {
                    id: row.get(0)?,
                    customer_id: row.get(1)?,
                    txn_id: row.get(2)?,
                    case_type: row.get(3)?,
                    status: row.get(4)?,
                    reason_code: row.get(5)?,
                    created_at: super::parse_ts(6, row.get(6)?)?,
                };
                Ok((case, row.get::<_, Option<AlertStatus>>(7)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }
}
