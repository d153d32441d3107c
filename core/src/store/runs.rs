//! Triage runs and their append-only step traces.

use super::{parse_ts, ts_to_sql, TriageStore};
use crate::error::TriageResult;
use crate::types::{EntityId, RiskLevel, RunId};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageRunRecord {
    pub run_id: RunId,
    pub alert_id: EntityId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub risk: Option<RiskLevel>,
    pub reasons: Vec<String>,
    pub fallback_used: bool,
    pub latency_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub run_id: RunId,
    pub seq: i64,
    pub step: String,
    pub ok: bool,
    pub duration_ms: i64,
    /// Redacted JSON blob of the step's tagged detail variant.
    pub detail: String,
}

impl TriageStore {
    pub fn insert_run(&self, run_id: &str, alert_id: &str, started_at: &DateTime<Utc>) -> TriageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO triage_run (run_id, alert_id, started_at) VALUES (?1, ?2, ?3)",
                params![run_id, alert_id, ts_to_sql(started_at)],
            )?;
            Ok(())
        })
    }

    pub fn get_run(&self, run_id: &str) -> TriageResult<Option<TriageRunRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT run_id, alert_id, started_at, ended_at, risk, reasons,
                        fallback_used, latency_ms
                 FROM triage_run WHERE run_id = ?1",
                params![run_id],
                run_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// The run id of the alert's in-flight run, if any (`ended_at` unset).
    pub fn active_run_for_alert(&self, alert_id: &str) -> TriageResult<Option<RunId>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT run_id FROM triage_run
                 WHERE alert_id = ?1 AND ended_at IS NULL
                 ORDER BY started_at DESC LIMIT 1",
                params![alert_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
        })
    }

    /// Set the terminal fields exactly once. Returns false when the run was
    /// already terminal (the row is left untouched).
    pub fn finish_run(
        &self,
        run_id: &str,
        ended_at: &DateTime<Utc>,
        risk: Option<RiskLevel>,
        reasons: &[String],
        fallback_used: bool,
        latency_ms: i64,
    ) -> TriageResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE triage_run
                 SET ended_at = ?1, risk = ?2, reasons = ?3, fallback_used = ?4, latency_ms = ?5
                 WHERE run_id = ?6 AND ended_at IS NULL",
                params![
                    ts_to_sql(ended_at),
                    risk,
                    serde_json::to_string(reasons)?,
                    fallback_used as i64,
                    latency_ms,
                    run_id
                ],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn append_trace(&self, trace: &TraceRecord) -> TriageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO agent_trace (run_id, seq, step, ok, duration_ms, detail)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    trace.run_id,
                    trace.seq,
                    trace.step,
                    trace.ok as i64,
                    trace.duration_ms,
                    trace.detail
                ],
            )?;
            Ok(())
        })
    }

    pub fn traces_for_run(&self, run_id: &str) -> TriageResult<Vec<TraceRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id, seq, step, ok, duration_ms, detail
                 FROM agent_trace WHERE run_id = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map(params![run_id], |row| {
                Ok(TraceRecord {
                    run_id: row.get(0)?,
                    seq: row.get(1)?,
                    step: row.get(2)?,
                    ok: row.get::<_, i64>(3)? != 0,
                    duration_ms: row.get(4)?,
                    detail: row.get(5)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }
}

fn run_row(row: &Row<'_>) -> rusqlite::Result<TriageRunRecord> {
    let reasons_json: String = row.get(5)?;
    let reasons = serde_json::from_str(&reasons_json).unwrap_or_default();
    Ok(TriageRunRecord {
        run_id: row.get(0)?,
        alert_id: row.get(1)?,
        started_at: parse_ts(2, row.get(2)?)?,
        ended_at: match row.get::<_, Option<String>>(3)? {
            Some(raw) => Some(parse_ts(3, raw)?),
            None => None,
        },
        risk: row.get(4)?,
        reasons,
        fallback_used: row.get::<_, i64>(6)? != 0,
        latency_ms: row.get(7)?,
    })
}
