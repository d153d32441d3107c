//! SQLite persistence layer.
//!
//! RULE: Only the store modules talk to the database. Agents, the
//! orchestrator and the executor call store methods — they never execute
//! SQL directly. Multi-write operations go through `with_tx` so they commit
//! or roll back as a unit.

mod alerts;
mod cases;
mod customers;
mod evals;
mod kb;
mod runs;
mod transactions;

pub use alerts::{AlertListing, AlertRecord};
pub use cases::{CaseEventRecord, CaseRecord};
pub use customers::{AccountRecord, CardRecord, CustomerRecord};
pub use evals::StepStat;
pub use kb::{KbDocRecord, PolicyRecord};
pub use runs::{TraceRecord, TriageRunRecord};
pub use transactions::TransactionRecord;

use crate::error::TriageResult;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction};
use std::sync::{Arc, Mutex};

/// Handle to the triage database. `Clone` shares the same connection; the
/// inner mutex serializes access across runs and the executor.
#[derive(Clone)]
pub struct TriageStore {
    conn: Arc<Mutex<Connection>>,
}

impl TriageStore {
    pub fn open(path: &str) -> TriageResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (:memory: ignores it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (used in tests and the demo runner).
    pub fn in_memory() -> TriageResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> TriageResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
            conn.execute_batch(include_str!("../../migrations/002_alerts_runs.sql"))?;
            conn.execute_batch(include_str!("../../migrations/003_cases.sql"))?;
            conn.execute_batch(include_str!("../../migrations/004_kb_policies.sql"))?;
            Ok(())
        })
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> TriageResult<T>,
    ) -> TriageResult<T> {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    /// Run `f` inside a transaction. An error rolls everything back.
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction) -> TriageResult<T>,
    ) -> TriageResult<T> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Timestamps are stored as fixed-width RFC 3339 UTC text (millisecond
/// precision, `Z` suffix) so string comparison matches time ordering.
pub(crate) fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
