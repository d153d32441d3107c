//! Knowledge-base documents and compliance policies. Read-only to the
//! engine; documents are loaded by ingestion, policies by migration.

use super::TriageStore;
use crate::error::TriageResult;
use crate::types::EntityId;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbDocRecord {
    pub id: EntityId,
    pub title: String,
    pub anchor: String,
    pub content_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub id: EntityId,
    pub code: String,
    pub title: String,
    pub content_text: String,
    pub priority: i64,
}

impl TriageStore {
    pub fn insert_kb_doc(&self, doc: &KbDocRecord) -> TriageResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kb_doc (doc_id, title, anchor, content_text)
                 VALUES (?1, ?2, ?3, ?4)",
                params![doc.id, doc.title, doc.anchor, doc.content_text],
            )?;
            Ok(())
        })
    }

    pub fn all_kb_docs(&self) -> TriageResult<Vec<KbDocRecord>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT doc_id, title, anchor, content_text FROM kb_doc")?;
            let rows = stmt.query_map([], |row| {
                Ok(KbDocRecord {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    anchor: row.get(2)?,
                    content_text: row.get(3)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    pub fn policies(&self) -> TriageResult<Vec<PolicyRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT policy_id, code, title, content_text, priority
                 FROM policy ORDER BY priority ASC",
            )?;
            let rows = stmt.query_map([], policy_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    pub fn policy_by_code(&self, code: &str) -> TriageResult<Option<PolicyRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT policy_id, code, title, content_text, priority
                 FROM policy WHERE code = ?1",
                params![code],
                policy_row,
            )
            .optional()
            .map_err(Into::into)
        })
    }
}

fn policy_row(row: &Row<'_>) -> rusqlite::Result<PolicyRecord> {
    Ok(PolicyRecord {
        id: row.get(0)?,
        code: row.get(1)?,
        title: row.get(2)?,
        content_text: row.get(3)?,
        priority: row.get(4)?,
    })
}
