//! Script settings and revision storage.
//!
//! Exactly one revision per script name is active at a time. Activation is
//! an atomic swap; superseded revisions stay on disk so a revert is always
//! possible.

use super::EngineStore;
use crate::error::{EngineError, EngineResult};
use crate::types::RevisionStatus;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

#[derive(Debug, Clone)]
pub struct RevisionRow {
    pub revision_id: String,
    pub script_name: String,
    pub source_code: String,
    pub status: RevisionStatus,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

fn row_to_revision(r: &Row<'_>) -> rusqlite::Result<RevisionRow> {
    let status: String = r.get(3)?;
    Ok(RevisionRow {
        revision_id: r.get(0)?,
        script_name: r.get(1)?,
        source_code: r.get(2)?,
        status: RevisionStatus::parse(&status).unwrap_or(RevisionStatus::Draft),
        note: r.get(4)?,
        created_at: r.get(5)?,
    })
}

const REVISION_COLUMNS: &str =
    "revision_id, script_name, source_code, status, note, created_at";

impl EngineStore {
    pub fn ensure_script(&self, script_name: &str) -> EngineResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO script (script_name, enabled, updated_at)
             VALUES (?1, 1, ?2)",
            params![script_name, Utc::now()],
        )?;
        Ok(())
    }

    pub fn script_enabled(&self, script_name: &str) -> EngineResult<bool> {
        let enabled: Option<i64> = self
            .conn
            .query_row(
                "SELECT enabled FROM script WHERE script_name = ?1",
                params![script_name],
                |r| r.get(0),
            )
            .optional()?;
        Ok(enabled.map(|v| v != 0).unwrap_or(true))
    }

    pub fn set_script_enabled(&self, script_name: &str, enabled: bool) -> EngineResult<()> {
        self.ensure_script(script_name)?;
        self.conn.execute(
            "UPDATE script SET enabled = ?2, updated_at = ?3 WHERE script_name = ?1",
            params![script_name, enabled as i64, Utc::now()],
        )?;
        Ok(())
    }

    pub fn script_names(&self) -> EngineResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT script_name FROM script ORDER BY script_name")?;
        let rows = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insert_revision(&self, revision: &RevisionRow) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO script_revision
                 (revision_id, script_name, source_code, status, note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                revision.revision_id,
                revision.script_name,
                revision.source_code,
                revision.status.as_str(),
                revision.note,
                revision.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_revision(&self, revision_id: &str) -> EngineResult<Option<RevisionRow>> {
        let sql = format!(
            "SELECT {REVISION_COLUMNS} FROM script_revision WHERE revision_id = ?1"
        );
        let row = self
            .conn
            .query_row(&sql, params![revision_id], row_to_revision)
            .optional()?;
        Ok(row)
    }

    pub fn active_revision(&self, script_name: &str) -> EngineResult<Option<RevisionRow>> {
        let sql = format!(
            "SELECT {REVISION_COLUMNS} FROM script_revision
             WHERE script_name = ?1 AND status = 'active'
             ORDER BY created_at DESC LIMIT 1"
        );
        let row = self
            .conn
            .query_row(&sql, params![script_name], row_to_revision)
            .optional()?;
        Ok(row)
    }

    pub fn revision_count(&self, script_name: &str) -> EngineResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM script_revision WHERE script_name = ?1",
            params![script_name],
            |r| r.get(0),
        )?)
    }

    pub fn list_revisions(&self, script_name: &str) -> EngineResult<Vec<RevisionRow>> {
        let sql = format!(
            "SELECT {REVISION_COLUMNS} FROM script_revision
             WHERE script_name = ?1 ORDER BY created_at DESC, revision_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![script_name], row_to_revision)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Atomic swap: the current active revision (if any) becomes superseded
    /// and the target draft becomes active.
    pub fn activate_revision(
        &self,
        script_name: &str,
        revision_id: &str,
    ) -> EngineResult<RevisionRow> {
        let target = self
            .get_revision(revision_id)?
            .filter(|r| r.script_name == script_name)
            .ok_or_else(|| EngineError::UnknownRevision {
                script_name: script_name.to_string(),
                revision_id: revision_id.to_string(),
            })?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE script_revision SET status = 'superseded'
             WHERE script_name = ?1 AND status = 'active' AND revision_id != ?2",
            params![script_name, revision_id],
        )?;
        tx.execute(
            "UPDATE script_revision SET status = 'active' WHERE revision_id = ?1",
            params![revision_id],
        )?;
        tx.commit()?;
        log::info!("Activated revision {revision_id} for script {script_name}");
        Ok(RevisionRow {
            status: RevisionStatus::Active,
            ..target
        })
    }

    /// Roll back to the revision that was active before the current one: the
    /// active revision is demoted to draft and the most recently superseded
    /// revision is re-activated. Returns the newly active revision, or None
    /// when there is nothing to revert to.
    pub fn revert_script(&self, script_name: &str) -> EngineResult<Option<RevisionRow>> {
        let sql = format!(
            "SELECT {REVISION_COLUMNS} FROM script_revision
             WHERE script_name = ?1 AND status = 'superseded'
             ORDER BY created_at DESC, revision_id DESC LIMIT 1"
        );
        let previous = self
            .conn
            .query_row(&sql, params![script_name], row_to_revision)
            .optional()?;
        let Some(previous) = previous else {
            return Ok(None);
        };

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE script_revision SET status = 'draft'
             WHERE script_name = ?1 AND status = 'active'",
            params![script_name],
        )?;
        tx.execute(
            "UPDATE script_revision SET status = 'active' WHERE revision_id = ?1",
            params![previous.revision_id],
        )?;
        tx.commit()?;
        log::info!(
            "Reverted script {script_name} to revision {}",
            previous.revision_id
        );
        Ok(Some(RevisionRow {
            status: RevisionStatus::Active,
            ..previous
        }))
    }
}
