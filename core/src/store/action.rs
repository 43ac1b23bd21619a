//! Manager actions and the per-day run log.

use super::EngineStore;
use crate::error::EngineResult;
use crate::types::{ActionType, LocationId, MachineId, SimDay};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

#[derive(Debug, Clone)]
pub struct ManagerActionRow {
    pub effective_date: SimDay,
    pub location_id: LocationId,
    pub machine_id: MachineId,
    pub action_type: ActionType,
    pub details: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLogRow {
    pub run_date: SimDay,
    pub executed_scripts: i64,
    pub emitted_alerts: i64,
}

impl EngineStore {
    /// Queue a manager action unless an identical (machine, day, type) one is
    /// already scheduled. Returns whether a new row was written.
    pub fn queue_manager_action(&self, action: &ManagerActionRow) -> EngineResult<bool> {
        let existing: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM manager_action
             WHERE machine_id = ?1 AND effective_date = ?2 AND action_type = ?3",
            params![
                action.machine_id,
                action.effective_date,
                action.action_type.as_str()
            ],
            |r| r.get(0),
        )?;
        if existing > 0 {
            return Ok(false);
        }
        self.conn.execute(
            "INSERT INTO manager_action
                 (effective_date, location_id, machine_id, action_type, details_json,
                  created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                action.effective_date,
                action.location_id,
                action.machine_id,
                action.action_type.as_str(),
                serde_json::Value::Object(action.details.clone()).to_string(),
                Utc::now(),
            ],
        )?;
        Ok(true)
    }

    /// Restock actions effective on `day` for one machine, oldest first.
    pub fn restocks_for(
        &self,
        machine_id: MachineId,
        day: SimDay,
    ) -> EngineResult<Vec<ManagerActionRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT effective_date, location_id, machine_id, action_type, details_json
             FROM manager_action
             WHERE machine_id = ?1 AND effective_date = ?2 AND action_type = ?3
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(
                params![machine_id, day, ActionType::RestockMachine.as_str()],
                |r| {
                    let details_json: String = r.get(4)?;
                    Ok(ManagerActionRow {
                        effective_date: r.get(0)?,
                        location_id: r.get(1)?,
                        machine_id: r.get(2)?,
                        action_type: ActionType::RestockMachine,
                        details: serde_json::from_str(&details_json).unwrap_or_default(),
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Run log ────────────────────────────────────────────────

    pub fn run_log(&self, day: SimDay) -> EngineResult<Option<RunLogRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT run_date, executed_scripts, emitted_alerts
                 FROM run_log WHERE run_date = ?1",
                params![day],
                |r| {
                    Ok(RunLogRow {
                        run_date: r.get(0)?,
                        executed_scripts: r.get(1)?,
                        emitted_alerts: r.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn record_run(&self, row: &RunLogRow) -> EngineResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO run_log
                 (run_date, executed_scripts, emitted_alerts, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                row.run_date,
                row.executed_scripts,
                row.emitted_alerts,
                Utc::now()
            ],
        )?;
        Ok(())
    }

    /// Forget a day's run so the next run_current re-executes the scripts.
    /// Used when a revision is activated or reverted mid-day.
    pub fn invalidate_run(&self, day: SimDay) -> EngineResult<()> {
        self.conn
            .execute("DELETE FROM run_log WHERE run_date = ?1", params![day])?;
        Ok(())
    }
}
