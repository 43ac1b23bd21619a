//! SQLite persistence for engine-owned state.
//!
//! RULE: Only this module talks SQL to the engine database. The engine,
//! progressor, and dedup logic call store methods — they never execute SQL
//! directly. Source databases live behind `sources`, not here.

mod action;
mod alert;
mod inventory;
mod revision;

pub use action::{ManagerActionRow, RunLogRow};
pub use alert::AlertFilter;
pub use inventory::InventoryRecord;
pub use revision::RevisionRow;

use crate::clock::EngineState;
use crate::error::EngineResult;
use rusqlite::{params, Connection, OptionalExtension};

pub struct EngineStore {
    pub(crate) conn: Connection,
    path: Option<String>,
}

impl EngineStore {
    /// Open (or create) the engine database at `path`.
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only matters for real files; ignore failures on :memory:.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database. In-memory stores get a
    /// fresh, isolated database.
    pub fn reopen(&self) -> EngineResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Engine state ───────────────────────────────────────────

    pub fn engine_state(&self) -> EngineResult<Option<EngineState>> {
        let row = self
            .conn
            .query_row(
                "SELECT start_day, end_day, current_day, updated_at
                 FROM engine_state WHERE id = 1",
                [],
                |r| {
                    Ok(EngineState {
                        start_day: r.get(0)?,
                        end_day: r.get(1)?,
                        current_day: r.get(2)?,
                        updated_at: r.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn save_engine_state(&self, state: &EngineState) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO engine_state (id, start_day, end_day, current_day, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO UPDATE SET
                 start_day = excluded.start_day,
                 end_day = excluded.end_day,
                 current_day = excluded.current_day,
                 updated_at = excluded.updated_at",
            params![
                state.start_day,
                state.end_day,
                state.current_day,
                state.updated_at
            ],
        )?;
        Ok(())
    }

    /// Wipe all runtime rows for a reset. Scripts and revisions survive — a
    /// reset replays the window, it does not forget edits.
    pub fn clear_runtime(&self) -> EngineResult<()> {
        self.conn.execute_batch(
            "DELETE FROM alert;
             DELETE FROM alert_suppression;
             DELETE FROM inventory_state;
             DELETE FROM manager_action;
             DELETE FROM run_log;",
        )?;
        log::debug!("Engine runtime tables cleared");
        Ok(())
    }
}
