//! Inventory state queries.
//!
//! Rows for days the clock has moved past are immutable history; the store
//! only ever inserts new days or wipes everything on reset.

use super::EngineStore;
use crate::error::EngineResult;
use crate::types::{IngredientId, MachineId, SimDay};
use rusqlite::{params, OptionalExtension};

#[derive(Debug, Clone, PartialEq)]
pub struct InventoryRecord {
    pub day: SimDay,
    pub machine_id: MachineId,
    pub ingredient_id: IngredientId,
    pub on_hand: f64,
    pub capacity: Option<f64>,
    pub unit: String,
    /// How the row came to be: seed | drawdown | restock.
    pub source: String,
}

impl EngineStore {
    pub fn inventory_rows(
        &self,
        machine_id: MachineId,
        day: SimDay,
    ) -> EngineResult<Vec<InventoryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT day, machine_id, ingredient_id, on_hand, capacity, unit, source
             FROM inventory_state
             WHERE machine_id = ?1 AND day = ?2
             ORDER BY ingredient_id",
        )?;
        let rows = stmt
            .query_map(params![machine_id, day], |r| {
                Ok(InventoryRecord {
                    day: r.get(0)?,
                    machine_id: r.get(1)?,
                    ingredient_id: r.get(2)?,
                    on_hand: r.get(3)?,
                    capacity: r.get(4)?,
                    unit: r.get(5)?,
                    source: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn has_inventory(&self, machine_id: MachineId, day: SimDay) -> EngineResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM inventory_state WHERE machine_id = ?1 AND day = ?2",
            params![machine_id, day],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// The most recent day with materialised rows for a machine.
    pub fn last_inventory_day(&self, machine_id: MachineId) -> EngineResult<Option<SimDay>> {
        let day = self
            .conn
            .query_row(
                "SELECT MAX(day) FROM inventory_state WHERE machine_id = ?1",
                params![machine_id],
                |r| r.get::<_, Option<SimDay>>(0),
            )
            .optional()?
            .flatten();
        Ok(day)
    }

    pub fn insert_inventory_rows(&self, rows: &[InventoryRecord]) -> EngineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO inventory_state
                     (day, machine_id, ingredient_id, on_hand, capacity, unit, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.day,
                    row.machine_id,
                    row.ingredient_id,
                    row.on_hand,
                    row.capacity,
                    row.unit,
                    row.source,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
