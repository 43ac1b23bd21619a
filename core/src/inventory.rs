//! Inventory drawdown progression.
//!
//! One row per (machine, ingredient, day). Each simulated day subtracts the
//! forecast consumption from the previous day's on-hand and applies any
//! restock actions scheduled for that day, clamping into [0, capacity].
//! Advancing is idempotent per (machine, day) and strictly sequential;
//! already-materialised days are immutable history.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::sources::SourceHub;
use crate::store::{EngineStore, InventoryRecord, ManagerActionRow};
use crate::types::{MachineId, SimDay};
use chrono::Duration;
use std::collections::HashMap;

pub const SOURCE_SEED: &str = "seed";
pub const SOURCE_DRAWDOWN: &str = "drawdown";
pub const SOURCE_RESTOCK: &str = "restock";

/// Restock modes carried in manager-action details. `top_up_to_capacity`
/// refills every ingredient; `quantities` adds per-ingredient amounts.
pub const RESTOCK_MODE_KEY: &str = "mode";
pub const RESTOCK_TOP_UP: &str = "top_up_to_capacity";

pub struct InventoryProgressor<'a> {
    store: &'a EngineStore,
    sources: &'a SourceHub,
    config: &'a EngineConfig,
}

impl<'a> InventoryProgressor<'a> {
    pub fn new(store: &'a EngineStore, sources: &'a SourceHub, config: &'a EngineConfig) -> Self {
        Self {
            store,
            sources,
            config,
        }
    }

    /// Seed every machine's ingredients at `seed_fill_ratio` of capacity on
    /// the start day. Idempotent: machines that already have rows keep them.
    pub fn seed_baseline(&self, start_day: SimDay) -> EngineResult<usize> {
        let machines = self.sources.machines()?;
        let mut seeded = 0;
        for machine in &machines {
            if self.store.has_inventory(machine.machine_id, start_day)? {
                continue;
            }
            let caps = self.sources.capacities_for_model(&machine.model)?;
            let rows: Vec<InventoryRecord> = caps
                .iter()
                .map(|cap| InventoryRecord {
                    day: start_day,
                    machine_id: machine.machine_id,
                    ingredient_id: cap.ingredient_id,
                    on_hand: (cap.capacity * self.config.seed_fill_ratio).max(0.0),
                    capacity: Some(cap.capacity),
                    unit: cap.unit.clone(),
                    source: SOURCE_SEED.to_string(),
                })
                .collect();
            seeded += rows.len();
            self.store.insert_inventory_rows(&rows)?;
        }
        if seeded > 0 {
            log::info!("Seeded {seeded} inventory rows for day {start_day}");
        }
        Ok(seeded)
    }

    /// Materialise `day` from `day - 1`. A no-op when the day already exists;
    /// an error when `day` is not exactly one past the last materialised day.
    pub fn advance_day(&self, machine_id: MachineId, day: SimDay) -> EngineResult<()> {
        if self.store.has_inventory(machine_id, day)? {
            return Ok(());
        }
        let last = self
            .store
            .last_inventory_day(machine_id)?
            .ok_or_else(|| {
                anyhow::anyhow!("inventory for machine {machine_id} was never seeded")
            })?;
        let expected = last + Duration::days(1);
        if day != expected {
            return Err(EngineError::OutOfOrderAdvance {
                machine_id,
                expected,
                got: day,
            });
        }

        let previous = self.store.inventory_rows(machine_id, last)?;
        let consumption = match self.sources.latest_forecast_run()? {
            Some(run_id) => self
                .sources
                .forecast_consumption_for_day(&run_id, machine_id, day)?,
            None => HashMap::new(),
        };
        let restocks = self.store.restocks_for(machine_id, day)?;

        let mut rows = Vec::with_capacity(previous.len());
        for prev in previous {
            let used = consumption.get(&prev.ingredient_id).copied().unwrap_or(0.0);
            let mut on_hand = prev.on_hand - used;
            if on_hand < 0.0 {
                log::warn!(
                    "Inventory invariant: machine {machine_id} ingredient {} would go \
                     negative on {day} ({on_hand:.2}); clamping to 0",
                    prev.ingredient_id
                );
                on_hand = 0.0;
            }

            let restocked = apply_restocks(&restocks, &prev, &mut on_hand);

            if let Some(capacity) = prev.capacity {
                if on_hand > capacity {
                    log::warn!(
                        "Inventory invariant: machine {machine_id} ingredient {} over \
                         capacity on {day} ({on_hand:.2} > {capacity:.2}); clamping",
                        prev.ingredient_id
                    );
                    on_hand = capacity;
                }
            }

            rows.push(InventoryRecord {
                day,
                machine_id,
                ingredient_id: prev.ingredient_id,
                on_hand,
                capacity: prev.capacity,
                unit: prev.unit,
                source: if restocked {
                    SOURCE_RESTOCK.to_string()
                } else {
                    SOURCE_DRAWDOWN.to_string()
                },
            });
        }
        self.store.insert_inventory_rows(&rows)?;
        Ok(())
    }

    /// Replay the drawdown forward until `target` is materialised. This is
    /// how `skip(date)` derives inventory lazily: day by day through the
    /// same advance path, so skipping and advancing agree.
    pub fn ensure_through(&self, machine_id: MachineId, target: SimDay) -> EngineResult<()> {
        loop {
            let last = self
                .store
                .last_inventory_day(machine_id)?
                .ok_or_else(|| {
                    anyhow::anyhow!("inventory for machine {machine_id} was never seeded")
                })?;
            if last >= target {
                return Ok(());
            }
            self.advance_day(machine_id, last + Duration::days(1))?;
        }
    }
}

/// Apply restock actions to one ingredient's quantity. Returns whether any
/// restock touched it.
fn apply_restocks(
    restocks: &[ManagerActionRow],
    prev: &InventoryRecord,
    on_hand: &mut f64,
) -> bool {
    let mut touched = false;
    for action in restocks {
        let mode = action
            .details
            .get(RESTOCK_MODE_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or(RESTOCK_TOP_UP);
        if mode == RESTOCK_TOP_UP {
            if let Some(capacity) = prev.capacity {
                *on_hand = capacity;
                touched = true;
            }
            continue;
        }
        // Additive mode: {"quantities": {"<ingredient_id>": amount}}.
        if let Some(amount) = action
            .details
            .get("quantities")
            .and_then(|v| v.as_object())
            .and_then(|m| m.get(&prev.ingredient_id.to_string()))
            .and_then(|v| v.as_f64())
        {
            *on_hand += amount;
            touched = true;
        }
    }
    touched
}
