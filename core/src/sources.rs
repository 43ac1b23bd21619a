//! Read-only access to the three historical data sources: facts (fleet
//! topology), observed (field aggregates), forecast (model projections).
//!
//! RULE: Only this module reads the source databases, and nothing in the
//! engine ever writes them. The demo seeder is the single writer.

use crate::error::EngineResult;
use crate::types::{IngredientId, LocationId, MachineId, ProductId, SimDay};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct MachineMeta {
    pub machine_id: MachineId,
    pub machine_name: String,
    pub model: String,
    pub location_id: LocationId,
    pub location_name: String,
}

#[derive(Debug, Clone)]
pub struct MachineRow {
    pub id: MachineId,
    pub location_id: LocationId,
    pub name: String,
    pub model: String,
    pub installed_at: Option<SimDay>,
    pub last_serviced_at: Option<SimDay>,
}

#[derive(Debug, Clone)]
pub struct LocationRow {
    pub id: LocationId,
    pub name: String,
    pub timezone: String,
    pub region: String,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct CapacityRow {
    pub machine_model: String,
    pub ingredient_id: IngredientId,
    pub capacity: f64,
    pub unit: String,
}

#[derive(Debug, Clone)]
pub struct ObservedTotalsRow {
    pub date: SimDay,
    pub units: f64,
    pub revenue: f64,
    pub card_share: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ObservedProductRow {
    pub date: SimDay,
    pub product_id: ProductId,
    pub units: f64,
    pub revenue: f64,
}

#[derive(Debug, Clone)]
pub struct ObservedIngredientRow {
    pub date: SimDay,
    pub ingredient_id: IngredientId,
    pub qty: f64,
    pub unit: String,
}

#[derive(Debug, Clone)]
pub struct ForecastProductRow {
    pub date: SimDay,
    pub product_id: ProductId,
    pub units: f64,
}

#[derive(Debug, Clone)]
pub struct ForecastIngredientRow {
    pub date: SimDay,
    pub ingredient_id: IngredientId,
    pub qty: f64,
    pub unit: String,
}

pub struct SourceHub {
    pub(crate) facts: Connection,
    pub(crate) observed: Connection,
    pub(crate) forecast: Connection,
}

impl SourceHub {
    pub fn open(facts_path: &str, observed_path: &str, forecast_path: &str) -> EngineResult<Self> {
        Ok(Self {
            facts: Connection::open(facts_path)?,
            observed: Connection::open(observed_path)?,
            forecast: Connection::open(forecast_path)?,
        })
    }

    /// Three fresh in-memory databases (used in tests and the demo runner).
    pub fn in_memory() -> EngineResult<Self> {
        Ok(Self {
            facts: Connection::open_in_memory()?,
            observed: Connection::open_in_memory()?,
            forecast: Connection::open_in_memory()?,
        })
    }

    /// Apply the source schemas. Harmless on already-initialised databases.
    pub fn create_schema(&self) -> EngineResult<()> {
        self.facts
            .execute_batch(include_str!("../../migrations/002_facts.sql"))?;
        self.observed
            .execute_batch(include_str!("../../migrations/003_observed.sql"))?;
        self.forecast
            .execute_batch(include_str!("../../migrations/004_forecast.sql"))?;
        Ok(())
    }

    // ── Facts lookups ──────────────────────────────────────────

    pub fn machines(&self) -> EngineResult<Vec<MachineMeta>> {
        let mut stmt = self.facts.prepare(
            "SELECT m.id, m.name, m.model, m.location_id, l.name
             FROM machine m
             JOIN location l ON l.id = m.location_id
             ORDER BY m.location_id, m.id",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(MachineMeta {
                    machine_id: r.get(0)?,
                    machine_name: r.get(1)?,
                    model: r.get(2)?,
                    location_id: r.get(3)?,
                    location_name: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn machine(&self, machine_id: MachineId) -> EngineResult<Option<MachineRow>> {
        let row = self
            .facts
            .query_row(
                "SELECT id, location_id, name, model, installed_at, last_serviced_at
                 FROM machine WHERE id = ?1",
                params![machine_id],
                |r| {
                    Ok(MachineRow {
                        id: r.get(0)?,
                        location_id: r.get(1)?,
                        name: r.get(2)?,
                        model: r.get(3)?,
                        installed_at: r.get(4)?,
                        last_serviced_at: r.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn location(&self, location_id: LocationId) -> EngineResult<Option<LocationRow>> {
        let row = self
            .facts
            .query_row(
                "SELECT id, name, timezone, region, currency FROM location WHERE id = ?1",
                params![location_id],
                |r| {
                    Ok(LocationRow {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        timezone: r.get(2)?,
                        region: r.get(3)?,
                        currency: r.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn capacities_for_model(&self, model: &str) -> EngineResult<Vec<CapacityRow>> {
        let mut stmt = self.facts.prepare(
            "SELECT machine_model, ingredient_id, capacity, unit
             FROM machine_ingredient_capacity
             WHERE machine_model = ?1
             ORDER BY ingredient_id",
        )?;
        let rows = stmt
            .query_map(params![model], |r| {
                Ok(CapacityRow {
                    machine_model: r.get(0)?,
                    ingredient_id: r.get(1)?,
                    capacity: r.get(2)?,
                    unit: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Display-name lookup, tolerant of gaps: a missing id simply has no entry.
    pub fn product_names(&self) -> EngineResult<HashMap<ProductId, String>> {
        let mut stmt = self.facts.prepare("SELECT id, name FROM product")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    pub fn ingredient_names(&self) -> EngineResult<HashMap<IngredientId, String>> {
        let mut stmt = self.facts.prepare("SELECT id, name FROM ingredient")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }

    // ── Observed aggregates ────────────────────────────────────

    /// Inclusive date range of observed data across the whole fleet.
    /// None when the observed database is empty.
    pub fn observed_date_range(&self) -> EngineResult<Option<(SimDay, SimDay)>> {
        let row = self
            .observed
            .query_row(
                "SELECT MIN(date), MAX(date) FROM daily_machine_totals",
                [],
                |r| {
                    Ok((
                        r.get::<_, Option<SimDay>>(0)?,
                        r.get::<_, Option<SimDay>>(1)?,
                    ))
                },
            )
            .optional()?;
        Ok(match row {
            Some((Some(min), Some(max))) => Some((min, max)),
            _ => None,
        })
    }

    pub fn observed_totals(
        &self,
        machine_id: MachineId,
        from: SimDay,
        to: SimDay,
    ) -> EngineResult<Vec<ObservedTotalsRow>> {
        let mut stmt = self.observed.prepare(
            "SELECT date, units, revenue, card_share
             FROM daily_machine_totals
             WHERE machine_id = ?1 AND date BETWEEN ?2 AND ?3
             ORDER BY date",
        )?;
        let rows = stmt
            .query_map(params![machine_id, from, to], |r| {
                Ok(ObservedTotalsRow {
                    date: r.get(0)?,
                    units: r.get(1)?,
                    revenue: r.get(2)?,
                    card_share: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn observed_products(
        &self,
        machine_id: MachineId,
        from: SimDay,
        to: SimDay,
    ) -> EngineResult<Vec<ObservedProductRow>> {
        let mut stmt = self.observed.prepare(
            "SELECT date, product_id, SUM(units_sold), SUM(revenue)
             FROM daily_product_sales
             WHERE machine_id = ?1 AND date BETWEEN ?2 AND ?3
             GROUP BY date, product_id
             ORDER BY date, product_id",
        )?;
        let rows = stmt
            .query_map(params![machine_id, from, to], |r| {
                Ok(ObservedProductRow {
                    date: r.get(0)?,
                    product_id: r.get(1)?,
                    units: r.get(2)?,
                    revenue: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn observed_ingredients(
        &self,
        machine_id: MachineId,
        from: SimDay,
        to: SimDay,
    ) -> EngineResult<Vec<ObservedIngredientRow>> {
        let mut stmt = self.observed.prepare(
            "SELECT date, ingredient_id, total_quantity, unit
             FROM daily_ingredient_consumption
             WHERE machine_id = ?1 AND date BETWEEN ?2 AND ?3
             ORDER BY date, ingredient_id",
        )?;
        let rows = stmt
            .query_map(params![machine_id, from, to], |r| {
                Ok(ObservedIngredientRow {
                    date: r.get(0)?,
                    ingredient_id: r.get(1)?,
                    qty: r.get(2)?,
                    unit: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Forecast aggregates ────────────────────────────────────

    pub fn latest_forecast_run(&self) -> EngineResult<Option<String>> {
        let row = self
            .forecast
            .query_row(
                "SELECT id FROM forecast_run ORDER BY created_at DESC, id DESC LIMIT 1",
                [],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        Ok(row)
    }

    pub fn forecast_products(
        &self,
        run_id: &str,
        machine_id: MachineId,
        from: SimDay,
        to: SimDay,
    ) -> EngineResult<Vec<ForecastProductRow>> {
        let mut stmt = self.forecast.prepare(
            "SELECT forecast_date, product_id, units
             FROM daily_product_forecast
             WHERE run_id = ?1 AND machine_id = ?2 AND forecast_date BETWEEN ?3 AND ?4
             ORDER BY forecast_date, product_id",
        )?;
        let rows = stmt
            .query_map(params![run_id, machine_id, from, to], |r| {
                Ok(ForecastProductRow {
                    date: r.get(0)?,
                    product_id: r.get(1)?,
                    units: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn forecast_ingredients(
        &self,
        run_id: &str,
        machine_id: MachineId,
        from: SimDay,
        to: SimDay,
    ) -> EngineResult<Vec<ForecastIngredientRow>> {
        let mut stmt = self.forecast.prepare(
            "SELECT forecast_date, ingredient_id, quantity, unit
             FROM daily_ingredient_forecast
             WHERE run_id = ?1 AND machine_id = ?2 AND forecast_date BETWEEN ?3 AND ?4
             ORDER BY forecast_date, ingredient_id",
        )?;
        let rows = stmt
            .query_map(params![run_id, machine_id, from, to], |r| {
                Ok(ForecastIngredientRow {
                    date: r.get(0)?,
                    ingredient_id: r.get(1)?,
                    qty: r.get(2)?,
                    unit: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Forecast ingredient draw for one machine on one day, keyed by
    /// ingredient. The inventory progressor's consumption input.
    pub fn forecast_consumption_for_day(
        &self,
        run_id: &str,
        machine_id: MachineId,
        day: SimDay,
    ) -> EngineResult<HashMap<IngredientId, f64>> {
        let mut stmt = self.forecast.prepare(
            "SELECT ingredient_id, quantity
             FROM daily_ingredient_forecast
             WHERE run_id = ?1 AND machine_id = ?2 AND forecast_date = ?3",
        )?;
        let rows = stmt
            .query_map(params![run_id, machine_id, day], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, f64>(1)?))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(rows)
    }
}
