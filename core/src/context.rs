//! Script context assembly — the immutable per-(machine, day) snapshot that
//! detector scripts run against.
//!
//! RULE: missing observed or predicted rows degrade to empty lists and
//! missing display names degrade to null; only an unresolvable machine or
//! location fails a build.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::sources::SourceHub;
use crate::store::EngineStore;
use crate::types::{IngredientId, LocationId, MachineId, ProductId, SimDay};
use chrono::Duration;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DayKind {
    Observed,
    Predicted,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextMeta {
    pub as_of_date: SimDay,
    pub currency: String,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextIds {
    pub location_id: LocationId,
    pub machine_id: MachineId,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationInfo {
    pub id: LocationId,
    pub name: String,
    pub timezone: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MachineInfo {
    pub id: MachineId,
    pub name: String,
    pub model: String,
    pub installed_at: Option<SimDay>,
    pub last_serviced_at: Option<SimDay>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextEntities {
    pub location: LocationInfo,
    pub machine: MachineInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayTotals {
    pub units: f64,
    pub revenue: f64,
    pub card_share: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductDayRow {
    pub product_id: ProductId,
    pub product_name: Option<String>,
    pub units: f64,
    pub revenue: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngredientDayRow {
    pub ingredient_id: IngredientId,
    pub ingredient_name: Option<String>,
    pub qty: f64,
    pub unit: Option<String>,
}

/// One entry on the timeline. Observed entries never lie past the as-of day,
/// predicted entries never precede it; the as-of day appears once per kind.
#[derive(Debug, Clone, Serialize)]
pub struct DayEntry {
    pub kind: DayKind,
    pub date: SimDay,
    pub offset_days: i64,
    pub totals: Option<DayTotals>,
    pub by_product: Vec<ProductDayRow>,
    pub by_ingredient: Vec<IngredientDayRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventoryItem {
    pub ingredient_id: IngredientId,
    pub ingredient_name: Option<String>,
    pub qty_on_hand: f64,
    pub unit: String,
    pub capacity: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InventorySnapshot {
    pub snapshot_date: Option<SimDay>,
    pub by_ingredient: Vec<InventoryItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptContext {
    pub meta: ContextMeta,
    pub ids: ContextIds,
    pub entities: ContextEntities,
    pub days: Vec<DayEntry>,
    pub inventory: InventorySnapshot,
}

impl ScriptContext {
    /// The JSON surface handed to the sandbox as the `ctx` binding.
    pub fn to_value(&self) -> EngineResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

pub struct ContextBuilder<'a> {
    sources: &'a SourceHub,
    config: &'a EngineConfig,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(sources: &'a SourceHub, config: &'a EngineConfig) -> Self {
        Self { sources, config }
    }

    pub fn build(
        &self,
        store: &EngineStore,
        location_id: LocationId,
        machine_id: MachineId,
        as_of: SimDay,
    ) -> EngineResult<ScriptContext> {
        let machine = self
            .sources
            .machine(machine_id)?
            .filter(|m| m.location_id == location_id)
            .ok_or(EngineError::DataUnavailable {
                entity: "machine",
                id: machine_id,
            })?;
        let location =
            self.sources
                .location(location_id)?
                .ok_or(EngineError::DataUnavailable {
                    entity: "location",
                    id: location_id,
                })?;

        let history_start = as_of - Duration::days(i64::from(self.config.history_days) - 1);
        let forecast_end = as_of + Duration::days(i64::from(self.config.forecast_days));

        let product_names = self.sources.product_names()?;
        let ingredient_names = self.sources.ingredient_names()?;
        let run_id = self.sources.latest_forecast_run()?;

        // Observed rows, bucketed by date.
        let mut totals_by_date: HashMap<SimDay, DayTotals> = HashMap::new();
        for row in self.sources.observed_totals(machine_id, history_start, as_of)? {
            totals_by_date.insert(
                row.date,
                DayTotals {
                    units: row.units,
                    revenue: row.revenue,
                    card_share: row.card_share,
                },
            );
        }

        let mut observed_products: HashMap<SimDay, Vec<ProductDayRow>> = HashMap::new();
        for row in self
            .sources
            .observed_products(machine_id, history_start, as_of)?
        {
            observed_products
                .entry(row.date)
                .or_default()
                .push(ProductDayRow {
                    product_id: row.product_id,
                    product_name: product_names.get(&row.product_id).cloned(),
                    units: row.units,
                    revenue: Some(row.revenue),
                });
        }

        let mut observed_ingredients: HashMap<SimDay, Vec<IngredientDayRow>> = HashMap::new();
        for row in self
            .sources
            .observed_ingredients(machine_id, history_start, as_of)?
        {
            observed_ingredients
                .entry(row.date)
                .or_default()
                .push(IngredientDayRow {
                    ingredient_id: row.ingredient_id,
                    ingredient_name: ingredient_names.get(&row.ingredient_id).cloned(),
                    qty: row.qty,
                    unit: Some(row.unit),
                });
        }

        // Predicted rows, from the latest forecast run. No run means empty
        // predicted days, not a failure.
        let mut predicted_products: HashMap<SimDay, Vec<ProductDayRow>> = HashMap::new();
        let mut predicted_ingredients: HashMap<SimDay, Vec<IngredientDayRow>> = HashMap::new();
        if let Some(run) = run_id.as_deref() {
            for row in self
                .sources
                .forecast_products(run, machine_id, as_of, forecast_end)?
            {
                predicted_products
                    .entry(row.date)
                    .or_default()
                    .push(ProductDayRow {
                        product_id: row.product_id,
                        product_name: product_names.get(&row.product_id).cloned(),
                        units: row.units,
                        revenue: None,
                    });
            }
            for row in self
                .sources
                .forecast_ingredients(run, machine_id, as_of, forecast_end)?
            {
                predicted_ingredients
                    .entry(row.date)
                    .or_default()
                    .push(IngredientDayRow {
                        ingredient_id: row.ingredient_id,
                        ingredient_name: ingredient_names.get(&row.ingredient_id).cloned(),
                        qty: row.qty,
                        unit: Some(row.unit),
                    });
            }
        }

        let mut days = Vec::new();
        for offset in -(i64::from(self.config.history_days) - 1)..=0 {
            let date = as_of + Duration::days(offset);
            days.push(DayEntry {
                kind: DayKind::Observed,
                date,
                offset_days: offset,
                totals: totals_by_date.remove(&date),
                by_product: observed_products.remove(&date).unwrap_or_default(),
                by_ingredient: observed_ingredients.remove(&date).unwrap_or_default(),
            });
        }
        for offset in 0..=i64::from(self.config.forecast_days) {
            let date = as_of + Duration::days(offset);
            days.push(DayEntry {
                kind: DayKind::Predicted,
                date,
                offset_days: offset,
                totals: None,
                by_product: predicted_products.remove(&date).unwrap_or_default(),
                by_ingredient: predicted_ingredients.remove(&date).unwrap_or_default(),
            });
        }

        // Inventory snapshot for the as-of day, enriched with names.
        let mut inventory_items = Vec::new();
        let mut snapshot_date = None;
        let inv_rows = store.inventory_rows(machine_id, as_of)?;
        if !inv_rows.is_empty() {
            snapshot_date = Some(as_of);
        }
        for row in inv_rows {
            inventory_items.push(InventoryItem {
                ingredient_id: row.ingredient_id,
                ingredient_name: ingredient_names.get(&row.ingredient_id).cloned(),
                qty_on_hand: row.on_hand,
                unit: row.unit,
                capacity: row.capacity,
            });
        }

        Ok(ScriptContext {
            meta: ContextMeta {
                as_of_date: as_of,
                currency: location.currency.clone(),
                run_id,
            },
            ids: ContextIds {
                location_id,
                machine_id,
            },
            entities: ContextEntities {
                location: LocationInfo {
                    id: location.id,
                    name: location.name,
                    timezone: location.timezone,
                    region: location.region,
                },
                machine: MachineInfo {
                    id: machine.id,
                    name: machine.name,
                    model: machine.model,
                    installed_at: machine.installed_at,
                    last_serviced_at: machine.last_serviced_at,
                },
            },
            days,
            inventory: InventorySnapshot {
                snapshot_date,
                by_ingredient: inventory_items,
            },
        })
    }
}
