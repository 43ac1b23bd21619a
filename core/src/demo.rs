//! Deterministic demo fleet.
//!
//! Seeds the three source databases with a small vending fleet and a month
//! of observed and forecast data. Everything flows from one master seed
//! through a per-stream Pcg64Mcg, so identical seeds always produce
//! identical databases. Nothing else in the engine draws randomness.

use crate::error::EngineResult;
use crate::sources::SourceHub;
use crate::types::SimDay;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use rusqlite::params;

/// First observed day of the demo window.
pub const DEMO_START: &str = "2024-03-01";
const FORECAST_RUN_ID: &str = "demo-forecast-001";
const FORECAST_HORIZON_DAYS: i64 = 14;

/// Derive a stream RNG so adding a stream never shifts the others.
fn stream_rng(seed: u64, stream: u64) -> Pcg64Mcg {
    Pcg64Mcg::seed_from_u64(seed ^ stream.wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

struct Product {
    id: i64,
    name: &'static str,
    group: &'static str,
    price: f64,
    /// (ingredient_id, quantity per unit sold)
    recipe: &'static [(i64, f64)],
}

struct Machine {
    id: i64,
    location_id: i64,
    name: &'static str,
    model: &'static str,
    /// Units/day baseline per product id, before weekday shaping.
    demand: &'static [(i64, f64)],
    /// Days serviced before the window start.
    serviced_days_ago: i64,
}

const PRODUCTS: &[Product] = &[
    Product { id: 1, name: "Espresso", group: "coffee", price: 2.20, recipe: &[(1, 9.0), (5, 1.0)] },
    Product { id: 2, name: "Latte", group: "coffee", price: 3.10, recipe: &[(1, 9.0), (2, 12.0), (5, 1.0)] },
    Product { id: 3, name: "Cappuccino", group: "coffee", price: 2.90, recipe: &[(1, 9.0), (2, 8.0), (5, 1.0)] },
    Product { id: 4, name: "Hot Chocolate", group: "chocolate", price: 2.60, recipe: &[(2, 10.0), (3, 18.0), (5, 1.0)] },
    Product { id: 5, name: "Chai Latte", group: "tea", price: 2.80, recipe: &[(2, 8.0), (4, 15.0), (5, 1.0)] },
    Product { id: 6, name: "Americano", group: "coffee", price: 2.40, recipe: &[(1, 9.0), (5, 1.0)] },
];

const INGREDIENTS: &[(i64, &str)] = &[
    (1, "Coffee Beans"),
    (2, "Milk Powder"),
    (3, "Cocoa Powder"),
    (4, "Chai Mix"),
    (5, "Paper Cups"),
];

const CAPACITIES: &[(&str, i64, f64, &str)] = &[
    ("VM-220", 1, 1800.0, "g"),
    ("VM-220", 2, 1200.0, "g"),
    ("VM-220", 3, 600.0, "g"),
    ("VM-220", 4, 400.0, "g"),
    ("VM-220", 5, 250.0, "count"),
    ("VM-400", 1, 2600.0, "g"),
    ("VM-400", 2, 1800.0, "g"),
    ("VM-400", 3, 900.0, "g"),
    ("VM-400", 4, 600.0, "g"),
    ("VM-400", 5, 400.0, "count"),
];

const MACHINES: &[Machine] = &[
    Machine {
        id: 1,
        location_id: 1,
        name: "Lobby Espresso",
        model: "VM-220",
        demand: &[(1, 14.0), (2, 11.0), (3, 8.0), (4, 3.0), (6, 6.0)],
        serviced_days_ago: 12,
    },
    Machine {
        id: 2,
        location_id: 1,
        name: "Mezzanine Espresso",
        model: "VM-220",
        demand: &[(1, 10.0), (2, 9.0), (3, 6.0), (5, 5.0), (6, 6.0)],
        serviced_days_ago: 30,
    },
    Machine {
        id: 3,
        location_id: 2,
        name: "Concourse Kiosk",
        model: "VM-400",
        demand: &[(1, 18.0), (2, 15.0), (3, 9.0), (4, 7.0), (5, 6.0), (6, 10.0)],
        serviced_days_ago: 100,
    },
];

/// A drop in demand hits machine 2 for the last `DROPOFF_DAYS` observed days
/// so the dropoff monitor has something to find.
const DROPOFF_MACHINE: i64 = 2;
const DROPOFF_DAYS: i64 = 5;
const DROPOFF_FACTOR: f64 = 0.35;

fn weekday_factor(location_id: i64, date: SimDay) -> f64 {
    let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
    match (location_id, weekend) {
        // Office park goes quiet on weekends; the transit hub gets busier.
        (1, true) => 0.45,
        (2, true) => 1.2,
        _ => 1.0,
    }
}

pub fn demo_start_day() -> SimDay {
    NaiveDate::parse_from_str(DEMO_START, "%Y-%m-%d").expect("valid constant date")
}

/// Seed all three source databases with `days` observed days. Existing rows
/// are not cleared; call on fresh databases.
pub fn seed(sources: &SourceHub, seed: u64, days: i64) -> EngineResult<()> {
    sources.create_schema()?;
    seed_facts(sources)?;
    seed_observed(sources, seed, days)?;
    seed_forecast(sources, days)?;
    log::info!(
        "Demo data seeded: {} machines, {days} observed days, seed {seed}",
        MACHINES.len()
    );
    Ok(())
}

fn seed_facts(sources: &SourceHub) -> EngineResult<()> {
    let start = demo_start_day();
    sources.facts.execute(
        "INSERT INTO location (id, name, timezone, region, currency)
         VALUES (1, 'Riverside Office Park', 'America/New_York', 'northeast', 'USD')",
        [],
    )?;
    sources.facts.execute(
        "INSERT INTO location (id, name, timezone, region, currency)
         VALUES (2, 'Harbor Transit Hub', 'Europe/Lisbon', 'iberia', 'EUR')",
        [],
    )?;

    for machine in MACHINES {
        let installed = start - Duration::days(400);
        let serviced = start - Duration::days(machine.serviced_days_ago);
        sources.facts.execute(
            "INSERT INTO machine (id, location_id, name, model, installed_at, last_serviced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                machine.id,
                machine.location_id,
                machine.name,
                machine.model,
                installed,
                serviced
            ],
        )?;
    }
    for product in PRODUCTS {
        sources.facts.execute(
            "INSERT INTO product (id, name, product_group) VALUES (?1, ?2, ?3)",
            params![product.id, product.name, product.group],
        )?;
    }
    for (id, name) in INGREDIENTS {
        sources.facts.execute(
            "INSERT INTO ingredient (id, name) VALUES (?1, ?2)",
            params![id, name],
        )?;
    }
    for (model, ingredient_id, capacity, unit) in CAPACITIES {
        sources.facts.execute(
            "INSERT INTO machine_ingredient_capacity (machine_model, ingredient_id, capacity, unit)
             VALUES (?1, ?2, ?3, ?4)",
            params![model, ingredient_id, capacity, unit],
        )?;
    }
    Ok(())
}

fn product(id: i64) -> &'static Product {
    PRODUCTS
        .iter()
        .find(|p| p.id == id)
        .expect("demand tables only reference known products")
}

fn seed_observed(sources: &SourceHub, seed: u64, days: i64) -> EngineResult<()> {
    let start = demo_start_day();
    let tx = sources.observed.unchecked_transaction()?;
    for machine in MACHINES {
        let mut rng = stream_rng(seed, machine.id as u64);
        for offset in 0..days {
            let date = start + Duration::days(offset);
            let shape = weekday_factor(machine.location_id, date);
            let dropoff =
                if machine.id == DROPOFF_MACHINE && offset >= days - DROPOFF_DAYS {
                    DROPOFF_FACTOR
                } else {
                    1.0
                };

            let mut day_units = 0.0;
            let mut day_revenue = 0.0;
            let mut consumption: Vec<(i64, f64)> = Vec::new();
            for (product_id, base) in machine.demand {
                let noise = 0.8 + rng.gen::<f64>() * 0.4;
                let units = (base * shape * dropoff * noise).round().max(0.0);
                if units == 0.0 {
                    continue;
                }
                let p = product(*product_id);
                let revenue = units * p.price;
                day_units += units;
                day_revenue += revenue;
                tx.execute(
                    "INSERT INTO daily_product_sales
                         (date, location_id, machine_id, product_id, units_sold, revenue, currency)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        date,
                        machine.location_id,
                        machine.id,
                        product_id,
                        units,
                        (revenue * 100.0).round() / 100.0,
                        if machine.location_id == 1 { "USD" } else { "EUR" },
                    ],
                )?;
                for (ingredient_id, per_unit) in p.recipe {
                    match consumption.iter_mut().find(|(id, _)| id == ingredient_id) {
                        Some((_, total)) => *total += per_unit * units,
                        None => consumption.push((*ingredient_id, per_unit * units)),
                    }
                }
            }

            let card_share = 0.5 + rng.gen::<f64>() * 0.4;
            tx.execute(
                "INSERT INTO daily_machine_totals
                     (date, location_id, machine_id, units, revenue, card_share)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    date,
                    machine.location_id,
                    machine.id,
                    day_units,
                    (day_revenue * 100.0).round() / 100.0,
                    (card_share * 1000.0).round() / 1000.0,
                ],
            )?;

            consumption.sort_by_key(|(id, _)| *id);
            for (ingredient_id, qty) in consumption {
                let unit = CAPACITIES
                    .iter()
                    .find(|(model, id, _, _)| *model == machine.model && *id == ingredient_id)
                    .map(|(_, _, _, unit)| *unit)
                    .unwrap_or("g");
                tx.execute(
                    "INSERT INTO daily_ingredient_consumption
                         (date, machine_id, ingredient_id, total_quantity, unit)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![date, machine.id, ingredient_id, qty, unit],
                )?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}

/// The forecast is the noise-free demand shape: weekday-shaped baselines and
/// recipe-derived ingredient draw, extended two weeks past the window.
/// A one-machine, one-ingredient fleet with flat demand. Exact numbers make
/// it the fixture of choice for drawdown and dedup scenario tests.
#[derive(Debug, Clone)]
pub struct MiniFleet {
    pub capacity: f64,
    pub daily_consumption: f64,
    pub daily_units: f64,
    pub observed_days: i64,
}

impl Default for MiniFleet {
    fn default() -> Self {
        Self {
            capacity: 50.0,
            daily_consumption: 8.0,
            daily_units: 10.0,
            observed_days: 30,
        }
    }
}

pub fn seed_mini(sources: &SourceHub, fleet: &MiniFleet) -> EngineResult<()> {
    sources.create_schema()?;
    let start = demo_start_day();

    sources.facts.execute(
        "INSERT INTO location (id, name, timezone, region, currency)
         VALUES (1, 'Test Site', 'UTC', 'test', 'USD')",
        [],
    )?;
    sources.facts.execute(
        "INSERT INTO machine (id, location_id, name, model, installed_at, last_serviced_at)
         VALUES (1, 1, 'Test Machine', 'VM-MINI', ?1, ?1)",
        params![start - Duration::days(30)],
    )?;
    sources.facts.execute(
        "INSERT INTO product (id, name, product_group) VALUES (1, 'Espresso', 'coffee')",
        [],
    )?;
    sources.facts.execute(
        "INSERT INTO ingredient (id, name) VALUES (1, 'Coffee Beans')",
        [],
    )?;
    sources.facts.execute(
        "INSERT INTO machine_ingredient_capacity (machine_model, ingredient_id, capacity, unit)
         VALUES ('VM-MINI', 1, ?1, 'g')",
        params![fleet.capacity],
    )?;

    let tx = sources.observed.unchecked_transaction()?;
    for offset in 0..fleet.observed_days {
        let date = start + Duration::days(offset);
        let revenue = fleet.daily_units * 2.50;
        tx.execute(
            "INSERT INTO daily_machine_totals
                 (date, location_id, machine_id, units, revenue, card_share)
             VALUES (?1, 1, 1, ?2, ?3, 0.6)",
            params![date, fleet.daily_units, revenue],
        )?;
        tx.execute(
            "INSERT INTO daily_product_sales
                 (date, location_id, machine_id, product_id, units_sold, revenue, currency)
             VALUES (?1, 1, 1, 1, ?2, ?3, 'USD')",
            params![date, fleet.daily_units, revenue],
        )?;
        tx.execute(
            "INSERT INTO daily_ingredient_consumption
                 (date, machine_id, ingredient_id, total_quantity, unit)
             VALUES (?1, 1, 1, ?2, 'g')",
            params![date, fleet.daily_consumption],
        )?;
    }
    tx.commit()?;

    sources.forecast.execute(
        "INSERT INTO forecast_run (id, created_at) VALUES (?1, ?2)",
        params![FORECAST_RUN_ID, "2024-03-01T00:00:00Z"],
    )?;
    let tx = sources.forecast.unchecked_transaction()?;
    for offset in 0..fleet.observed_days + FORECAST_HORIZON_DAYS {
        let date = start + Duration::days(offset);
        tx.execute(
            "INSERT INTO daily_product_forecast
                 (run_id, forecast_date, machine_id, product_id, units)
             VALUES (?1, ?2, 1, 1, ?3)",
            params![FORECAST_RUN_ID, date, fleet.daily_units],
        )?;
        tx.execute(
            "INSERT INTO daily_ingredient_forecast
                 (run_id, forecast_date, machine_id, ingredient_id, quantity, unit)
             VALUES (?1, ?2, 1, 1, ?3, 'g')",
            params![FORECAST_RUN_ID, date, fleet.daily_consumption],
        )?;
    }
    tx.commit()?;
    Ok(())
}

fn seed_forecast(sources: &SourceHub, days: i64) -> EngineResult<()> {
    let start = demo_start_day();
    sources.forecast.execute(
        "INSERT INTO forecast_run (id, created_at) VALUES (?1, ?2)",
        params![FORECAST_RUN_ID, "2024-03-01T00:00:00Z"],
    )?;

    let tx = sources.forecast.unchecked_transaction()?;
    for machine in MACHINES {
        for offset in 0..days + FORECAST_HORIZON_DAYS {
            let date = start + Duration::days(offset);
            let shape = weekday_factor(machine.location_id, date);
            let mut consumption: Vec<(i64, f64)> = Vec::new();
            for (product_id, base) in machine.demand {
                let units = ((base * shape) * 10.0).round() / 10.0;
                tx.execute(
                    "INSERT INTO daily_product_forecast
                         (run_id, forecast_date, machine_id, product_id, units)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![FORECAST_RUN_ID, date, machine.id, product_id, units],
                )?;
                let p = product(*product_id);
                for (ingredient_id, per_unit) in p.recipe {
                    match consumption.iter_mut().find(|(id, _)| id == ingredient_id) {
                        Some((_, total)) => *total += per_unit * units,
                        None => consumption.push((*ingredient_id, per_unit * units)),
                    }
                }
            }
            consumption.sort_by_key(|(id, _)| *id);
            for (ingredient_id, qty) in consumption {
                let unit = CAPACITIES
                    .iter()
                    .find(|(model, id, _, _)| *model == machine.model && *id == ingredient_id)
                    .map(|(_, _, _, unit)| *unit)
                    .unwrap_or("g");
                tx.execute(
                    "INSERT INTO daily_ingredient_forecast
                         (run_id, forecast_date, machine_id, ingredient_id, quantity, unit)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        FORECAST_RUN_ID,
                        date,
                        machine.id,
                        ingredient_id,
                        (qty * 10.0).round() / 10.0,
                        unit
                    ],
                )?;
            }
        }
    }
    tx.commit()?;
    Ok(())
}
