//! ops-runner: headless driver for the vendops alert engine.
//!
//! Usage:
//!   ops-runner --seed 42 --observed-days 30 --advance 7
//!   ops-runner --db-dir ./run-data --advance 3

use anyhow::Result;
use std::env;
use vendops_core::config::EngineConfig;
use vendops_core::demo;
use vendops_core::engine::AlertEngine;
use vendops_core::sources::SourceHub;
use vendops_core::store::{AlertFilter, EngineStore};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let observed_days = parse_arg(&args, "--observed-days", 30i64);
    let advance = parse_arg(&args, "--advance", 7u64);
    let db_dir = args
        .windows(2)
        .find(|w| w[0] == "--db-dir")
        .map(|w| w[1].as_str());

    println!("vendops — ops-runner");
    println!("  seed:          {seed}");
    println!("  observed days: {observed_days}");
    println!("  advance:       {advance}");
    println!("  db dir:        {}", db_dir.unwrap_or(":memory:"));
    println!();

    let (sources, store) = match db_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let sources = SourceHub::open(
                &format!("{dir}/facts.db"),
                &format!("{dir}/observed.db"),
                &format!("{dir}/forecast.db"),
            )?;
            let store = EngineStore::open(&format!("{dir}/engine.db"))?;
            (sources, store)
        }
        None => (SourceHub::in_memory()?, EngineStore::in_memory()?),
    };

    // Fresh databases get the demo fleet; existing ones are left alone.
    if sources.observed_date_range()?.is_none() {
        demo::seed(&sources, seed, observed_days)?;
    }

    let mut engine = AlertEngine::build(EngineConfig::default(), sources, store)?;
    println!(
        "window [{} .. {}], current {}",
        engine.state().start_day,
        engine.state().end_day,
        engine.state().current_day
    );

    for _ in 0..advance {
        if engine.state().at_end() {
            println!("Reached end of window at {}", engine.state().current_day);
            break;
        }
        let outcome = engine.advance()?;
        println!(
            "ran {} | scripts {:3} | alerts {:2} | diagnostics {}",
            outcome.summary.run_date,
            outcome.summary.executed_scripts,
            outcome.summary.emitted_alerts,
            outcome.summary.diagnostics.len(),
        );
    }

    print_open_alerts(&engine)?;
    print_inventory(&engine)?;
    Ok(())
}

fn print_open_alerts(engine: &AlertEngine) -> Result<()> {
    let alerts = engine.list_alerts(&AlertFilter {
        include_snoozed: true,
        ..AlertFilter::default()
    })?;
    println!();
    println!("=== OPEN ALERTS ({}) ===", alerts.len());
    for alert in alerts {
        println!(
            "  [{:8}] {:26} machine {:?} | {} | {}",
            alert.severity.as_str(),
            alert.alert_type,
            alert.machine_id,
            alert.run_date,
            alert.title,
        );
    }
    Ok(())
}

fn print_inventory(engine: &AlertEngine) -> Result<()> {
    let day = engine.state().current_day;
    println!();
    println!("=== INVENTORY ({day}) ===");
    for machine in engine.machines()? {
        println!("  {} ({})", machine.machine_name, machine.location_name);
        for row in engine.store().inventory_rows(machine.machine_id, day)? {
            let capacity = row
                .capacity
                .map(|c| format!("{c:.0}"))
                .unwrap_or_else(|| "?".into());
            println!(
                "    ingredient {:2}: {:7.1} / {capacity} {} ({})",
                row.ingredient_id, row.on_hand, row.unit, row.source
            );
        }
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
