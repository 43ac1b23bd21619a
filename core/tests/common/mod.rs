#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use vendops_core::config::EngineConfig;
use vendops_core::demo::{self, MiniFleet};
use vendops_core::engine::AlertEngine;
use vendops_core::sources::SourceHub;
use vendops_core::store::EngineStore;
use vendops_core::types::SimDay;

/// In-memory engine over the one-machine mini fleet.
pub fn mini_engine(fleet: &MiniFleet, config: EngineConfig) -> AlertEngine {
    let sources = SourceHub::in_memory().unwrap();
    demo::seed_mini(&sources, fleet).unwrap();
    let store = EngineStore::in_memory().unwrap();
    AlertEngine::build(config, sources, store).unwrap()
}

/// In-memory engine over the full demo fleet.
pub fn demo_engine(seed: u64) -> AlertEngine {
    let sources = SourceHub::in_memory().unwrap();
    demo::seed(&sources, seed, 30).unwrap();
    let store = EngineStore::in_memory().unwrap();
    AlertEngine::build(EngineConfig::default_test(), sources, store).unwrap()
}

/// Test config seeding inventory at full capacity, so drawdown arithmetic
/// starts from round numbers.
pub fn full_capacity_config() -> EngineConfig {
    EngineConfig {
        seed_fill_ratio: 1.0,
        ..EngineConfig::default_test()
    }
}

pub fn start_day() -> SimDay {
    demo::demo_start_day()
}

pub fn day_offset(days: i64) -> SimDay {
    start_day() + Duration::days(days)
}

pub fn day(s: &str) -> SimDay {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Leave only `keep` enabled so a test controls exactly what runs.
pub fn disable_all_scripts_except(engine: &mut AlertEngine, keep: &str) {
    for info in engine.list_scripts().unwrap() {
        if info.script_name != keep {
            engine
                .set_script_enabled(&info.script_name, false)
                .unwrap();
        }
    }
}

/// Draft `source` on `script_name` and activate it immediately.
pub fn activate_inline(engine: &mut AlertEngine, script_name: &str, source: &str) -> String {
    let draft = engine
        .draft_script_revision(script_name, source, "test")
        .unwrap();
    engine
        .activate_script_revision(script_name, &draft.revision_id)
        .unwrap();
    draft.revision_id
}
