mod common;

use common::*;
use vendops_core::demo::MiniFleet;
use vendops_core::error::EngineError;
use vendops_core::store::AlertFilter;

const ALWAYS: &str =
    r#"result = [alert("test_signal", "HIGH", "steady", "fires every day", {"level": 1}, [])]"#;

#[test]
fn window_is_derived_from_observed_range() {
    let engine = demo_engine(42);
    assert_eq!(engine.state().start_day, start_day());
    assert_eq!(engine.state().end_day, day_offset(29));
    assert_eq!(engine.state().current_day, start_day());
}

#[test]
fn advance_walks_to_end_then_rejects() {
    let fleet = MiniFleet {
        observed_days: 5,
        ..MiniFleet::default()
    };
    let mut engine = mini_engine(&fleet, full_capacity_config());
    assert_eq!(engine.state().end_day, day_offset(4));

    for _ in 0..4 {
        engine.advance().unwrap();
    }
    assert_eq!(engine.state().current_day, day_offset(4));

    assert!(matches!(
        engine.advance(),
        Err(EngineError::AtEndOfWindow { .. })
    ));
    // Clock unchanged after the rejected call.
    assert_eq!(engine.state().current_day, day_offset(4));
}

#[test]
fn advance_moves_one_day_per_call() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    for n in 1..=6 {
        engine.advance().unwrap();
        assert_eq!(engine.state().current_day, day_offset(n));
    }
}

#[test]
fn skip_validates_the_window() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    assert!(matches!(
        engine.skip(day_offset(40)),
        Err(EngineError::DateOutOfWindow { .. })
    ));
    assert!(matches!(
        engine.skip(day("2024-02-01")),
        Err(EngineError::DateOutOfWindow { .. })
    ));

    engine.skip(day_offset(10)).unwrap();
    assert_eq!(engine.state().current_day, day_offset(10));

    // Skipping backwards inside the window is allowed; history is immutable.
    engine.skip(day_offset(3)).unwrap();
    assert_eq!(engine.state().current_day, day_offset(3));
}

#[test]
fn reset_restores_start_and_clears_runtime() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    disable_all_scripts_except(&mut engine, "restock_predictor");
    activate_inline(&mut engine, "restock_predictor", ALWAYS);

    for _ in 0..3 {
        engine.advance().unwrap();
    }
    assert!(engine.store().alert_count().unwrap() > 0);

    engine.reset().unwrap();
    assert_eq!(engine.state().current_day, start_day());
    assert_eq!(engine.store().alert_count().unwrap(), 0);

    // Inventory is back at the seeded baseline.
    let rows = engine.store().inventory_rows(1, start_day()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].on_hand, 50.0);

    // The run log is gone too: the first day runs scripts again.
    let summary = engine.run_current().unwrap();
    assert!(summary.executed_scripts > 0);
    assert_eq!(
        engine
            .list_alerts(&AlertFilter::default())
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn script_edits_survive_reset() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    let revision_id = activate_inline(&mut engine, "restock_predictor", "result = []");
    engine.reset().unwrap();
    let info = engine
        .list_scripts()
        .unwrap()
        .into_iter()
        .find(|s| s.script_name == "restock_predictor")
        .unwrap();
    assert_eq!(info.active_revision_id, revision_id);
}
