mod common;

use common::*;
use vendops_core::demo::MiniFleet;
use vendops_core::error::EngineError;
use vendops_core::inventory::InventoryProgressor;
use vendops_core::store::AlertFilter;
use vendops_core::types::AlertStatus;

const RESTOCK_ALERT: &str = r#"
result = [alert("restock_risk", "HIGH", "low stock", "needs a refill",
                {"level": 1},
                [["RESTOCK_MACHINE", {}]])]
"#;

#[test]
fn drawdown_scenario_hits_26_then_clamps_at_zero() {
    // Capacity 50, daily predicted consumption 8, seeded at capacity.
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());

    for _ in 0..3 {
        engine.advance().unwrap();
    }
    let rows = engine.store().inventory_rows(1, day_offset(3)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].on_hand, 26.0);

    for _ in 0..6 {
        engine.advance().unwrap();
    }
    let rows = engine.store().inventory_rows(1, day_offset(9)).unwrap();
    assert_eq!(rows[0].on_hand, 0.0);
}

#[test]
fn on_hand_always_within_zero_and_capacity() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    for n in 1..=12 {
        engine.advance().unwrap();
        for row in engine.store().inventory_rows(1, day_offset(n)).unwrap() {
            assert!(row.on_hand >= 0.0, "negative on-hand on day {n}");
            let capacity = row.capacity.unwrap();
            assert!(row.on_hand <= capacity, "over capacity on day {n}");
        }
    }
}

#[test]
fn skip_matches_sequential_advances() {
    let fleet = MiniFleet {
        daily_consumption: 3.0,
        ..MiniFleet::default()
    };

    let mut stepped = mini_engine(&fleet, full_capacity_config());
    for _ in 0..10 {
        stepped.advance().unwrap();
    }

    let mut skipped = mini_engine(&fleet, full_capacity_config());
    skipped.skip(day_offset(10)).unwrap();

    let a = stepped.store().inventory_rows(1, day_offset(10)).unwrap();
    let b = skipped.store().inventory_rows(1, day_offset(10)).unwrap();
    assert_eq!(a.len(), b.len());
    assert_eq!(a[0].on_hand, b[0].on_hand);
    assert_eq!(a[0].on_hand, 20.0);
}

#[test]
fn out_of_order_advance_is_rejected() {
    let engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    let progressor =
        InventoryProgressor::new(engine.store(), engine.sources(), engine.config());
    let result = progressor.advance_day(1, day_offset(5));
    match result {
        Err(EngineError::OutOfOrderAdvance {
            machine_id,
            expected,
            got,
        }) => {
            assert_eq!(machine_id, 1);
            assert_eq!(expected, day_offset(1));
            assert_eq!(got, day_offset(5));
        }
        other => panic!("expected OutOfOrderAdvance, got {other:?}"),
    }
}

#[test]
fn advancing_an_existing_day_is_a_noop() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    engine.advance().unwrap();
    let before = engine.store().inventory_rows(1, day_offset(1)).unwrap();

    let progressor =
        InventoryProgressor::new(engine.store(), engine.sources(), engine.config());
    progressor.advance_day(1, day_offset(1)).unwrap();

    let after = engine.store().inventory_rows(1, day_offset(1)).unwrap();
    assert_eq!(before, after);
}

#[test]
fn accepted_restock_tops_up_next_day() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    disable_all_scripts_except(&mut engine, "restock_predictor");
    activate_inline(&mut engine, "restock_predictor", RESTOCK_ALERT);

    engine.run_current().unwrap();
    let alert_id = engine.list_alerts(&AlertFilter::default()).unwrap()[0]
        .alert_id
        .clone();
    let outcome = engine.accept(&alert_id).unwrap();
    assert_eq!(outcome.status, AlertStatus::Resolved);
    assert_eq!(outcome.actions.len(), 1);
    assert!(outcome.actions[0].scheduled);
    assert_eq!(outcome.actions[0].effective_date, day_offset(1));

    engine.advance().unwrap();
    let rows = engine.store().inventory_rows(1, day_offset(1)).unwrap();
    // Drawdown then top-up: the restock wins.
    assert_eq!(rows[0].on_hand, 50.0);
    assert_eq!(rows[0].source, "restock");
}

#[test]
fn direct_restock_schedule_is_deduplicated() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    let first = engine.schedule_machine_restock(1).unwrap();
    assert!(first.scheduled);
    let second = engine.schedule_machine_restock(1).unwrap();
    assert!(!second.scheduled);
}
