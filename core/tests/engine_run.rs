mod common;

use common::*;
use vendops_core::demo::MiniFleet;
use vendops_core::engine::RunDiagnostic;
use vendops_core::store::AlertFilter;
use vendops_core::types::Severity;

#[test]
fn demo_day_one_flags_the_overdue_machine() {
    let mut engine = demo_engine(42);
    let summary = engine.run_current().unwrap();

    // 3 machines x 5 baseline scripts.
    assert_eq!(summary.executed_scripts, 15);
    assert!(summary.diagnostics.is_empty());

    let alerts = engine.list_alerts(&AlertFilter::default()).unwrap();
    let service_due = alerts
        .iter()
        .find(|a| a.alert_type == "service_due")
        .expect("machine 3 is 100 days past service with a 110-day interval");
    assert_eq!(service_due.machine_id, Some(3));
    assert_eq!(service_due.severity, Severity::Medium);
}

#[test]
fn demo_restock_risk_fires_as_stock_draws_down() {
    let mut engine = demo_engine(42);
    for _ in 0..5 {
        engine.advance().unwrap();
    }
    let alerts = engine
        .list_alerts(&AlertFilter {
            include_snoozed: true,
            ..AlertFilter::default()
        })
        .unwrap();
    let restock = alerts
        .iter()
        .find(|a| a.alert_type == "restock_risk" && a.machine_id == Some(3))
        .expect("the busy kiosk burns through stock in under a week");
    assert!(restock.ingredient_id.is_some());
    assert!(restock.severity >= Severity::High);
}

#[test]
fn demo_dropoff_monitor_catches_the_demand_drop() {
    let mut engine = demo_engine(42);
    // The drop hits machine 2 over the last five observed days; land on the
    // first of them (a weekday) with a clean baseline week behind it.
    engine.skip(day_offset(25)).unwrap();
    engine.run_current().unwrap();

    let alerts = engine.list_alerts(&AlertFilter::default()).unwrap();
    let dropoff = alerts
        .iter()
        .find(|a| a.alert_type == "machine_dropoff")
        .expect("machine 2 demand fell by ~65% vs its baseline");
    assert_eq!(dropoff.machine_id, Some(2));
}

#[test]
fn a_broken_script_is_isolated_from_the_rest_of_the_run() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    activate_inline(&mut engine, "pricing_anomaly", "result = [1 / 0]");

    let summary = engine.run_current().unwrap();
    // All five scripts were attempted; only the broken one failed.
    assert_eq!(summary.executed_scripts, 5);
    assert_eq!(summary.diagnostics.len(), 1);
    match &summary.diagnostics[0] {
        RunDiagnostic::ScriptError {
            script_name,
            machine_id,
            ..
        } => {
            assert_eq!(script_name, "pricing_anomaly");
            assert_eq!(*machine_id, 1);
        }
        other => panic!("expected a script error, got {other:?}"),
    }
}

#[test]
fn an_invalid_candidate_is_dropped_with_a_diagnostic() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    disable_all_scripts_except(&mut engine, "pricing_anomaly");
    activate_inline(
        &mut engine,
        "pricing_anomaly",
        r#"result = [{"alert_type": "x", "severity": "SEVERE", "title": "t", "summary": "s"}]"#,
    );

    let summary = engine.run_current().unwrap();
    assert_eq!(summary.emitted_alerts, 0);
    assert_eq!(summary.diagnostics.len(), 1);
    assert!(matches!(
        summary.diagnostics[0],
        RunDiagnostic::SchemaViolation { .. }
    ));
    assert_eq!(engine.store().alert_count().unwrap(), 0);
}

#[test]
fn a_runaway_script_is_cut_off_without_crashing() {
    let config = vendops_core::config::EngineConfig {
        script_fuel: 500,
        ..full_capacity_config()
    };
    let mut engine = mini_engine(&MiniFleet::default(), config);
    disable_all_scripts_except(&mut engine, "pricing_anomaly");
    activate_inline(
        &mut engine,
        "pricing_anomaly",
        r#"
        x = 0
        for a in [1, 2, 3, 4, 5, 6, 7, 8, 9, 10] {
            for b in [1, 2, 3, 4, 5, 6, 7, 8, 9, 10] {
                for c in [1, 2, 3, 4, 5, 6, 7, 8, 9, 10] {
                    x = x + 1
                }
            }
        }
        result = []
        "#,
    );

    let summary = engine.run_current().unwrap();
    assert_eq!(summary.emitted_alerts, 0);
    assert_eq!(summary.diagnostics.len(), 1);
    assert!(matches!(
        summary.diagnostics[0],
        RunDiagnostic::ScriptError { .. }
    ));
}
