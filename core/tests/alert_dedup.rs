mod common;

use common::*;
use vendops_core::config::EngineConfig;
use vendops_core::demo::MiniFleet;
use vendops_core::store::AlertFilter;
use vendops_core::types::AlertStatus;

/// Same evidence every run: cooldown suppression applies across days.
const STEADY: &str =
    r#"result = [alert("test_signal", "HIGH", "steady", "same every day", {"level": 1}, [])]"#;

/// Evidence changes daily (the "day" key is not a volatile key), so every
/// uncooled run overwrites the live row.
const DAILY: &str = r#"result = [alert("test_signal", "HIGH", "daily", "changes daily", {"level": 1, "day": ctx.meta.as_of_date}, [])]"#;

/// Two candidates with the same fingerprint in one run.
const TWICE: &str = r#"
a1 = alert("test_signal", "LOW", "first", "s", {"value": 1}, [])
a2 = alert("test_signal", "LOW", "second", "s", {"value": 2}, [])
result = [a1, a2]
"#;

fn steady_engine(cooldown_days: i64) -> vendops_core::engine::AlertEngine {
    let config = EngineConfig {
        cooldown_days,
        ..full_capacity_config()
    };
    let mut engine = mini_engine(&MiniFleet::default(), config);
    disable_all_scripts_except(&mut engine, "restock_predictor");
    engine
}

#[test]
fn one_live_alert_per_fingerprint_across_days() {
    let mut engine = steady_engine(1);
    activate_inline(&mut engine, "restock_predictor", STEADY);

    for _ in 0..4 {
        engine.advance().unwrap();
    }
    assert_eq!(engine.store().alert_count().unwrap(), 1);
    assert_eq!(engine.store().duplicate_live_fingerprints().unwrap(), 0);
}

#[test]
fn rerunning_the_same_day_is_a_noop() {
    let mut engine = steady_engine(1);
    activate_inline(&mut engine, "restock_predictor", DAILY);

    let first = engine.run_current().unwrap();
    assert_eq!(first.emitted_alerts, 1);
    let alerts_before = engine.list_alerts(&AlertFilter::default()).unwrap();

    let second = engine.run_current().unwrap();
    assert_eq!(second.executed_scripts, 0);
    let alerts_after = engine.list_alerts(&AlertFilter::default()).unwrap();
    assert_eq!(alerts_before.len(), alerts_after.len());
    assert_eq!(alerts_before[0].created_at, alerts_after[0].created_at);
}

#[test]
fn within_cooldown_unchanged_evidence_is_suppressed() {
    let mut engine = steady_engine(5);
    activate_inline(&mut engine, "restock_predictor", STEADY);

    engine.run_current().unwrap();
    let alert = &engine.list_alerts(&AlertFilter::default()).unwrap()[0];
    assert_eq!(alert.run_date, start_day());

    engine.advance().unwrap();
    let summary = engine.run_current().unwrap();
    assert_eq!(summary.emitted_alerts, 0);

    // Still the day-one row, untouched.
    let alert = &engine.list_alerts(&AlertFilter::default()).unwrap()[0];
    assert_eq!(alert.run_date, start_day());
    assert_eq!(engine.store().alert_count().unwrap(), 1);
}

#[test]
fn changed_evidence_overwrites_within_cooldown() {
    let mut engine = steady_engine(5);
    activate_inline(&mut engine, "restock_predictor", DAILY);

    engine.run_current().unwrap();
    let first = engine.list_alerts(&AlertFilter::default()).unwrap()[0].clone();

    engine.advance().unwrap();
    engine.run_current().unwrap();
    let second = engine.list_alerts(&AlertFilter::default()).unwrap()[0].clone();

    assert_eq!(first.alert_id, second.alert_id);
    assert_eq!(second.run_date, day_offset(1));
    assert_eq!(engine.store().alert_count().unwrap(), 1);
}

#[test]
fn second_candidate_same_day_wins() {
    let mut engine = steady_engine(1);
    activate_inline(&mut engine, "restock_predictor", TWICE);

    let summary = engine.run_current().unwrap();
    assert_eq!(summary.emitted_alerts, 2);

    let alerts = engine.list_alerts(&AlertFilter::default()).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].title, "second");
    assert_eq!(alerts[0].evidence.get("value"), Some(&serde_json::json!(2)));
}

#[test]
fn snooze_suppresses_then_lapses_and_reopens() {
    let mut engine = steady_engine(1);
    activate_inline(&mut engine, "restock_predictor", DAILY);

    engine.run_current().unwrap();
    let alert_id = engine.list_alerts(&AlertFilter::default()).unwrap()[0]
        .alert_id
        .clone();

    let outcome = engine.snooze(&alert_id, 2).unwrap();
    assert_eq!(outcome.status, AlertStatus::Snoozed);
    assert_eq!(outcome.snoozed_until, day_offset(2));

    // Day 2: candidate falls inside the suppression window and is dropped.
    engine.advance().unwrap();
    let summary = engine.run_current().unwrap();
    assert_eq!(summary.emitted_alerts, 0);
    let alert = engine.get_alert(&alert_id).unwrap().unwrap();
    assert_eq!(alert.status, AlertStatus::Snoozed);
    assert_eq!(alert.run_date, start_day());

    // Day 3: the window has lapsed; the refreshed candidate reopens the row.
    engine.advance().unwrap();
    let summary = engine.run_current().unwrap();
    assert_eq!(summary.emitted_alerts, 1);
    let alert = engine.get_alert(&alert_id).unwrap().unwrap();
    assert_eq!(alert.status, AlertStatus::Open);
    assert_eq!(alert.run_date, day_offset(2));
    assert_eq!(engine.store().alert_count().unwrap(), 1);
}

#[test]
fn accept_resolves_and_frees_the_fingerprint() {
    let mut engine = steady_engine(1);
    activate_inline(&mut engine, "restock_predictor", DAILY);

    engine.run_current().unwrap();
    let alert_id = engine.list_alerts(&AlertFilter::default()).unwrap()[0]
        .alert_id
        .clone();
    let outcome = engine.accept(&alert_id).unwrap();
    assert_eq!(outcome.status, AlertStatus::Resolved);
    assert!(engine.list_alerts(&AlertFilter::default()).unwrap().is_empty());

    // The next day inserts a fresh row; the resolved one stays history.
    engine.advance().unwrap();
    engine.run_current().unwrap();
    let live = engine.list_alerts(&AlertFilter::default()).unwrap();
    assert_eq!(live.len(), 1);
    assert_ne!(live[0].alert_id, alert_id);
    assert_eq!(engine.store().alert_count().unwrap(), 2);
    assert_eq!(engine.store().duplicate_live_fingerprints().unwrap(), 0);
}
