mod common;

use common::*;
use vendops_core::demo::MiniFleet;
use vendops_core::error::EngineError;
use vendops_core::types::RevisionStatus;

const NEVER: &str = "result = []";
const ALWAYS: &str =
    r#"result = [alert("test_signal", "HIGH", "always", "fires", {"level": 1}, [])]"#;

#[test]
fn draft_activate_revert_lifecycle() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    let script = "restock_predictor";

    let baseline = engine
        .list_scripts()
        .unwrap()
        .into_iter()
        .find(|s| s.script_name == script)
        .unwrap();
    assert_eq!(Some(baseline.active_sha.clone()), baseline.baseline_sha);

    let draft = engine.draft_script_revision(script, NEVER, "mute it").unwrap();
    assert_eq!(draft.status, RevisionStatus::Draft);

    engine
        .activate_script_revision(script, &draft.revision_id)
        .unwrap();
    let info = engine
        .list_scripts()
        .unwrap()
        .into_iter()
        .find(|s| s.script_name == script)
        .unwrap();
    assert_eq!(info.active_revision_id, draft.revision_id);
    assert_ne!(Some(info.active_sha), info.baseline_sha);

    // The superseded baseline is still on disk; revert restores it.
    let reverted = engine.revert_script(script).unwrap().unwrap();
    assert_eq!(reverted.revision_id, baseline.active_revision_id);
    let info = engine
        .list_scripts()
        .unwrap()
        .into_iter()
        .find(|s| s.script_name == script)
        .unwrap();
    assert_eq!(Some(info.active_sha), info.baseline_sha);

    // The demoted edit survives as a draft and can be re-activated.
    let statuses: Vec<RevisionStatus> = engine
        .store()
        .list_revisions(script)
        .unwrap()
        .into_iter()
        .map(|r| r.status)
        .collect();
    assert!(statuses.contains(&RevisionStatus::Draft));
}

#[test]
fn activation_requires_a_known_revision() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    assert!(matches!(
        engine.activate_script_revision("restock_predictor", "nope"),
        Err(EngineError::UnknownRevision { .. })
    ));
}

#[test]
fn compare_is_deterministic_and_never_persists() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    activate_inline(&mut engine, "restock_predictor", NEVER);

    for _ in 0..3 {
        engine.advance().unwrap();
    }
    let alerts_before = engine.store().alert_count().unwrap();
    let inventory_before = engine.store().inventory_rows(1, day_offset(3)).unwrap();

    let first = engine
        .compare("restock_predictor", ALWAYS, start_day(), day_offset(3))
        .unwrap();
    let second = engine
        .compare("restock_predictor", ALWAYS, start_day(), day_offset(3))
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );

    assert_eq!(first.total_days, 4);
    assert_eq!(first.active_total_alerts, 0);
    assert_eq!(first.candidate_total_alerts, 4);
    assert_eq!(first.active_days_triggered, 0);
    assert_eq!(first.candidate_days_triggered, 4);
    assert_eq!(first.changed_days.len(), 4);
    assert_eq!(first.changed_days[0].date, start_day());
    assert_ne!(first.active_version, first.candidate_version);

    // Pure aggregates: no alert or inventory rows were touched.
    assert_eq!(engine.store().alert_count().unwrap(), alerts_before);
    assert_eq!(
        engine.store().inventory_rows(1, day_offset(3)).unwrap(),
        inventory_before
    );
}

#[test]
fn compare_validates_inputs() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());

    assert!(matches!(
        engine.compare("restock_predictor", "if {", start_day(), start_day()),
        Err(EngineError::ScriptRejected { .. })
    ));
    assert!(matches!(
        engine.compare("restock_predictor", NEVER, day_offset(3), start_day()),
        Err(EngineError::InvalidDateRange(_))
    ));
    assert!(matches!(
        engine.compare("no_such_script", NEVER, start_day(), start_day()),
        Err(EngineError::UnknownScript(_))
    ));
}

#[test]
fn compare_revision_replays_the_elapsed_window() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    activate_inline(&mut engine, "restock_predictor", NEVER);
    for _ in 0..2 {
        engine.advance().unwrap();
    }

    let draft = engine
        .draft_script_revision("restock_predictor", ALWAYS, "louder")
        .unwrap();
    let comparison = engine
        .compare_revision("restock_predictor", &draft.revision_id)
        .unwrap();
    assert_eq!(comparison.total_days, 3);
    assert_eq!(comparison.candidate_total_alerts, 3);
    assert_eq!(comparison.active_total_alerts, 0);
}

#[test]
fn a_failing_candidate_surfaces_as_compare_failure() {
    let mut engine = mini_engine(&MiniFleet::default(), full_capacity_config());
    // Parses fine, dies at runtime.
    let broken = "result = [1 / 0]";
    assert!(matches!(
        engine.compare("restock_predictor", broken, start_day(), start_day()),
        Err(EngineError::CompareFailed { .. })
    ));
}
