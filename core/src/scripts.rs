//! The detector-script catalog: baseline scripts shipped with the crate and
//! the revision lifecycle built on top of them.
//!
//! Baselines are embedded at compile time and seeded as the first active
//! revision per script name, so "revert to baseline" is just a revision
//! rollback like any other.

use crate::error::{EngineError, EngineResult};
use crate::sandbox;
use crate::store::{EngineStore, RevisionRow};
use crate::types::RevisionStatus;
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const BASELINE_SCRIPTS: &[(&str, &str)] = &[
    (
        "demand_change_watch",
        include_str!("../scripts/demand_change_watch.vos"),
    ),
    (
        "machine_dropoff_monitor",
        include_str!("../scripts/machine_dropoff_monitor.vos"),
    ),
    (
        "pricing_anomaly",
        include_str!("../scripts/pricing_anomaly.vos"),
    ),
    (
        "restock_predictor",
        include_str!("../scripts/restock_predictor.vos"),
    ),
    (
        "service_due_predictor",
        include_str!("../scripts/service_due_predictor.vos"),
    ),
];

/// Short content digest used as a script version tag on alerts and in
/// comparisons.
pub fn sha12(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}

#[derive(Debug, Clone)]
pub struct ActiveScript {
    pub script_name: String,
    pub source_code: String,
    pub version: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ScriptInfo {
    pub script_name: String,
    pub enabled: bool,
    pub active_revision_id: String,
    pub active_sha: String,
    pub baseline_sha: Option<String>,
}

/// Register the embedded baselines. Scripts that already have revisions are
/// left untouched, so user edits survive restarts.
pub fn seed_baselines(store: &EngineStore) -> EngineResult<()> {
    for (name, code) in BASELINE_SCRIPTS {
        store.ensure_script(name)?;
        if store.revision_count(name)? == 0 {
            store.insert_revision(&RevisionRow {
                revision_id: Uuid::new_v4().to_string(),
                script_name: name.to_string(),
                source_code: code.to_string(),
                status: RevisionStatus::Active,
                note: "baseline".to_string(),
                created_at: Utc::now(),
            })?;
            log::debug!("Seeded baseline revision for script {name}");
        }
    }
    Ok(())
}

/// The enabled scripts with their currently active code, in name order.
pub fn active_scripts(store: &EngineStore) -> EngineResult<Vec<ActiveScript>> {
    let mut out = Vec::new();
    for name in store.script_names()? {
        if !store.script_enabled(&name)? {
            continue;
        }
        let Some(revision) = store.active_revision(&name)? else {
            log::warn!("Script {name} has no active revision; skipping");
            continue;
        };
        out.push(ActiveScript {
            version: sha12(&revision.source_code),
            script_name: name,
            source_code: revision.source_code,
        });
    }
    Ok(out)
}

pub fn list_scripts(store: &EngineStore) -> EngineResult<Vec<ScriptInfo>> {
    let mut out = Vec::new();
    for name in store.script_names()? {
        let Some(revision) = store.active_revision(&name)? else {
            continue;
        };
        let baseline_sha = BASELINE_SCRIPTS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, code)| sha12(code));
        out.push(ScriptInfo {
            enabled: store.script_enabled(&name)?,
            active_revision_id: revision.revision_id,
            active_sha: sha12(&revision.source_code),
            baseline_sha,
            script_name: name,
        });
    }
    Ok(out)
}

/// Store a new draft revision after a parse check. Drafts never run until
/// activated; the check only rejects code the sandbox could not load at all.
pub fn draft_revision(
    store: &EngineStore,
    script_name: &str,
    source_code: &str,
    note: &str,
) -> EngineResult<RevisionRow> {
    if !store
        .script_names()?
        .iter()
        .any(|n| n.as_str() == script_name)
    {
        return Err(EngineError::UnknownScript(script_name.to_string()));
    }
    sandbox::check_source(source_code).map_err(|e| EngineError::ScriptRejected {
        script_name: script_name.to_string(),
        message: e.to_string(),
    })?;
    let revision = RevisionRow {
        revision_id: Uuid::new_v4().to_string(),
        script_name: script_name.to_string(),
        source_code: source_code.to_string(),
        status: RevisionStatus::Draft,
        note: note.to_string(),
        created_at: Utc::now(),
    };
    store.insert_revision(&revision)?;
    Ok(revision)
}
