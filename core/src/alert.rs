//! Alert identity, candidates, and the dedup merge decision.
//!
//! A fingerprint names an alert's logical identity (script, type, scope) and
//! drives dedup; it is distinct from the storage row id. The merge decision
//! is a pure function so the cooldown/suppression rules are unit-testable
//! without a database.

use crate::types::{
    ActionType, AlertStatus, IngredientId, LocationId, MachineId, ProductId, Severity, SimDay,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub action_type: ActionType,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// A schema-validated candidate emitted by one script run. Not yet an alert:
/// the dedup engine decides whether it inserts, overwrites, or is dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub alert_type: String,
    pub severity: Severity,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub evidence: Map<String, Value>,
    #[serde(default)]
    pub recommended_actions: Vec<RecommendedAction>,
    pub location_id: LocationId,
    pub machine_id: Option<MachineId>,
    pub product_id: Option<ProductId>,
    pub ingredient_id: Option<IngredientId>,
}

/// The stored alert row.
#[derive(Debug, Clone, Serialize)]
pub struct AlertRow {
    pub alert_id: String,
    pub created_at: DateTime<Utc>,
    pub run_date: SimDay,
    pub script_name: String,
    pub script_version: String,
    pub fingerprint: String,
    pub evidence_hash: String,
    pub severity: Severity,
    pub alert_type: String,
    pub location_id: LocationId,
    pub machine_id: Option<MachineId>,
    pub product_id: Option<ProductId>,
    pub ingredient_id: Option<IngredientId>,
    pub title: String,
    pub summary: String,
    pub evidence: Map<String, Value>,
    pub recommended_actions: Vec<RecommendedAction>,
    pub status: AlertStatus,
    pub snoozed_until: Option<SimDay>,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Stable hash of (script_name, alert_type, scope ids). serde_json's default
/// map is ordered, so serialization is canonical.
pub fn fingerprint(script_name: &str, candidate: &AlertCandidate) -> String {
    let identity = serde_json::json!({
        "script_name": script_name,
        "alert_type": candidate.alert_type,
        "location_id": candidate.location_id,
        "machine_id": candidate.machine_id,
        "product_id": candidate.product_id,
        "ingredient_id": candidate.ingredient_id,
    });
    sha256_hex(identity.to_string().as_bytes())
}

/// Keys excluded from the stable evidence hash. These move every run without
/// the alert meaning anything new.
fn is_volatile_key(key: &str) -> bool {
    key.ends_with("_date") || key.ends_with("_at") || key == "date" || key == "timestamp"
}

/// Hash of the non-volatile subset of evidence. Two candidates with equal
/// stable hashes are "materially unchanged" for cooldown purposes.
pub fn stable_evidence_hash(evidence: &Map<String, Value>) -> String {
    let stable: Map<String, Value> = evidence
        .iter()
        .filter(|(k, _)| !is_volatile_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    sha256_hex(Value::Object(stable).to_string().as_bytes())
}

/// What the dedup engine does with a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// No live alert with this fingerprint: insert a new OPEN row.
    Insert,
    /// Live alert exists and the candidate is meaningful: refresh content in
    /// place, keeping the row id.
    Overwrite,
    /// Live alert exists, cooldown is active, and the stable evidence is
    /// unchanged: drop the candidate silently.
    Suppress,
}

/// The dedup rule over (existing live alert, candidate). `existing` must be
/// the OPEN or SNOOZED row for the candidate's fingerprint, if any.
pub fn decide_merge(
    existing: Option<&AlertRow>,
    run_date: SimDay,
    candidate_evidence_hash: &str,
    cooldown_days: i64,
) -> MergeDecision {
    let Some(current) = existing else {
        return MergeDecision::Insert;
    };
    let within_cooldown = (run_date - current.run_date).num_days() < cooldown_days;
    if within_cooldown && current.evidence_hash == candidate_evidence_hash {
        return MergeDecision::Suppress;
    }
    MergeDecision::Overwrite
}

/// Status after an overwrite: a lapsed snooze reopens the alert, an active
/// snooze keeps it snoozed with refreshed content.
pub fn status_after_overwrite(current: &AlertRow, run_date: SimDay) -> (AlertStatus, Option<SimDay>) {
    match (current.status, current.snoozed_until) {
        (AlertStatus::Snoozed, Some(until)) if until > run_date => {
            (AlertStatus::Snoozed, Some(until))
        }
        _ => (AlertStatus::Open, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(s: &str) -> SimDay {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn candidate() -> AlertCandidate {
        AlertCandidate {
            alert_type: "restock_risk".into(),
            severity: Severity::High,
            title: "t".into(),
            summary: "s".into(),
            evidence: Map::new(),
            recommended_actions: vec![],
            location_id: 1,
            machine_id: Some(2),
            product_id: None,
            ingredient_id: Some(7),
        }
    }

    fn row(run_date: &str, evidence_hash: &str, status: AlertStatus) -> AlertRow {
        AlertRow {
            alert_id: "a-1".into(),
            created_at: Utc::now(),
            run_date: day(run_date),
            script_name: "restock_predictor".into(),
            script_version: "abc".into(),
            fingerprint: "fp".into(),
            evidence_hash: evidence_hash.into(),
            severity: Severity::High,
            alert_type: "restock_risk".into(),
            location_id: 1,
            machine_id: Some(2),
            product_id: None,
            ingredient_id: Some(7),
            title: "t".into(),
            summary: "s".into(),
            evidence: Map::new(),
            recommended_actions: vec![],
            status,
            snoozed_until: None,
        }
    }

    #[test]
    fn fingerprint_ignores_content_fields() {
        let mut a = candidate();
        let fp1 = fingerprint("restock_predictor", &a);
        a.title = "different title".into();
        a.severity = Severity::Low;
        assert_eq!(fp1, fingerprint("restock_predictor", &a));
        a.ingredient_id = Some(8);
        assert_ne!(fp1, fingerprint("restock_predictor", &a));
    }

    #[test]
    fn stable_hash_excludes_volatile_keys() {
        let mut e1 = Map::new();
        e1.insert("qty_on_hand".into(), serde_json::json!(12.0));
        e1.insert("snapshot_date".into(), serde_json::json!("2024-03-01"));
        let mut e2 = e1.clone();
        e2.insert("snapshot_date".into(), serde_json::json!("2024-03-02"));
        assert_eq!(stable_evidence_hash(&e1), stable_evidence_hash(&e2));

        e2.insert("qty_on_hand".into(), serde_json::json!(4.0));
        assert_ne!(stable_evidence_hash(&e1), stable_evidence_hash(&e2));
    }

    #[test]
    fn merge_inserts_without_existing() {
        assert_eq!(
            decide_merge(None, day("2024-03-05"), "h", 1),
            MergeDecision::Insert
        );
    }

    #[test]
    fn merge_suppresses_within_cooldown_when_unchanged() {
        let existing = row("2024-03-05", "h", AlertStatus::Open);
        assert_eq!(
            decide_merge(Some(&existing), day("2024-03-05"), "h", 1),
            MergeDecision::Suppress
        );
        // Evidence changed: overwrite even inside the cooldown.
        assert_eq!(
            decide_merge(Some(&existing), day("2024-03-05"), "other", 1),
            MergeDecision::Overwrite
        );
        // Cooldown elapsed: overwrite even when unchanged.
        assert_eq!(
            decide_merge(Some(&existing), day("2024-03-06"), "h", 1),
            MergeDecision::Overwrite
        );
    }

    #[test]
    fn overwrite_respects_active_snooze() {
        let mut existing = row("2024-03-05", "h", AlertStatus::Snoozed);
        existing.snoozed_until = Some(day("2024-03-09"));
        let (status, until) = status_after_overwrite(&existing, day("2024-03-07"));
        assert_eq!(status, AlertStatus::Snoozed);
        assert_eq!(until, Some(day("2024-03-09")));

        let (status, until) = status_after_overwrite(&existing, day("2024-03-09"));
        assert_eq!(status, AlertStatus::Open);
        assert_eq!(until, None);
    }
}
