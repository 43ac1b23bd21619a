//! Alert and suppression queries.

use super::EngineStore;
use crate::alert::{AlertRow, RecommendedAction};
use crate::error::{EngineError, EngineResult};
use crate::types::{AlertStatus, LocationId, MachineId, Severity, SimDay};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde_json::{Map, Value};

const ALERT_COLUMNS: &str = "alert_id, created_at, run_date, script_name, script_version,
     fingerprint, evidence_hash, severity, alert_type, location_id, machine_id,
     product_id, ingredient_id, title, summary, evidence_json,
     recommended_actions_json, status, snoozed_until";

fn row_to_alert(r: &Row<'_>) -> rusqlite::Result<AlertRow> {
    let severity: String = r.get(7)?;
    let status: String = r.get(17)?;
    let evidence_json: String = r.get(15)?;
    let actions_json: String = r.get(16)?;
    Ok(AlertRow {
        alert_id: r.get(0)?,
        created_at: r.get(1)?,
        run_date: r.get(2)?,
        script_name: r.get(3)?,
        script_version: r.get(4)?,
        fingerprint: r.get(5)?,
        evidence_hash: r.get(6)?,
        severity: Severity::parse(&severity).unwrap_or(Severity::Low),
        alert_type: r.get(8)?,
        location_id: r.get(9)?,
        machine_id: r.get(10)?,
        product_id: r.get(11)?,
        ingredient_id: r.get(12)?,
        title: r.get(13)?,
        summary: r.get(14)?,
        evidence: serde_json::from_str::<Map<String, Value>>(&evidence_json)
            .unwrap_or_default(),
        recommended_actions: serde_json::from_str::<Vec<RecommendedAction>>(&actions_json)
            .unwrap_or_default(),
        status: AlertStatus::parse(&status).unwrap_or(AlertStatus::Open),
        snoozed_until: r.get(18)?,
    })
}

/// Filters for the `list` surface exposed to the API layer.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub location_id: Option<LocationId>,
    pub include_snoozed: bool,
    pub limit: Option<i64>,
}

impl EngineStore {
    /// The live (OPEN or SNOOZED) alert for a fingerprint, if any. The dedup
    /// invariant guarantees at most one.
    pub fn live_alert_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> EngineResult<Option<AlertRow>> {
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alert
             WHERE fingerprint = ?1 AND status IN ('OPEN', 'SNOOZED')
             ORDER BY created_at DESC LIMIT 1"
        );
        let row = self
            .conn
            .query_row(&sql, params![fingerprint], row_to_alert)
            .optional()?;
        Ok(row)
    }

    pub fn insert_alert(&self, alert: &AlertRow) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO alert (alert_id, created_at, run_date, script_name,
                 script_version, fingerprint, evidence_hash, severity, alert_type,
                 location_id, machine_id, product_id, ingredient_id, title, summary,
                 evidence_json, recommended_actions_json, status, snoozed_until)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18, ?19)",
            params![
                alert.alert_id,
                alert.created_at,
                alert.run_date,
                alert.script_name,
                alert.script_version,
                alert.fingerprint,
                alert.evidence_hash,
                alert.severity.as_str(),
                alert.alert_type,
                alert.location_id,
                alert.machine_id,
                alert.product_id,
                alert.ingredient_id,
                alert.title,
                alert.summary,
                Value::Object(alert.evidence.clone()).to_string(),
                serde_json::to_string(&alert.recommended_actions)?,
                alert.status.as_str(),
                alert.snoozed_until,
            ],
        )?;
        Ok(())
    }

    /// Overwrite the content of an existing row, keeping its alert_id.
    pub fn update_alert(&self, alert: &AlertRow) -> EngineResult<()> {
        let updated = self.conn.execute(
            "UPDATE alert SET created_at = ?2, run_date = ?3, script_name = ?4,
                 script_version = ?5, fingerprint = ?6, evidence_hash = ?7,
                 severity = ?8, alert_type = ?9, location_id = ?10, machine_id = ?11,
                 product_id = ?12, ingredient_id = ?13, title = ?14, summary = ?15,
                 evidence_json = ?16, recommended_actions_json = ?17, status = ?18,
                 snoozed_until = ?19
             WHERE alert_id = ?1",
            params![
                alert.alert_id,
                alert.created_at,
                alert.run_date,
                alert.script_name,
                alert.script_version,
                alert.fingerprint,
                alert.evidence_hash,
                alert.severity.as_str(),
                alert.alert_type,
                alert.location_id,
                alert.machine_id,
                alert.product_id,
                alert.ingredient_id,
                alert.title,
                alert.summary,
                Value::Object(alert.evidence.clone()).to_string(),
                serde_json::to_string(&alert.recommended_actions)?,
                alert.status.as_str(),
                alert.snoozed_until,
            ],
        )?;
        if updated == 0 {
            return Err(EngineError::UnknownAlert(alert.alert_id.clone()));
        }
        Ok(())
    }

    pub fn get_alert(&self, alert_id: &str) -> EngineResult<Option<AlertRow>> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alert WHERE alert_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![alert_id], row_to_alert)
            .optional()?;
        Ok(row)
    }

    pub fn list_alerts(&self, filter: &AlertFilter) -> EngineResult<Vec<AlertRow>> {
        let mut sql = format!("SELECT {ALERT_COLUMNS} FROM alert WHERE 1 = 1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(status.as_str().to_string()));
        } else if filter.include_snoozed {
            sql.push_str(" AND status IN ('OPEN', 'SNOOZED')");
        } else {
            sql.push_str(" AND status = 'OPEN'");
        }
        if let Some(location_id) = filter.location_id {
            sql.push_str(" AND location_id = ?");
            args.push(Box::new(location_id));
        }
        sql.push_str(" ORDER BY created_at DESC, alert_id LIMIT ?");
        args.push(Box::new(filter.limit.unwrap_or(200)));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_alert,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_alert_status(
        &self,
        alert_id: &str,
        status: AlertStatus,
        snoozed_until: Option<SimDay>,
    ) -> EngineResult<()> {
        let updated = self.conn.execute(
            "UPDATE alert SET status = ?2, snoozed_until = ?3 WHERE alert_id = ?1",
            params![alert_id, status.as_str(), snoozed_until],
        )?;
        if updated == 0 {
            return Err(EngineError::UnknownAlert(alert_id.to_string()));
        }
        Ok(())
    }

    pub fn alert_count(&self) -> EngineResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM alert", [], |r| r.get(0))?)
    }

    /// Count of live alerts per fingerprint above one — zero when the dedup
    /// invariant holds. Exposed for tests and health checks.
    pub fn duplicate_live_fingerprints(&self) -> EngineResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM (
                 SELECT fingerprint FROM alert
                 WHERE status IN ('OPEN', 'SNOOZED')
                 GROUP BY fingerprint HAVING COUNT(*) > 1
             )",
            [],
            |r| r.get(0),
        )?)
    }

    // ── Suppressions ───────────────────────────────────────────

    /// True when a suppression window covers (location, machine, alert_type)
    /// on `day`. Snoozing writes these; candidates matching one are dropped.
    pub fn is_suppressed(
        &self,
        location_id: LocationId,
        machine_id: Option<MachineId>,
        alert_type: &str,
        day: SimDay,
    ) -> EngineResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM alert_suppression
             WHERE location_id = ?1 AND machine_id IS ?2 AND alert_type = ?3
               AND suppressed_until > ?4",
            params![location_id, machine_id, alert_type, day],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Extend (never shorten) the suppression window for a scope.
    pub fn upsert_suppression(
        &self,
        location_id: LocationId,
        machine_id: Option<MachineId>,
        alert_type: &str,
        until: SimDay,
    ) -> EngineResult<SimDay> {
        let now = Utc::now();
        let existing: Option<(i64, SimDay)> = self
            .conn
            .query_row(
                "SELECT id, suppressed_until FROM alert_suppression
                 WHERE location_id = ?1 AND machine_id IS ?2 AND alert_type = ?3",
                params![location_id, machine_id, alert_type],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        match existing {
            Some((id, current)) => {
                let effective = current.max(until);
                self.conn.execute(
                    "UPDATE alert_suppression SET suppressed_until = ?2, updated_at = ?3
                     WHERE id = ?1",
                    params![id, effective, now],
                )?;
                Ok(effective)
            }
            None => {
                self.conn.execute(
                    "INSERT INTO alert_suppression
                         (location_id, machine_id, alert_type, suppressed_until,
                          created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    params![location_id, machine_id, alert_type, until, now],
                )?;
                Ok(until)
            }
        }
    }
}
