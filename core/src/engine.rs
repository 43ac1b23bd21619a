//! The alert engine — clock operations, the daily run loop, and the alert
//! dedup/lifecycle surface exposed to the API layer.
//!
//! RULES:
//!   - Clock mutations (run_current, advance, skip, reset) are serialised by
//!     the run guard; a concurrent caller gets ConflictingOperation.
//!   - Failures local to one machine or one script never abort the day's
//!     run for other machines and scripts.
//!   - Re-running the same day is a no-op, guarded by the run log.

use crate::alert::{self, AlertCandidate, AlertRow};
use crate::clock::{EngineState, RunGuard};
use crate::config::EngineConfig;
use crate::context::ContextBuilder;
use crate::error::{EngineError, EngineResult};
use crate::inventory::{InventoryProgressor, RESTOCK_MODE_KEY, RESTOCK_TOP_UP};
use crate::sandbox::{self, ExecLimits};
use crate::scripts::{self, ActiveScript, ScriptInfo};
use crate::sources::{MachineMeta, SourceHub};
use crate::store::{AlertFilter, EngineStore, ManagerActionRow, RevisionRow, RunLogRow};
use crate::types::{ActionType, AlertStatus, LocationId, MachineId, SimDay};
use chrono::Duration;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunDiagnostic {
    /// A script raised, timed out, or returned a malformed result. The run
    /// continues; the script contributed zero alerts on this machine.
    ScriptError {
        script_name: String,
        machine_id: MachineId,
        message: String,
    },
    /// A candidate failed schema validation and was dropped.
    SchemaViolation {
        script_name: String,
        machine_id: MachineId,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_date: SimDay,
    pub executed_scripts: i64,
    pub emitted_alerts: i64,
    pub diagnostics: Vec<RunDiagnostic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Overwritten,
    Suppressed,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueuedAction {
    pub action_type: ActionType,
    pub machine_id: Option<MachineId>,
    pub effective_date: SimDay,
    pub scheduled: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AcceptOutcome {
    pub alert_id: String,
    pub status: AlertStatus,
    pub actions: Vec<QueuedAction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnoozeOutcome {
    pub alert_id: String,
    pub status: AlertStatus,
    pub snoozed_until: SimDay,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdvanceOutcome {
    pub state: EngineState,
    pub summary: RunSummary,
}

pub struct AlertEngine {
    pub(crate) config: EngineConfig,
    pub(crate) sources: SourceHub,
    pub(crate) store: EngineStore,
    pub(crate) state: EngineState,
    pub(crate) guard: RunGuard,
    pub(crate) ctx_cache: HashMap<(SimDay, MachineId), Arc<Value>>,
}

impl AlertEngine {
    /// Build a fully wired engine: migrate the store, seed the baseline
    /// scripts, derive (or load) the day window, seed inventory.
    pub fn build(
        config: EngineConfig,
        sources: SourceHub,
        store: EngineStore,
    ) -> EngineResult<Self> {
        store.migrate()?;
        scripts::seed_baselines(&store)?;

        let state = match store.engine_state()? {
            Some(state) => state,
            None => {
                let (min_day, max_day) = sources.observed_date_range()?.ok_or_else(|| {
                    anyhow::anyhow!("observed database has no data; cannot derive a window")
                })?;
                let start = min_day
                    .max(max_day - Duration::days(config.simulation_window_days - 1));
                let state = EngineState::new(start, max_day);
                store.save_engine_state(&state)?;
                log::info!(
                    "Derived simulation window [{}, {}]",
                    state.start_day,
                    state.end_day
                );
                state
            }
        };

        let engine = Self {
            config,
            sources,
            store,
            state,
            guard: RunGuard::new(),
            ctx_cache: HashMap::new(),
        };
        let progressor =
            InventoryProgressor::new(&engine.store, &engine.sources, &engine.config);
        progressor.seed_baseline(engine.state.start_day)?;
        Ok(engine)
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn store(&self) -> &EngineStore {
        &self.store
    }

    pub fn sources(&self) -> &SourceHub {
        &self.sources
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn machines(&self) -> EngineResult<Vec<MachineMeta>> {
        self.sources.machines()
    }

    pub(crate) fn limits(&self) -> ExecLimits {
        ExecLimits {
            fuel: self.config.script_fuel,
            timeout: std::time::Duration::from_millis(self.config.script_timeout_ms),
        }
    }

    // ── Clock operations ───────────────────────────────────────

    /// Run every enabled script for every machine on the current day. A day
    /// that already ran is a no-op.
    pub fn run_current(&mut self) -> EngineResult<RunSummary> {
        let _permit = self.guard.acquire()?;
        self.run_for_day(self.state.current_day)
    }

    /// Run the current day, then move the clock one day forward and advance
    /// inventory into the new day. Rejected at the end of the window before
    /// anything runs.
    pub fn advance(&mut self) -> EngineResult<AdvanceOutcome> {
        let _permit = self.guard.acquire()?;
        if self.state.at_end() {
            return Err(EngineError::AtEndOfWindow {
                end_day: self.state.end_day,
            });
        }
        let summary = self.run_for_day(self.state.current_day)?;
        let new_day = self.state.advance()?;
        self.store.save_engine_state(&self.state)?;

        let machines = self.sources.machines()?;
        let progressor = InventoryProgressor::new(&self.store, &self.sources, &self.config);
        for machine in &machines {
            progressor.advance_day(machine.machine_id, new_day)?;
        }
        Ok(AdvanceOutcome {
            state: self.state.clone(),
            summary,
        })
    }

    /// Jump to a day inside the window without running the days in between.
    /// Inventory is derived lazily by replaying the drawdown forward.
    pub fn skip(&mut self, date: SimDay) -> EngineResult<EngineState> {
        let _permit = self.guard.acquire()?;
        self.state.check_in_window(date)?;

        let machines = self.sources.machines()?;
        {
            let progressor =
                InventoryProgressor::new(&self.store, &self.sources, &self.config);
            for machine in &machines {
                progressor.ensure_through(machine.machine_id, date)?;
            }
        }
        self.state.skip_to(date)?;
        self.store.save_engine_state(&self.state)?;
        Ok(self.state.clone())
    }

    /// Restore the clock to the start of the window, clearing alerts,
    /// inventory, queued actions and the run log, then re-seed inventory.
    pub fn reset(&mut self) -> EngineResult<EngineState> {
        let _permit = self.guard.acquire()?;
        self.store.clear_runtime()?;
        self.state.skip_to(self.state.start_day)?;
        self.store.save_engine_state(&self.state)?;

        let progressor = InventoryProgressor::new(&self.store, &self.sources, &self.config);
        progressor.seed_baseline(self.state.start_day)?;
        self.ctx_cache.clear();
        log::info!("Engine reset to {}", self.state.start_day);
        Ok(self.state.clone())
    }

    // ── The daily run ──────────────────────────────────────────

    pub(crate) fn run_for_day(&mut self, day: SimDay) -> EngineResult<RunSummary> {
        if self.store.run_log(day)?.is_some() {
            log::debug!("Day {day} already ran; skipping");
            return Ok(RunSummary {
                run_date: day,
                executed_scripts: 0,
                emitted_alerts: 0,
                diagnostics: Vec::new(),
            });
        }

        let machines = self.sources.machines()?;
        {
            let progressor =
                InventoryProgressor::new(&self.store, &self.sources, &self.config);
            for machine in &machines {
                progressor.ensure_through(machine.machine_id, day)?;
            }
        }

        let scripts = scripts::active_scripts(&self.store)?;
        let limits = self.limits();
        let mut executed = 0i64;
        let mut emitted = 0i64;
        let mut diagnostics = Vec::new();

        for machine in &machines {
            let ctx = match self.context_value(machine.location_id, machine.machine_id, day) {
                Ok(ctx) => ctx,
                Err(EngineError::DataUnavailable { entity, id }) => {
                    log::warn!(
                        "Skipping machine {} for {day}: {entity} {id} unresolvable",
                        machine.machine_id
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            for script in &scripts {
                executed += 1;
                emitted += self.run_one_script(day, machine, script, &ctx, &limits, &mut diagnostics)?;
            }
        }

        self.store.record_run(&RunLogRow {
            run_date: day,
            executed_scripts: executed,
            emitted_alerts: emitted,
        })?;
        log::info!("Daily run complete day={day} scripts={executed} alerts={emitted}");
        Ok(RunSummary {
            run_date: day,
            executed_scripts: executed,
            emitted_alerts: emitted,
            diagnostics,
        })
    }

    fn run_one_script(
        &self,
        day: SimDay,
        machine: &MachineMeta,
        script: &ActiveScript,
        ctx: &Value,
        limits: &ExecLimits,
        diagnostics: &mut Vec<RunDiagnostic>,
    ) -> EngineResult<i64> {
        let raw = match sandbox::run_script(&script.source_code, ctx, limits) {
            Ok(raw) => raw,
            Err(e) => {
                log::error!(
                    "{} failed on machine {}: {e}",
                    script.script_name,
                    machine.machine_id
                );
                diagnostics.push(RunDiagnostic::ScriptError {
                    script_name: script.script_name.clone(),
                    machine_id: machine.machine_id,
                    message: e.to_string(),
                });
                return Ok(0);
            }
        };

        let mut emitted = 0;
        for candidate_value in raw {
            let candidate = match sandbox::validate_candidate(candidate_value) {
                Ok(candidate) => candidate,
                Err(reason) => {
                    log::error!(
                        "Invalid candidate from {} on machine {}: {reason}",
                        script.script_name,
                        machine.machine_id
                    );
                    diagnostics.push(RunDiagnostic::SchemaViolation {
                        script_name: script.script_name.clone(),
                        machine_id: machine.machine_id,
                        reason,
                    });
                    continue;
                }
            };
            let outcome =
                self.upsert_candidate(day, &script.script_name, &script.version, candidate)?;
            if outcome != UpsertOutcome::Suppressed {
                emitted += 1;
            }
        }
        Ok(emitted)
    }

    /// The dedup state machine. At most one OPEN/SNOOZED alert exists per
    /// fingerprint; a new candidate either inserts, refreshes that row in
    /// place, or is dropped.
    pub fn upsert_candidate(
        &self,
        run_day: SimDay,
        script_name: &str,
        script_version: &str,
        candidate: AlertCandidate,
    ) -> EngineResult<UpsertOutcome> {
        if self.store.is_suppressed(
            candidate.location_id,
            candidate.machine_id,
            &candidate.alert_type,
            run_day,
        )? {
            log::debug!(
                "Suppressed {} candidate for machine {:?}",
                candidate.alert_type,
                candidate.machine_id
            );
            return Ok(UpsertOutcome::Suppressed);
        }

        let fingerprint = alert::fingerprint(script_name, &candidate);
        let evidence_hash = alert::stable_evidence_hash(&candidate.evidence);

        match self.store.live_alert_by_fingerprint(&fingerprint)? {
            None => {
                let row = build_row(
                    Uuid::new_v4().to_string(),
                    run_day,
                    script_name,
                    script_version,
                    fingerprint,
                    evidence_hash,
                    candidate,
                    AlertStatus::Open,
                    None,
                );
                self.store.insert_alert(&row)?;
                Ok(UpsertOutcome::Inserted)
            }
            Some(current) => {
                let decision = alert::decide_merge(
                    Some(&current),
                    run_day,
                    &evidence_hash,
                    self.config.cooldown_days,
                );
                if decision == alert::MergeDecision::Suppress {
                    return Ok(UpsertOutcome::Suppressed);
                }
                let (status, snoozed_until) = alert::status_after_overwrite(&current, run_day);
                let row = build_row(
                    current.alert_id,
                    run_day,
                    script_name,
                    script_version,
                    fingerprint,
                    evidence_hash,
                    candidate,
                    status,
                    snoozed_until,
                );
                self.store.update_alert(&row)?;
                Ok(UpsertOutcome::Overwritten)
            }
        }
    }

    pub(crate) fn context_value(
        &mut self,
        location_id: LocationId,
        machine_id: MachineId,
        day: SimDay,
    ) -> EngineResult<Arc<Value>> {
        if let Some(cached) = self.ctx_cache.get(&(day, machine_id)) {
            return Ok(Arc::clone(cached));
        }
        let ctx = ContextBuilder::new(&self.sources, &self.config).build(
            &self.store,
            location_id,
            machine_id,
            day,
        )?;
        let value = Arc::new(ctx.to_value()?);
        self.ctx_cache.insert((day, machine_id), Arc::clone(&value));
        Ok(value)
    }

    // ── Alert lifecycle surface ────────────────────────────────

    pub fn list_alerts(&self, filter: &AlertFilter) -> EngineResult<Vec<AlertRow>> {
        self.store.list_alerts(filter)
    }

    pub fn get_alert(&self, alert_id: &str) -> EngineResult<Option<AlertRow>> {
        self.store.get_alert(alert_id)
    }

    /// Resolve an alert and queue its actionable recommendations for the
    /// next simulated day. Restock-typed alerts with no explicit actions
    /// fall back to a machine restock.
    pub fn accept(&mut self, alert_id: &str) -> EngineResult<AcceptOutcome> {
        let alert = self
            .store
            .get_alert(alert_id)?
            .ok_or_else(|| EngineError::UnknownAlert(alert_id.to_string()))?;
        let effective = self.state.current_day + Duration::days(1);

        let mut actions = Vec::new();
        let mut saw_action = false;
        for rec in &alert.recommended_actions {
            if !rec.action_type.is_actionable() {
                continue;
            }
            saw_action = true;
            actions.push(self.queue_action(&alert, rec.action_type, &rec.params, effective)?);
        }
        if !saw_action && alert.alert_type.to_ascii_lowercase().contains("restock") {
            actions.push(self.queue_action(
                &alert,
                ActionType::RestockMachine,
                &Map::new(),
                effective,
            )?);
        }

        self.store
            .set_alert_status(&alert.alert_id, AlertStatus::Resolved, None)?;
        Ok(AcceptOutcome {
            alert_id: alert.alert_id,
            status: AlertStatus::Resolved,
            actions,
        })
    }

    /// Snooze an alert for `days` simulated days and suppress same-typed
    /// candidates for its scope until the window lapses.
    pub fn snooze(&mut self, alert_id: &str, days: i64) -> EngineResult<SnoozeOutcome> {
        if days <= 0 {
            return Err(EngineError::InvalidDateRange(
                "snooze days must be positive".into(),
            ));
        }
        let alert = self
            .store
            .get_alert(alert_id)?
            .ok_or_else(|| EngineError::UnknownAlert(alert_id.to_string()))?;
        let until = alert.run_date + Duration::days(days);
        let effective_until = self.store.upsert_suppression(
            alert.location_id,
            alert.machine_id,
            &alert.alert_type,
            until,
        )?;
        self.store.set_alert_status(
            &alert.alert_id,
            AlertStatus::Snoozed,
            Some(effective_until),
        )?;
        Ok(SnoozeOutcome {
            alert_id: alert.alert_id,
            status: AlertStatus::Snoozed,
            snoozed_until: effective_until,
        })
    }

    fn queue_action(
        &self,
        alert: &AlertRow,
        action_type: ActionType,
        params: &Map<String, Value>,
        effective: SimDay,
    ) -> EngineResult<QueuedAction> {
        let machine_id = params
            .get("machine_id")
            .and_then(Value::as_i64)
            .or(alert.machine_id);
        let Some(machine_id) = machine_id else {
            return Ok(QueuedAction {
                action_type,
                machine_id: None,
                effective_date: effective,
                scheduled: false,
                reason: Some("missing machine id".into()),
            });
        };
        let location_id = params
            .get("location_id")
            .and_then(Value::as_i64)
            .unwrap_or(alert.location_id);

        let mut details = params.clone();
        if action_type == ActionType::RestockMachine {
            details
                .entry(RESTOCK_MODE_KEY.to_string())
                .or_insert_with(|| Value::String(RESTOCK_TOP_UP.to_string()));
        }
        details.insert(
            "source_alert_id".into(),
            Value::String(alert.alert_id.clone()),
        );

        let scheduled = self.store.queue_manager_action(&ManagerActionRow {
            effective_date: effective,
            location_id,
            machine_id,
            action_type,
            details,
        })?;
        Ok(QueuedAction {
            action_type,
            machine_id: Some(machine_id),
            effective_date: effective,
            scheduled,
            reason: None,
        })
    }

    /// Directly queue a top-up restock for a machine, effective tomorrow.
    pub fn schedule_machine_restock(&mut self, machine_id: MachineId) -> EngineResult<QueuedAction> {
        let machine = self
            .sources
            .machine(machine_id)?
            .ok_or(EngineError::DataUnavailable {
                entity: "machine",
                id: machine_id,
            })?;
        let effective = self.state.current_day + Duration::days(1);
        let mut details = Map::new();
        details.insert(
            RESTOCK_MODE_KEY.to_string(),
            Value::String(RESTOCK_TOP_UP.to_string()),
        );
        let scheduled = self.store.queue_manager_action(&ManagerActionRow {
            effective_date: effective,
            location_id: machine.location_id,
            machine_id,
            action_type: ActionType::RestockMachine,
            details,
        })?;
        Ok(QueuedAction {
            action_type: ActionType::RestockMachine,
            machine_id: Some(machine_id),
            effective_date: effective,
            scheduled,
            reason: None,
        })
    }

    // ── Script management surface ──────────────────────────────

    pub fn list_scripts(&self) -> EngineResult<Vec<ScriptInfo>> {
        scripts::list_scripts(&self.store)
    }

    pub fn set_script_enabled(&mut self, script_name: &str, enabled: bool) -> EngineResult<()> {
        if !self
            .store
            .script_names()?
            .iter()
            .any(|n| n.as_str() == script_name)
        {
            return Err(EngineError::UnknownScript(script_name.to_string()));
        }
        self.store.set_script_enabled(script_name, enabled)
    }

    pub fn draft_script_revision(
        &self,
        script_name: &str,
        source_code: &str,
        note: &str,
    ) -> EngineResult<RevisionRow> {
        scripts::draft_revision(&self.store, script_name, source_code, note)
    }

    /// Swap the active revision. The current day's run log is invalidated so
    /// the next run re-executes with the new code.
    pub fn activate_script_revision(
        &mut self,
        script_name: &str,
        revision_id: &str,
    ) -> EngineResult<RevisionRow> {
        let revision = self.store.activate_revision(script_name, revision_id)?;
        self.store.invalidate_run(self.state.current_day)?;
        Ok(revision)
    }

    /// Roll back to the previously active revision, if there is one.
    pub fn revert_script(&mut self, script_name: &str) -> EngineResult<Option<RevisionRow>> {
        let reverted = self.store.revert_script(script_name)?;
        if reverted.is_some() {
            self.store.invalidate_run(self.state.current_day)?;
        }
        Ok(reverted)
    }
}

#[allow(clippy::too_many_arguments)]
fn build_row(
    alert_id: String,
    run_day: SimDay,
    script_name: &str,
    script_version: &str,
    fingerprint: String,
    evidence_hash: String,
    candidate: AlertCandidate,
    status: AlertStatus,
    snoozed_until: Option<SimDay>,
) -> AlertRow {
    AlertRow {
        alert_id,
        created_at: chrono::Utc::now(),
        run_date: run_day,
        script_name: script_name.to_string(),
        script_version: script_version.to_string(),
        fingerprint,
        evidence_hash,
        severity: candidate.severity,
        alert_type: candidate.alert_type,
        location_id: candidate.location_id,
        machine_id: candidate.machine_id,
        product_id: candidate.product_id,
        ingredient_id: candidate.ingredient_id,
        title: candidate.title,
        summary: candidate.summary,
        evidence: candidate.evidence,
        recommended_actions: candidate.recommended_actions,
        status,
        snoozed_until,
    }
}
