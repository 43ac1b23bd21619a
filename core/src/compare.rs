//! Backtest/compare: replay a date range with the active revision and a
//! candidate script against identical contexts, measuring behavioral drift
//! before activation.
//!
//! RULES:
//!   - Never calls the alert upsert path; output is a pure aggregate.
//!   - Contexts are built (or pulled from the shared cache) up front;
//!     script execution fans out over days on a bounded worker pool.
//!   - Identical inputs produce byte-identical output: aggregation is in
//!     date order and nothing wall-clock-dependent enters the payload.

use crate::engine::AlertEngine;
use crate::error::{EngineError, EngineResult};
use crate::inventory::InventoryProgressor;
use crate::sandbox;
use crate::scripts::sha12;
use crate::types::{MachineId, SimDay};
use chrono::Duration;
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayDiff {
    pub date: SimDay,
    pub active_alerts: i64,
    pub candidate_alerts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub script_name: String,
    pub start_day: SimDay,
    pub end_day: SimDay,
    pub total_days: i64,
    pub active_version: String,
    pub candidate_version: String,
    pub active_days_triggered: i64,
    pub candidate_days_triggered: i64,
    pub active_total_alerts: i64,
    pub candidate_total_alerts: i64,
    pub changed_days: Vec<DayDiff>,
}

impl AlertEngine {
    /// Compare a stored draft revision against the active code over the
    /// elapsed window (start day through the current day).
    pub fn compare_revision(
        &mut self,
        script_name: &str,
        revision_id: &str,
    ) -> EngineResult<Comparison> {
        let revision = self
            .store
            .get_revision(revision_id)?
            .filter(|r| r.script_name == script_name)
            .ok_or_else(|| EngineError::UnknownRevision {
                script_name: script_name.to_string(),
                revision_id: revision_id.to_string(),
            })?;
        let (start, end) = (self.state.start_day, self.state.current_day);
        self.compare(script_name, &revision.source_code, start, end)
    }

    /// Run the active revision and `candidate_source` over every (day,
    /// machine) in the range against identical contexts, and report per-day
    /// trigger counts plus the days whose counts differ.
    pub fn compare(
        &mut self,
        script_name: &str,
        candidate_source: &str,
        start_day: SimDay,
        end_day: SimDay,
    ) -> EngineResult<Comparison> {
        if end_day < start_day {
            return Err(EngineError::InvalidDateRange(format!(
                "end day {end_day} precedes start day {start_day}"
            )));
        }
        self.state.check_in_window(start_day)?;
        self.state.check_in_window(end_day)?;

        let active = self
            .store
            .active_revision(script_name)?
            .ok_or_else(|| EngineError::UnknownScript(script_name.to_string()))?;
        sandbox::check_source(candidate_source).map_err(|e| EngineError::ScriptRejected {
            script_name: script_name.to_string(),
            message: e.to_string(),
        })?;

        let machines = self.sources.machines()?;
        {
            let progressor =
                InventoryProgressor::new(&self.store, &self.sources, &self.config);
            for machine in &machines {
                progressor.ensure_through(machine.machine_id, end_day)?;
            }
        }

        // Contexts come from the shared cache; building them is the only
        // part that reads the databases, so the parallel stage below touches
        // no engine state at all.
        let mut day_contexts: Vec<(SimDay, Vec<(MachineId, Arc<Value>)>)> = Vec::new();
        let mut day = start_day;
        while day <= end_day {
            let mut contexts = Vec::with_capacity(machines.len());
            for machine in &machines {
                match self.context_value(machine.location_id, machine.machine_id, day) {
                    Ok(ctx) => contexts.push((machine.machine_id, ctx)),
                    Err(EngineError::DataUnavailable { entity, id }) => {
                        log::warn!(
                            "Comparison skips machine {}: {entity} {id} unresolvable",
                            machine.machine_id
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            day_contexts.push((day, contexts));
            day = day + Duration::days(1);
        }

        let limits = self.limits();
        let active_source = active.source_code.as_str();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.compare_workers.max(1))
            .build()
            .map_err(|e| anyhow::anyhow!("cannot build compare pool: {e}"))?;

        let day_counts: Vec<EngineResult<(SimDay, i64, i64)>> = pool.install(|| {
            day_contexts
                .par_iter()
                .map(|(day, contexts)| {
                    let mut active_alerts = 0i64;
                    let mut candidate_alerts = 0i64;
                    for (machine_id, ctx) in contexts {
                        active_alerts += sandbox::run_script(active_source, ctx, &limits)
                            .map_err(|e| EngineError::CompareFailed {
                                day: *day,
                                machine_id: *machine_id,
                                message: format!("active revision: {e}"),
                            })?
                            .len() as i64;
                        candidate_alerts +=
                            sandbox::run_script(candidate_source, ctx, &limits)
                                .map_err(|e| EngineError::CompareFailed {
                                    day: *day,
                                    machine_id: *machine_id,
                                    message: format!("candidate: {e}"),
                                })?
                                .len() as i64;
                    }
                    Ok((*day, active_alerts, candidate_alerts))
                })
                .collect()
        });

        let mut comparison = Comparison {
            script_name: script_name.to_string(),
            start_day,
            end_day,
            total_days: (end_day - start_day).num_days() + 1,
            active_version: sha12(active_source),
            candidate_version: sha12(candidate_source),
            active_days_triggered: 0,
            candidate_days_triggered: 0,
            active_total_alerts: 0,
            candidate_total_alerts: 0,
            changed_days: Vec::new(),
        };
        for result in day_counts {
            let (day, active_alerts, candidate_alerts) = result?;
            comparison.active_total_alerts += active_alerts;
            comparison.candidate_total_alerts += candidate_alerts;
            if active_alerts > 0 {
                comparison.active_days_triggered += 1;
            }
            if candidate_alerts > 0 {
                comparison.candidate_days_triggered += 1;
            }
            if active_alerts != candidate_alerts {
                comparison.changed_days.push(DayDiff {
                    date: day,
                    active_alerts,
                    candidate_alerts,
                });
            }
        }
        Ok(comparison)
    }
}
