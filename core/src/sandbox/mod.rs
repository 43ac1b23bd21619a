//! Restricted execution sandbox for detector scripts.
//!
//! This is the safety-critical boundary of the engine: arbitrary script
//! edits (human- or machine-written) must not be able to corrupt engine
//! state, reach disallowed data, or take down a daily run.
//!
//! The contract:
//!   - a script sees exactly one input binding, `ctx`, and must leave a
//!     list of candidate maps in `result`;
//!   - the only callable functions are the fixed helper whitelist;
//!   - execution is fuel-limited with a wall-clock backstop;
//!   - any failure (parse, runtime, fuel, timeout, bad result shape) is a
//!     per-script diagnostic that yields zero alerts — never a panic, never
//!     an aborted day.

mod helpers;
mod interp;
mod lexer;
mod parser;

pub use helpers::HELPER_NAMES;
pub use interp::ExecLimits;

use crate::alert::AlertCandidate;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SandboxError {
    #[error("parse error on line {line}: {message}")]
    Parse { line: u32, message: String },

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("script fuel exhausted")]
    FuelExhausted,

    #[error("script exceeded its time budget")]
    Timeout,

    #[error("bad result: {0}")]
    BadResult(String),
}

/// Parse-check a script without running it. Used to reject unusable drafts
/// before they are stored as revisions.
pub fn check_source(source: &str) -> Result<(), SandboxError> {
    parser::parse(source).map(|_| ())
}

/// Execute one script against one context value and return the raw candidate
/// maps from its `result` binding. Scope ids missing on a candidate are
/// filled from the context so scripts do not have to repeat them.
pub fn run_script(
    source: &str,
    ctx: &Value,
    limits: &ExecLimits,
) -> Result<Vec<Value>, SandboxError> {
    let program = parser::parse(source)?;
    let mut interp = interp::Interp::new(ctx.clone(), limits);
    interp.run(&program)?;

    let result = interp
        .take_result()
        .ok_or(SandboxError::BadResult("script never set `result`".into()))?;
    let Value::Array(items) = result else {
        return Err(SandboxError::BadResult(format!(
            "`result` must be a list, got {}",
            type_name(&result)
        )));
    };

    let default_location = ctx.pointer("/ids/location_id").cloned();
    let default_machine = ctx.pointer("/ids/machine_id").cloned();

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(mut map) = item else {
            return Err(SandboxError::BadResult(format!(
                "each candidate must be a map, got {}",
                type_name(&item)
            )));
        };
        if !map.contains_key("location_id") {
            if let Some(v) = default_location.clone() {
                map.insert("location_id".into(), v);
            }
        }
        if !map.contains_key("machine_id") {
            if let Some(v) = default_machine.clone() {
                map.insert("machine_id".into(), v);
            }
        }
        out.push(Value::Object(map));
    }
    Ok(out)
}

const MAX_RECOMMENDED_ACTIONS: usize = 3;

/// Validate one raw candidate map against the alert schema. Severity must be
/// a known level, the action types must come from the closed set, and at
/// most three actions are allowed. Returns a reason string on rejection; the
/// caller logs it as a SchemaViolation and drops the candidate.
pub fn validate_candidate(raw: Value) -> Result<AlertCandidate, String> {
    let candidate: AlertCandidate =
        serde_json::from_value(raw).map_err(|e| e.to_string())?;
    if candidate.recommended_actions.len() > MAX_RECOMMENDED_ACTIONS {
        return Err(format!(
            "too many recommended actions ({} > {MAX_RECOMMENDED_ACTIONS})",
            candidate.recommended_actions.len()
        ));
    }
    if candidate.alert_type.trim().is_empty() {
        return Err("alert_type must be non-empty".into());
    }
    if candidate.title.trim().is_empty() {
        return Err("title must be non-empty".into());
    }
    Ok(candidate)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "meta": {"as_of_date": "2024-03-05", "currency": "USD", "run_id": "r1"},
            "ids": {"location_id": 1, "machine_id": 2},
            "entities": {"location": {"id": 1}, "machine": {"id": 2}},
            "days": [],
            "inventory": {"snapshot_date": null, "by_ingredient": []},
        })
    }

    #[test]
    fn empty_result_list_is_fine() {
        let out = run_script("result = []", &ctx(), &ExecLimits::default()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn missing_result_is_a_bad_result() {
        assert!(matches!(
            run_script("x = 1", &ctx(), &ExecLimits::default()),
            Err(SandboxError::BadResult(_))
        ));
    }

    #[test]
    fn scope_ids_are_filled_from_ctx() {
        let src = r#"
            result = [alert("t", "LOW", "title", "sum", {}, [])]
        "#;
        let out = run_script(src, &ctx(), &ExecLimits::default()).unwrap();
        assert_eq!(out[0]["location_id"], json!(1));
        assert_eq!(out[0]["machine_id"], json!(2));
    }

    #[test]
    fn candidate_validation_rejects_unknown_severity_and_action() {
        let bad_severity = json!({
            "alert_type": "t", "severity": "SEVERE", "title": "x", "summary": "y",
            "location_id": 1,
        });
        assert!(validate_candidate(bad_severity).is_err());

        let bad_action = json!({
            "alert_type": "t", "severity": "LOW", "title": "x", "summary": "y",
            "location_id": 1,
            "recommended_actions": [{"action_type": "LAUNCH_ROCKET", "params": {}}],
        });
        assert!(validate_candidate(bad_action).is_err());

        let ok = json!({
            "alert_type": "t", "severity": "LOW", "title": "x", "summary": "y",
            "location_id": 1,
            "recommended_actions": [{"action_type": "CHECK_MACHINE", "params": {}}],
        });
        assert!(validate_candidate(ok).is_ok());
    }

    #[test]
    fn runaway_script_times_out_without_panicking() {
        // Self-extending list: burns fuel forever without the limiter.
        let src = r#"
            xs = [1]
            for i in [1, 2, 3] {
                xs = xs + xs + xs + xs + xs + xs + xs + xs
            }
            total = 0
            for a in xs {
                for b in xs {
                    for c in xs {
                        total = total + 1
                    }
                }
            }
            result = []
        "#;
        let limits = ExecLimits {
            fuel: 10_000,
            timeout: std::time::Duration::from_secs(10),
        };
        assert!(matches!(
            run_script(src, &ctx(), &limits),
            Err(SandboxError::FuelExhausted)
        ));
    }
}
