//! The fixed whitelist of pure helper functions injected into every script.
//!
//! Helpers never touch engine state, the filesystem, or the clock; they are
//! plain functions over JSON-shaped values. Adding a helper widens the
//! sandbox surface — keep them pure and total over their documented inputs.

use super::interp::{as_number, format_number, key_string, number, type_name};
use chrono::{Duration, NaiveDate};
use serde_json::{Map, Value};

pub const HELPER_NAMES: &[&str] = &[
    "alert",
    "mean",
    "stdev",
    "z_score",
    "percentile",
    "sum",
    "min",
    "max",
    "abs",
    "round",
    "len",
    "get",
    "keys",
    "pluck",
    "sum_by_key",
    "pct_change",
    "days_between",
    "date_add",
    "str",
];

pub fn call(name: &str, args: Vec<Value>) -> Result<Value, String> {
    match name {
        "alert" => alert(args),
        "mean" => Ok(num_out(mean(&numbers(args.first())?))?),
        "stdev" => Ok(num_out(stdev(&numbers(args.first())?))?),
        "z_score" => z_score(args),
        "percentile" => percentile(args),
        "sum" => Ok(num_out(numbers(args.first())?.iter().sum())?),
        "min" => fold_extreme(args, f64::min, "min"),
        "max" => fold_extreme(args, f64::max, "max"),
        "abs" => Ok(num_out(arg_number(args.first(), "value")?.abs())?),
        "round" => round(args),
        "len" => len(args),
        "get" => get(args),
        "keys" => keys(args),
        "pluck" => pluck(args),
        "sum_by_key" => sum_by_key(args),
        "pct_change" => pct_change(args),
        "days_between" => days_between(args),
        "date_add" => date_add(args),
        "str" => Ok(Value::String(stringify(args.first().unwrap_or(&Value::Null)))),
        _ => Err(format!("unknown function '{name}'")),
    }
}

// ── Argument plumbing ──────────────────────────────────────────

fn num_out(f: f64) -> Result<Value, String> {
    number(f)
}

fn arg_number(arg: Option<&Value>, what: &str) -> Result<f64, String> {
    let value = arg.ok_or(format!("missing {what} argument"))?;
    as_number(value).ok_or(format!("{what} must be a number, got {}", type_name(value)))
}

/// Extract the numeric items of a list argument, skipping nulls.
fn numbers(arg: Option<&Value>) -> Result<Vec<f64>, String> {
    let value = arg.ok_or("missing list argument")?;
    let Value::Array(items) = value else {
        return Err(format!("expected a list, got {}", type_name(value)));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if item.is_null() {
            continue;
        }
        out.push(
            as_number(item).ok_or(format!("list contains a {}", type_name(item)))?,
        );
    }
    Ok(out)
}

// ── Statistics ─────────────────────────────────────────────────

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / values.len() as f64).sqrt()
}

fn z_score(args: Vec<Value>) -> Result<Value, String> {
    let value = arg_number(args.first(), "value")?;
    let values = numbers(args.get(1))?;
    if values.is_empty() {
        return num_out(0.0);
    }
    let m = mean(&values);
    let sd = stdev(&values);
    if sd == 0.0 {
        // Degenerate distribution: saturate instead of dividing by zero.
        let z = if value == m {
            0.0
        } else if value > m {
            10.0
        } else {
            -10.0
        };
        return num_out(z);
    }
    num_out((value - m) / sd)
}

fn percentile(args: Vec<Value>) -> Result<Value, String> {
    let value = arg_number(args.first(), "value")?;
    let values = numbers(args.get(1))?;
    if values.is_empty() {
        return num_out(0.5);
    }
    let below = values.iter().filter(|v| **v <= value).count();
    num_out(below as f64 / values.len() as f64)
}

fn pct_change(args: Vec<Value>) -> Result<Value, String> {
    let old = arg_number(args.first(), "old")?;
    let new = arg_number(args.get(1), "new")?;
    if old == 0.0 {
        return num_out(0.0);
    }
    num_out((new - old) / old)
}

fn fold_extreme(
    args: Vec<Value>,
    pick: fn(f64, f64) -> f64,
    what: &str,
) -> Result<Value, String> {
    // min/max accept either a single list or two numbers.
    let values = if args.len() == 1 {
        numbers(args.first())?
    } else {
        vec![
            arg_number(args.first(), "first")?,
            arg_number(args.get(1), "second")?,
        ]
    };
    let mut iter = values.into_iter();
    let first = iter.next().ok_or(format!("{what}() of an empty list"))?;
    num_out(iter.fold(first, pick))
}

fn round(args: Vec<Value>) -> Result<Value, String> {
    let value = arg_number(args.first(), "value")?;
    let digits = match args.get(1) {
        None | Some(Value::Null) => 0,
        Some(v) => as_number(v).ok_or("digits must be a number")? as i32,
    };
    let factor = 10f64.powi(digits);
    num_out((value * factor).round() / factor)
}

// ── Collections ────────────────────────────────────────────────

fn len(args: Vec<Value>) -> Result<Value, String> {
    let value = args.first().ok_or("missing argument")?;
    let n = match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::String(s) => s.chars().count(),
        other => return Err(format!("len() of {}", type_name(other))),
    };
    num_out(n as f64)
}

fn get(args: Vec<Value>) -> Result<Value, String> {
    let object = args.first().ok_or("missing map argument")?;
    let key = args.get(1).ok_or("missing key argument")?;
    let default = args.get(2).cloned().unwrap_or(Value::Null);
    match object {
        Value::Object(map) => {
            let key = key_string(key)?;
            Ok(map.get(&key).cloned().unwrap_or(default))
        }
        // get() on null tolerates absent sub-objects in sparse contexts.
        Value::Null => Ok(default),
        other => Err(format!("expected a map, got {}", type_name(other))),
    }
}

fn keys(args: Vec<Value>) -> Result<Value, String> {
    let object = args.first().ok_or("missing map argument")?;
    match object {
        // serde_json maps are key-ordered, so this is deterministic.
        Value::Object(map) => Ok(Value::Array(
            map.keys().cloned().map(Value::String).collect(),
        )),
        other => Err(format!("expected a map, got {}", type_name(other))),
    }
}

fn pluck(args: Vec<Value>) -> Result<Value, String> {
    let list = args.first().ok_or("missing list argument")?;
    let field = match args.get(1) {
        Some(Value::String(s)) => s.clone(),
        _ => return Err("field name must be a string".into()),
    };
    let Value::Array(items) = list else {
        return Err(format!("expected a list, got {}", type_name(list)));
    };
    let out = items
        .iter()
        .map(|item| match item {
            Value::Object(map) => map.get(&field).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        })
        .collect();
    Ok(Value::Array(out))
}

fn sum_by_key(args: Vec<Value>) -> Result<Value, String> {
    let list = args.first().ok_or("missing list argument")?;
    let (Some(Value::String(key_field)), Some(Value::String(value_field))) =
        (args.get(1), args.get(2))
    else {
        return Err("key and value field names must be strings".into());
    };
    let Value::Array(items) = list else {
        return Err(format!("expected a list, got {}", type_name(list)));
    };
    let mut acc = Map::new();
    for item in items {
        let Value::Object(row) = item else { continue };
        let Some(key) = row.get(key_field) else { continue };
        if key.is_null() {
            continue;
        }
        let key = key_string(key)?;
        let add = row.get(value_field).and_then(as_number).unwrap_or(0.0);
        let current = acc.get(&key).and_then(as_number).unwrap_or(0.0);
        acc.insert(key, number(current + add)?);
    }
    Ok(Value::Object(acc))
}

// ── Dates ──────────────────────────────────────────────────────

fn parse_day(value: &Value, what: &str) -> Result<NaiveDate, String> {
    let Value::String(s) = value else {
        return Err(format!("{what} must be a date string"));
    };
    // Tolerate timestamps by reading the leading date part.
    let head: String = s.chars().take(10).collect();
    NaiveDate::parse_from_str(&head, "%Y-%m-%d")
        .map_err(|_| format!("{what} is not a YYYY-MM-DD date: {s:?}"))
}

fn days_between(args: Vec<Value>) -> Result<Value, String> {
    let d1 = parse_day(args.first().unwrap_or(&Value::Null), "first date")?;
    let d2 = parse_day(args.get(1).unwrap_or(&Value::Null), "second date")?;
    num_out((d2 - d1).num_days() as f64)
}

fn date_add(args: Vec<Value>) -> Result<Value, String> {
    let d = parse_day(args.first().unwrap_or(&Value::Null), "date")?;
    let days = arg_number(args.get(1), "days")?;
    if days.fract() != 0.0 {
        return Err("days must be an integer".into());
    }
    Ok(Value::String(
        (d + Duration::days(days as i64)).to_string(),
    ))
}

// ── Rendering ──────────────────────────────────────────────────

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(_) => format_number(as_number(value).unwrap_or(f64::NAN)),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

// ── The alert constructor ──────────────────────────────────────

const MAX_RECOMMENDED_ACTIONS: usize = 3;

/// alert(type, severity, title, summary, evidence, actions) — builds the
/// candidate map shape the validator expects. Actions may be [type, params]
/// pairs or ready-made {action_type, params} maps; at most three are kept.
fn alert(args: Vec<Value>) -> Result<Value, String> {
    if args.len() != 6 {
        return Err(format!(
            "expected 6 arguments (type, severity, title, summary, evidence, actions), got {}",
            args.len()
        ));
    }
    let mut args = args.into_iter();
    let alert_type = args.next().unwrap_or(Value::Null);
    let severity = args.next().unwrap_or(Value::Null);
    let title = args.next().unwrap_or(Value::Null);
    let summary = args.next().unwrap_or(Value::Null);
    let evidence = args.next().unwrap_or(Value::Null);
    let actions = args.next().unwrap_or(Value::Null);

    let actions = match actions {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => return Err(format!("actions must be a list, got {}", type_name(&other))),
    };
    let mut normalized = Vec::new();
    for action in actions.into_iter().take(MAX_RECOMMENDED_ACTIONS) {
        match action {
            Value::Array(pair) => {
                let mut map = Map::new();
                map.insert(
                    "action_type".into(),
                    pair.first().cloned().unwrap_or(Value::Null),
                );
                map.insert(
                    "params".into(),
                    pair.get(1).cloned().unwrap_or(Value::Object(Map::new())),
                );
                normalized.push(Value::Object(map));
            }
            Value::Object(map) => normalized.push(Value::Object(map)),
            other => {
                return Err(format!(
                    "each action must be a [type, params] pair or a map, got {}",
                    type_name(&other)
                ))
            }
        }
    }

    let mut out = Map::new();
    out.insert("alert_type".into(), alert_type);
    out.insert("severity".into(), severity);
    out.insert("title".into(), title);
    out.insert("summary".into(), summary);
    out.insert(
        "evidence".into(),
        if evidence.is_null() {
            Value::Object(Map::new())
        } else {
            evidence
        },
    );
    out.insert("recommended_actions".into(), Value::Array(normalized));
    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mean_and_stdev_handle_degenerate_inputs() {
        assert_eq!(call("mean", vec![json!([])]).unwrap(), json!(0.0));
        assert_eq!(call("mean", vec![json!([2, 4])]).unwrap(), json!(3.0));
        assert_eq!(call("stdev", vec![json!([5])]).unwrap(), json!(0.0));
    }

    #[test]
    fn z_score_saturates_on_zero_spread() {
        assert_eq!(
            call("z_score", vec![json!(9.0), json!([5, 5, 5])]).unwrap(),
            json!(10.0)
        );
        assert_eq!(
            call("z_score", vec![json!(5.0), json!([5, 5, 5])]).unwrap(),
            json!(0.0)
        );
    }

    #[test]
    fn sum_by_key_accumulates_per_key() {
        let rows = json!([
            {"id": 7, "qty": 2.0},
            {"id": 7, "qty": 3.0},
            {"id": 9, "qty": 1.0},
            {"qty": 99.0},
        ]);
        let out = call(
            "sum_by_key",
            vec![rows, json!("id"), json!("qty")],
        )
        .unwrap();
        assert_eq!(out, json!({"7": 5.0, "9": 1.0}));
    }

    #[test]
    fn date_helpers() {
        assert_eq!(
            call(
                "days_between",
                vec![json!("2024-03-01"), json!("2024-03-08")]
            )
            .unwrap(),
            json!(7.0)
        );
        assert_eq!(
            call("date_add", vec![json!("2024-03-01"), json!(3)]).unwrap(),
            json!("2024-03-04")
        );
        // Timestamps degrade to their date part.
        assert_eq!(
            call(
                "days_between",
                vec![json!("2024-03-01T10:00:00"), json!("2024-03-02")]
            )
            .unwrap(),
            json!(1.0)
        );
    }

    #[test]
    fn alert_normalizes_pair_actions_and_caps_at_three() {
        let out = call(
            "alert",
            vec![
                json!("restock_risk"),
                json!("HIGH"),
                json!("t"),
                json!("s"),
                json!({"qty": 4}),
                json!([
                    ["RESTOCK_MACHINE", {"machine_id": 2}],
                    ["ORDER_INGREDIENTS", {}],
                    ["CHECK_MACHINE", {}],
                    ["ADJUST_PRICE", {}],
                ]),
            ],
        )
        .unwrap();
        let actions = out["recommended_actions"].as_array().unwrap();
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0]["action_type"], json!("RESTOCK_MACHINE"));
    }

    #[test]
    fn get_tolerates_null_objects() {
        assert_eq!(
            call("get", vec![json!(null), json!("k"), json!(5)]).unwrap(),
            json!(5)
        );
    }
}
