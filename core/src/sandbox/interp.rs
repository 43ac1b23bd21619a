//! Fuel-limited tree-walking evaluator for detector scripts.
//!
//! RULES:
//!   - The only ambient binding is `ctx`; scripts communicate back through
//!     the `result` binding.
//!   - Every evaluation step burns fuel; the step budget is deterministic,
//!     the wall-clock deadline is a backstop.
//!   - Values are JSON-shaped. Maps are key-ordered, so anything derived
//!     from them (including iteration) is deterministic.

use super::helpers;
use super::parser::{AssignTarget, BinOp, Expr, Stmt, UnaryOp};
use super::SandboxError;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ExecLimits {
    pub fuel: u64,
    pub timeout: Duration,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            fuel: 2_000_000,
            timeout: Duration::from_millis(250),
        }
    }
}

const DEADLINE_CHECK_INTERVAL: u32 = 2048;

pub struct Interp {
    env: HashMap<String, Value>,
    fuel: u64,
    deadline: Instant,
    tick: u32,
}

enum Flow {
    Normal,
    Break,
    Continue,
}

// ── Value utilities, shared with the helper functions ──────────

pub(super) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

pub(super) fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

pub(super) fn number(f: f64) -> Result<Value, String> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| "arithmetic produced a non-finite number".to_string())
}

/// Numeric equality is by value (1 == 1.0); everything else is structural.
pub(super) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => as_number(a) == as_number(b),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map(|y| values_equal(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Render a value as a map key. Integral numbers drop the fraction so that
/// `m[r.ingredient_id]` and `get(m, "7")` agree.
pub(super) fn key_string(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(_) => {
            let f = as_number(value).ok_or("non-finite map key")?;
            Ok(format_number(f))
        }
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("value of type {} cannot be a map key", type_name(other))),
    }
}

pub(super) fn format_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        format!("{}", f as i64)
    } else {
        format!("{f}")
    }
}

pub(super) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

impl Interp {
    pub fn new(ctx: Value, limits: &ExecLimits) -> Self {
        let mut env = HashMap::new();
        env.insert("ctx".to_string(), ctx);
        Self {
            env,
            fuel: limits.fuel,
            deadline: Instant::now() + limits.timeout,
            tick: 0,
        }
    }

    pub fn run(&mut self, program: &[Stmt]) -> Result<(), SandboxError> {
        for stmt in program {
            match self.exec(stmt)? {
                Flow::Normal => {}
                Flow::Break | Flow::Continue => {
                    return Err(SandboxError::Runtime(
                        "'break'/'continue' outside of a loop".into(),
                    ))
                }
            }
        }
        Ok(())
    }

    pub fn take_result(&mut self) -> Option<Value> {
        self.env.remove("result")
    }

    fn burn(&mut self) -> Result<(), SandboxError> {
        if self.fuel == 0 {
            return Err(SandboxError::FuelExhausted);
        }
        self.fuel -= 1;
        self.tick += 1;
        if self.tick >= DEADLINE_CHECK_INTERVAL {
            self.tick = 0;
            if Instant::now() >= self.deadline {
                return Err(SandboxError::Timeout);
            }
        }
        Ok(())
    }

    fn runtime(&self, message: impl Into<String>) -> SandboxError {
        SandboxError::Runtime(message.into())
    }

    // ── Statements ─────────────────────────────────────────────

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, SandboxError> {
        self.burn()?;
        match stmt {
            Stmt::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value)?;
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond = self.eval(cond)?;
                let body = if truthy(&cond) { then_body } else { else_body };
                for stmt in body {
                    match self.exec(stmt)? {
                        Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For { var, iter, body } => {
                let iterable = self.eval(iter)?;
                let items: Vec<Value> = match iterable {
                    Value::Array(items) => items,
                    // Iterating a map yields its keys, in key order.
                    Value::Object(map) => {
                        map.keys().cloned().map(Value::String).collect()
                    }
                    other => {
                        return Err(self.runtime(format!(
                            "cannot iterate over {}",
                            type_name(&other)
                        )))
                    }
                };
                'outer: for item in items {
                    self.env.insert(var.clone(), item);
                    for stmt in body {
                        match self.exec(stmt)? {
                            Flow::Normal => {}
                            Flow::Continue => continue 'outer,
                            Flow::Break => break 'outer,
                        }
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
        }
    }

    fn assign(&mut self, target: &AssignTarget, value: Value) -> Result<(), SandboxError> {
        match target {
            AssignTarget::Name(name) => {
                self.env.insert(name.clone(), value);
                Ok(())
            }
            AssignTarget::Index { object, index } => {
                // The object must be a path rooted at a variable; evaluate the
                // path keys first, then walk the stored value mutably.
                let (root, key_exprs) = path_of(object)
                    .ok_or_else(|| self.runtime("invalid assignment target"))?;
                let mut keys = Vec::with_capacity(key_exprs.len() + 1);
                for expr in key_exprs {
                    keys.push(self.eval(&expr)?);
                }
                keys.push(self.eval(index)?);

                let mut slot = self
                    .env
                    .get_mut(&root)
                    .ok_or(SandboxError::Runtime(format!(
                        "undefined variable '{root}'"
                    )))?;
                let (last, intermediate) =
                    keys.split_last().expect("keys always has the final index");
                for key in intermediate {
                    slot = descend(slot, key)
                        .map_err(SandboxError::Runtime)?;
                }
                match slot {
                    Value::Object(map) => {
                        let key = key_string(last).map_err(SandboxError::Runtime)?;
                        map.insert(key, value);
                        Ok(())
                    }
                    Value::Array(items) => {
                        let idx = list_index(items.len(), last)
                            .map_err(SandboxError::Runtime)?;
                        items[idx] = value;
                        Ok(())
                    }
                    other => Err(SandboxError::Runtime(format!(
                        "cannot assign into {}",
                        type_name(other)
                    ))),
                }
            }
        }
    }

    // ── Expressions ────────────────────────────────────────────

    fn eval(&mut self, expr: &Expr) -> Result<Value, SandboxError> {
        self.burn()?;
        match expr {
            Expr::Number(n) => number(*n).map_err(SandboxError::Runtime),
            Expr::Str(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Ident(name) => self
                .env
                .get(name)
                .cloned()
                .ok_or_else(|| self.runtime(format!("undefined variable '{name}'"))),
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Ok(Value::Array(out))
            }
            Expr::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let key = self.eval(key)?;
                    let key = key_string(&key).map_err(SandboxError::Runtime)?;
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(Value::Object(map))
            }
            Expr::Unary { op, expr } => {
                let value = self.eval(expr)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                    UnaryOp::Neg => {
                        let f = as_number(&value).ok_or_else(|| {
                            self.runtime(format!("cannot negate {}", type_name(&value)))
                        })?;
                        number(-f).map_err(SandboxError::Runtime)
                    }
                }
            }
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs),
            Expr::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                helpers::call(name, values)
                    .map_err(|message| self.runtime(format!("{name}(): {message}")))
            }
            Expr::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                self.index_value(&object, &index)
            }
            Expr::Field { object, name } => {
                let object = self.eval(object)?;
                match object {
                    Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
                    other => Err(self.runtime(format!(
                        "cannot access field '{name}' of {}",
                        type_name(&other)
                    ))),
                }
            }
        }
    }

    fn index_value(&self, object: &Value, index: &Value) -> Result<Value, SandboxError> {
        match object {
            // Missing map keys yield null; scripts must tolerate sparse data.
            Value::Object(map) => {
                let key = key_string(index).map_err(SandboxError::Runtime)?;
                Ok(map.get(&key).cloned().unwrap_or(Value::Null))
            }
            Value::Array(items) => {
                let idx = list_index(items.len(), index).map_err(SandboxError::Runtime)?;
                Ok(items[idx].clone())
            }
            other => Err(self.runtime(format!("cannot index {}", type_name(other)))),
        }
    }

    fn binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<Value, SandboxError> {
        // and/or short-circuit and yield the deciding operand.
        if op == BinOp::And {
            let left = self.eval(lhs)?;
            if !truthy(&left) {
                return Ok(left);
            }
            return self.eval(rhs);
        }
        if op == BinOp::Or {
            let left = self.eval(lhs)?;
            if truthy(&left) {
                return Ok(left);
            }
            return self.eval(rhs);
        }

        let left = self.eval(lhs)?;
        let right = self.eval(rhs)?;
        match op {
            BinOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
            BinOp::NotEq => Ok(Value::Bool(!values_equal(&left, &right))),
            BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq => {
                let ordering = match (&left, &right) {
                    (Value::Number(_), Value::Number(_)) => as_number(&left)
                        .partial_cmp(&as_number(&right))
                        .ok_or_else(|| self.runtime("cannot order non-finite numbers"))?,
                    (Value::String(a), Value::String(b)) => a.cmp(b),
                    _ => {
                        return Err(self.runtime(format!(
                            "cannot order {} and {}",
                            type_name(&left),
                            type_name(&right)
                        )))
                    }
                };
                let result = match op {
                    BinOp::Lt => ordering.is_lt(),
                    BinOp::LtEq => ordering.is_le(),
                    BinOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                };
                Ok(Value::Bool(result))
            }
            BinOp::Add => match (&left, &right) {
                (Value::String(a), Value::String(b)) => {
                    Ok(Value::String(format!("{a}{b}")))
                }
                (Value::Array(a), Value::Array(b)) => {
                    let mut out = a.clone();
                    out.extend(b.iter().cloned());
                    Ok(Value::Array(out))
                }
                _ => self.arith(op, &left, &right),
            },
            BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
                self.arith(op, &left, &right)
            }
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }

    fn arith(&self, op: BinOp, left: &Value, right: &Value) -> Result<Value, SandboxError> {
        let (Some(a), Some(b)) = (as_number(left), as_number(right)) else {
            return Err(self.runtime(format!(
                "arithmetic needs numbers, got {} and {}",
                type_name(left),
                type_name(right)
            )));
        };
        let result = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => {
                if b == 0.0 {
                    return Err(self.runtime("division by zero"));
                }
                a / b
            }
            BinOp::Rem => {
                if b == 0.0 {
                    return Err(self.runtime("modulo by zero"));
                }
                a % b
            }
            _ => unreachable!(),
        };
        number(result).map_err(SandboxError::Runtime)
    }
}

/// Flatten a postfix chain into (root variable, index-key expressions), or
/// None when the expression is not a plain path.
fn path_of(expr: &Expr) -> Option<(String, Vec<Expr>)> {
    match expr {
        Expr::Ident(name) => Some((name.clone(), Vec::new())),
        Expr::Index { object, index } => {
            let (root, mut keys) = path_of(object)?;
            keys.push((**index).clone());
            Some((root, keys))
        }
        Expr::Field { object, name } => {
            let (root, mut keys) = path_of(object)?;
            keys.push(Expr::Str(name.clone()));
            Some((root, keys))
        }
        _ => None,
    }
}

fn descend<'v>(slot: &'v mut Value, key: &Value) -> Result<&'v mut Value, String> {
    match slot {
        Value::Object(map) => {
            let key = key_string(key)?;
            map.get_mut(&key)
                .ok_or(format!("cannot assign through missing key '{key}'"))
        }
        Value::Array(items) => {
            let idx = list_index(items.len(), key)?;
            Ok(&mut items[idx])
        }
        other => Err(format!("cannot index {}", type_name(other))),
    }
}

/// Resolve a list index, supporting negative (from-the-end) positions.
fn list_index(len: usize, index: &Value) -> Result<usize, String> {
    let f = as_number(index).ok_or("list index must be a number")?;
    if f.fract() != 0.0 {
        return Err("list index must be an integer".into());
    }
    let i = f as i64;
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved as usize >= len {
        return Err(format!("list index {i} out of range (len {len})"));
    }
    Ok(resolved as usize)
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;
    use serde_json::json;

    fn run(source: &str, ctx: Value) -> Result<Option<Value>, SandboxError> {
        let program = parse(source)?;
        let mut interp = Interp::new(ctx, &ExecLimits::default());
        interp.run(&program)?;
        Ok(interp.take_result())
    }

    #[test]
    fn sums_over_ctx_days() {
        let ctx = json!({
            "days": [
                {"kind": "observed", "units": 3},
                {"kind": "observed", "units": 4},
                {"kind": "predicted", "units": 100},
            ]
        });
        let src = r#"
            total = 0
            for d in ctx.days {
                if d.kind == "observed" {
                    total = total + d.units
                }
            }
            result = [total]
        "#;
        assert_eq!(run(src, ctx).unwrap(), Some(json!([7.0])));
    }

    #[test]
    fn map_accumulation_by_numeric_key() {
        let ctx = json!({"rows": [
            {"id": 7, "qty": 2.5},
            {"id": 7, "qty": 1.5},
            {"id": 9, "qty": 1.0},
        ]});
        let src = r#"
            acc = {}
            for r in ctx.rows {
                acc[r.id] = get(acc, r.id, 0) + r.qty
            }
            result = [acc["7"], acc["9"]]
        "#;
        assert_eq!(run(src, ctx).unwrap(), Some(json!([4.0, 1.0])));
    }

    #[test]
    fn missing_map_keys_are_null() {
        let src = r#"
            d = {"a": 1}
            result = [d.b, d["missing"]]
        "#;
        assert_eq!(run(src, json!({})).unwrap(), Some(json!([null, null])));
    }

    #[test]
    fn break_and_continue() {
        let src = r#"
            seen = []
            for x in [1, 2, 3, 4, 5] {
                if x == 2 {
                    continue
                }
                if x == 4 {
                    break
                }
                seen = seen + [x]
            }
            result = seen
        "#;
        assert_eq!(run(src, json!({})).unwrap(), Some(json!([1.0, 3.0])));
    }

    #[test]
    fn string_comparison_orders_iso_dates() {
        let src = r#"
            result = ["2024-03-05" < "2024-03-10", "2024-03-05" <= "2024-03-05"]
        "#;
        assert_eq!(run(src, json!({})).unwrap(), Some(json!([true, true])));
    }

    #[test]
    fn fuel_exhaustion_is_reported() {
        let program = parse(
            r#"
            x = 0
            for a in [1, 2, 3, 4, 5, 6, 7, 8, 9, 10] {
                for b in [1, 2, 3, 4, 5, 6, 7, 8, 9, 10] {
                    x = x + 1
                }
            }
            result = [x]
        "#,
        )
        .unwrap();
        let limits = ExecLimits {
            fuel: 50,
            timeout: Duration::from_secs(5),
        };
        let mut interp = Interp::new(json!({}), &limits);
        assert!(matches!(
            interp.run(&program),
            Err(SandboxError::FuelExhausted)
        ));
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        assert!(matches!(
            run("result = [1 / 0]", json!({})),
            Err(SandboxError::Runtime(_))
        ));
    }

    #[test]
    fn and_or_yield_operands() {
        let src = r#"
            a = null or []
            b = null or "fallback"
            c = 1 and "right"
            result = [a, b, c]
        "#;
        assert_eq!(
            run(src, json!({})).unwrap(),
            Some(json!([[], "fallback", "right"]))
        );
    }
}
