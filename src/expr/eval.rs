//! Evaluator for parsed matcher expressions.
//!
//! Evaluation consumes a bindings map (name -> JSON value) and a functions
//! map (name -> callable). The result is a boolean or a number; the caller
//! decides how to classify anything else.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::{PortcullisError, Result};
use crate::expr::{BinOp, Expr, LitValue};

/// A helper predicate callable from matcher expressions.
pub type MatcherFn = Arc<dyn Fn(&[EvalValue]) -> Result<EvalValue> + Send + Sync>;

/// Runtime value produced while evaluating an expression.
#[derive(Debug, Clone)]
pub enum EvalValue {
    Bool(bool),
    Num(f64),
    Str(String),
    Array(Vec<EvalValue>),
    Null,
}

impl EvalValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            EvalValue::Bool(_) => "bool",
            EvalValue::Num(_) => "number",
            EvalValue::Str(_) => "string",
            EvalValue::Array(_) => "array",
            EvalValue::Null => "null",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EvalValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            EvalValue::Num(n) => Some(*n),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            EvalValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl PartialEq for EvalValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EvalValue::Bool(a), EvalValue::Bool(b)) => a == b,
            (EvalValue::Num(a), EvalValue::Num(b)) => a == b,
            (EvalValue::Str(a), EvalValue::Str(b)) => a == b,
            (EvalValue::Null, EvalValue::Null) => true,
            _ => false,
        }
    }
}

impl From<&Value> for EvalValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => EvalValue::Null,
            Value::Bool(b) => EvalValue::Bool(*b),
            Value::Number(n) => n.as_f64().map(EvalValue::Num).unwrap_or(EvalValue::Null),
            Value::String(s) => EvalValue::Str(s.clone()),
            Value::Array(arr) => EvalValue::Array(arr.iter().map(EvalValue::from).collect()),
            // objects are only traversed via dotted paths, never compared
            Value::Object(_) => EvalValue::Null,
        }
    }
}

/// Evaluate an expression against bindings and helper functions.
pub fn evaluate(
    expr: &Expr,
    bindings: &HashMap<String, Value>,
    functions: &HashMap<String, MatcherFn>,
) -> Result<EvalValue> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            LitValue::Int(n) => EvalValue::Num(*n as f64),
            LitValue::Float(f) => EvalValue::Num(*f),
            LitValue::Str(s) => EvalValue::Str(s.clone()),
            LitValue::Bool(b) => EvalValue::Bool(*b),
        }),
        Expr::Path(segments) => {
            let root = bindings.get(&segments[0]).ok_or_else(|| {
                PortcullisError::Expression(format!("unknown identifier `{}`", segments[0]))
            })?;
            let mut current = root;
            for seg in &segments[1..] {
                let Value::Object(map) = current else {
                    return Err(PortcullisError::Expression(format!(
                        "`{}` is not an attribute object; cannot access `.{seg}`",
                        segments[0]
                    )));
                };
                current = map.get(seg).unwrap_or(&Value::Null);
            }
            Ok(EvalValue::from(current))
        }
        Expr::Call { name, args } => {
            let f = functions.get(name).ok_or_else(|| {
                PortcullisError::Expression(format!("unknown function `{name}`"))
            })?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, bindings, functions)?);
            }
            f(&values)
        }
        Expr::UnaryNot(inner) => {
            let val = evaluate(inner, bindings, functions)?;
            match val {
                EvalValue::Bool(b) => Ok(EvalValue::Bool(!b)),
                other => Err(PortcullisError::Expression(format!(
                    "`!` requires a boolean operand, got {}",
                    other.type_name()
                ))),
            }
        }
        Expr::In {
            element,
            collection,
        } => {
            let elem = evaluate(element, bindings, functions)?;
            let coll = evaluate(collection, bindings, functions)?;
            match coll {
                EvalValue::Array(items) => Ok(EvalValue::Bool(items.contains(&elem))),
                other => Err(PortcullisError::Expression(format!(
                    "`in` requires an array on the right side, got {}",
                    other.type_name()
                ))),
            }
        }
        Expr::Tuple(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(evaluate(item, bindings, functions)?);
            }
            Ok(EvalValue::Array(values))
        }
        Expr::BinOp { op, left, right } => eval_binop(*op, left, right, bindings, functions),
    }
}

fn eval_binop(
    op: BinOp,
    left: &Expr,
    right: &Expr,
    bindings: &HashMap<String, Value>,
    functions: &HashMap<String, MatcherFn>,
) -> Result<EvalValue> {
    // && and || short-circuit; the right side may be expensive (a g() call)
    // or only meaningful when the left side holds.
    if matches!(op, BinOp::And | BinOp::Or) {
        let l = evaluate(left, bindings, functions)?;
        let l = l.as_bool().ok_or_else(|| {
            PortcullisError::Expression(format!(
                "`{}` requires boolean operands, got {}",
                if op == BinOp::And { "&&" } else { "||" },
                l.type_name()
            ))
        })?;
        match (op, l) {
            (BinOp::And, false) => return Ok(EvalValue::Bool(false)),
            (BinOp::Or, true) => return Ok(EvalValue::Bool(true)),
            _ => {}
        }
        let r = evaluate(right, bindings, functions)?;
        let r = r.as_bool().ok_or_else(|| {
            PortcullisError::Expression(format!(
                "`{}` requires boolean operands, got {}",
                if op == BinOp::And { "&&" } else { "||" },
                r.type_name()
            ))
        })?;
        return Ok(EvalValue::Bool(r));
    }

    let l = evaluate(left, bindings, functions)?;
    let r = evaluate(right, bindings, functions)?;
    match op {
        BinOp::Eq => Ok(EvalValue::Bool(l == r)),
        BinOp::Ne => Ok(EvalValue::Bool(l != r)),
        BinOp::Gt | BinOp::Lt | BinOp::Ge | BinOp::Le => {
            let lf = l.as_f64().ok_or_else(|| {
                PortcullisError::Expression(format!(
                    "comparison requires numeric operands, got {}",
                    l.type_name()
                ))
            })?;
            let rf = r.as_f64().ok_or_else(|| {
                PortcullisError::Expression(format!(
                    "comparison requires numeric operands, got {}",
                    r.type_name()
                ))
            })?;
            let result = match op {
                BinOp::Gt => lf > rf,
                BinOp::Lt => lf < rf,
                BinOp::Ge => lf >= rf,
                BinOp::Le => lf <= rf,
                _ => unreachable!(),
            };
            Ok(EvalValue::Bool(result))
        }
        BinOp::And | BinOp::Or => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse;
    use serde_json::json;

    fn bindings(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn no_fns() -> HashMap<String, MatcherFn> {
        HashMap::new()
    }

    fn eval_bool(input: &str, b: &HashMap<String, Value>) -> bool {
        match evaluate(&parse(input).unwrap(), b, &no_fns()).unwrap() {
            EvalValue::Bool(v) => v,
            other => panic!("expected bool, got {other:?}"),
        }
    }

    #[test]
    fn test_string_equality() {
        let b = bindings(&[("r_sub", json!("alice")), ("p_sub", json!("alice"))]);
        assert!(eval_bool("r_sub == p_sub", &b));
        let b = bindings(&[("r_sub", json!("alice")), ("p_sub", json!("bob"))]);
        assert!(!eval_bool("r_sub == p_sub", &b));
    }

    #[test]
    fn test_numeric_comparison() {
        let b = bindings(&[("r_age", json!(25))]);
        assert!(eval_bool("r_age >= 18 && r_age < 60", &b));
        let b = bindings(&[("r_age", json!(14))]);
        assert!(!eval_bool("r_age >= 18 && r_age < 60", &b));
    }

    #[test]
    fn test_attribute_access() {
        let b = bindings(&[
            ("r_sub", json!("alice")),
            ("r_obj", json!({ "Owner": "alice" })),
        ]);
        assert!(eval_bool("r_obj.Owner == r_sub", &b));
    }

    #[test]
    fn test_attribute_access_on_string_fails() {
        let b = bindings(&[("r_obj", json!("data1"))]);
        let err = evaluate(&parse("r_obj.Owner == 1").unwrap(), &b, &no_fns()).unwrap_err();
        assert!(matches!(err, PortcullisError::Expression(_)));
    }

    #[test]
    fn test_missing_attribute_is_null() {
        let b = bindings(&[("r_obj", json!({ "Owner": "alice" })), ("r_sub", json!("bob"))]);
        assert!(!eval_bool("r_obj.Missing == r_sub", &b));
    }

    #[test]
    fn test_unknown_identifier() {
        let err = evaluate(&parse("nope == 1").unwrap(), &HashMap::new(), &no_fns()).unwrap_err();
        assert!(matches!(err, PortcullisError::Expression(_)));
    }

    #[test]
    fn test_function_call() {
        let mut fns: HashMap<String, MatcherFn> = HashMap::new();
        fns.insert(
            "startsWith".into(),
            Arc::new(|args: &[EvalValue]| {
                let (Some(s), Some(prefix)) = (args[0].as_str(), args[1].as_str()) else {
                    return Err(PortcullisError::Expression(
                        "startsWith expects strings".into(),
                    ));
                };
                Ok(EvalValue::Bool(s.starts_with(prefix)))
            }),
        );
        let b = bindings(&[("r_obj", json!("/data/1"))]);
        let out = evaluate(&parse(r#"startsWith(r_obj, "/data")"#).unwrap(), &b, &fns).unwrap();
        assert_eq!(out, EvalValue::Bool(true));
    }

    #[test]
    fn test_unknown_function() {
        let err = evaluate(&parse("nope(1)").unwrap(), &HashMap::new(), &no_fns()).unwrap_err();
        assert!(matches!(err, PortcullisError::Expression(_)));
    }

    #[test]
    fn test_in_tuple() {
        let b = bindings(&[("r_sub", json!("bob"))]);
        assert!(eval_bool(r#"r_sub in ("alice", "bob")"#, &b));
        assert!(!eval_bool(r#"r_sub in ("alice", "carol")"#, &b));
    }

    #[test]
    fn test_in_bound_array() {
        let b = bindings(&[
            ("r_ip", json!("10.0.0.1")),
            ("r_ctx", json!({ "allowed": ["10.0.0.1", "10.0.0.2"] })),
        ]);
        assert!(eval_bool("r_ip in r_ctx.allowed", &b));
    }

    #[test]
    fn test_short_circuit_skips_right_side() {
        // The right side would error (unknown function); && must not reach it.
        let b = bindings(&[("r_sub", json!("alice"))]);
        assert!(!eval_bool(r#"r_sub == "bob" && nope(r_sub)"#, &b));
    }

    #[test]
    fn test_numeric_result_passthrough() {
        let b = bindings(&[("p_priority", json!(7))]);
        let out = evaluate(&parse("p_priority").unwrap(), &b, &no_fns()).unwrap();
        assert_eq!(out, EvalValue::Num(7.0));
    }
}
