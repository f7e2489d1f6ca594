use crate::value::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("unsupported expression: {0}")]
    Unsupported(String),
    #[error("variable not found: {0}")]
    NotFound(String),
}

/// The expression evaluator collaborator (spec §1: FEEL internals are out of
/// scope). The engine depends only on this trait; a real deployment would
/// plug in a full FEEL engine here.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expr: &str, variables: &Value) -> Result<Value, EvalError>;
}

/// Minimal default evaluator: literal values pass through; strings prefixed
/// `=` are treated as a dotted variable-path lookup plus a small set of
/// comparison/equality forms — exactly enough to drive the conditional
/// flows, boundary error codes, and correlation keys this engine's own
/// tests and scenarios require. Not a FEEL implementation.
#[derive(Default)]
pub struct LiteralEvaluator;

impl ExpressionEvaluator for LiteralEvaluator {
    fn evaluate(&self, expr: &str, variables: &Value) -> Result<Value, EvalError> {
        let Some(body) = expr.strip_prefix('=') else {
            return Ok(Value::String(expr.to_string()));
        };
        let body = body.trim();

        for (op, f) in [
            (">=", (|a: f64, b: f64| a >= b) as fn(f64, f64) -> bool),
            ("<=", |a, b| a <= b),
            ("!=", |a, b| a != b),
            (">", |a, b| a > b),
            ("<", |a, b| a < b),
        ] {
            if let Some((lhs, rhs)) = body.split_once(op) {
                let lv = resolve_term(lhs.trim(), variables)?;
                let rv = resolve_term(rhs.trim(), variables)?;
                if let (Some(a), Some(b)) = (lv.as_f64(), rv.as_f64()) {
                    return Ok(Value::Bool(f(a, b)));
                }
                return Ok(Value::Bool(lv == rv));
            }
        }

        if let Some((lhs, rhs)) = body.split_once('=') {
            let lv = resolve_term(lhs.trim(), variables)?;
            let rv = resolve_term(rhs.trim(), variables)?;
            return Ok(Value::Bool(lv == rv));
        }

        resolve_term(body, variables)
    }
}

fn resolve_term(term: &str, variables: &Value) -> Result<Value, EvalError> {
    if term == "true" {
        return Ok(Value::Bool(true));
    }
    if term == "false" {
        return Ok(Value::Bool(false));
    }
    if term == "null" {
        return Ok(Value::Null);
    }
    if let Ok(n) = term.parse::<f64>() {
        return Ok(Value::Number(n));
    }
    if (term.starts_with('"') && term.ends_with('"') && term.len() >= 2)
        || (term.starts_with('\'') && term.ends_with('\'') && term.len() >= 2)
    {
        return Ok(Value::String(term[1..term.len() - 1].to_string()));
    }
    variables
        .get_path(term)
        .cloned()
        .ok_or_else(|| EvalError::NotFound(term.to_string()))
}

/// Evaluate an expression that MUST resolve to an already-evaluated literal
/// (spec §9, open question 1): correlation keys passed downstream to the
/// correlator are never allowed to retain a leading `=`.
pub fn evaluate_to_literal_string(
    evaluator: &dyn ExpressionEvaluator,
    expr: &str,
    variables: &Value,
) -> Result<String, EvalError> {
    let value = evaluator.evaluate(expr, variables)?;
    let s = value.to_string();
    if s.starts_with('=') {
        return Err(EvalError::Unsupported(format!(
            "correlation key did not resolve to a literal: {s}"
        )));
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_passthrough() {
        let ev = LiteralEvaluator;
        let vars = Value::empty_object();
        assert_eq!(ev.evaluate("hello", &vars).unwrap(), Value::String("hello".into()));
    }

    #[test]
    fn path_lookup() {
        let ev = LiteralEvaluator;
        let mut vars = Value::empty_object();
        vars.set_path("amount", Value::from(150.0));
        assert_eq!(ev.evaluate("=amount", &vars).unwrap(), Value::Number(150.0));
    }

    #[test]
    fn comparison() {
        let ev = LiteralEvaluator;
        let mut vars = Value::empty_object();
        vars.set_path("amount", Value::from(150.0));
        assert_eq!(ev.evaluate("=amount > 100", &vars).unwrap(), Value::Bool(true));
        assert_eq!(ev.evaluate("=amount > 200", &vars).unwrap(), Value::Bool(false));
    }

    #[test]
    fn rejects_residual_equals_as_literal() {
        let ev = LiteralEvaluator;
        let vars = Value::empty_object();
        let err = evaluate_to_literal_string(&ev, "=", &vars);
        assert!(err.is_err());
    }
}
