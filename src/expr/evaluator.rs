//! Evaluates a parsed [`Expr`] against a read-only [`Scope`].

use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use rustc_hash::FxHashMap;
use serde_json::Value;

use super::cache::{hash_scope, ExpressionCache};
use super::parser::{self, BinaryOp, Expr, Literal, UnaryOp};
use super::{EvalOutcome, ExpressionError, Scope, ValidateOutcome};
use crate::errors::EngineError;

type TransformFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
type FunctionFn = Arc<dyn Fn(&[Value]) -> Result<Value, ExpressionError> + Send + Sync>;

const BUILTIN_TRANSFORMS: &[&str] = &["upper", "lower", "trim"];
const BUILTIN_FUNCTIONS: &[&str] = &["Math.max", "Math.min", "Math.abs", "length"];

/// Pure evaluator for the condition/transform dialect.
///
/// Cloning is cheap: the transform/function tables and the cache are held
/// behind `Arc`, so a clone shares registrations and cached results with its
/// origin — a cheap-to-clone service handle.
#[derive(Clone)]
pub struct ExpressionEvaluator {
    transforms: Arc<RwLock<FxHashMap<String, TransformFn>>>,
    functions: Arc<RwLock<FxHashMap<String, FunctionFn>>>,
    cache: Arc<ExpressionCache>,
}

impl ExpressionEvaluator {
    pub fn new(cache_max_entries: usize) -> Self {
        let evaluator = Self {
            transforms: Arc::new(RwLock::new(FxHashMap::default())),
            functions: Arc::new(RwLock::new(FxHashMap::default())),
            cache: Arc::new(ExpressionCache::new(cache_max_entries)),
        };
        evaluator.install_builtins();
        evaluator
    }

    fn install_builtins(&self) {
        let mut transforms = self.transforms.write();
        transforms.insert(
            "upper".to_string(),
            Arc::new(|v: &Value| Value::String(value_to_string(v).to_uppercase())) as TransformFn,
        );
        transforms.insert(
            "lower".to_string(),
            Arc::new(|v: &Value| Value::String(value_to_string(v).to_lowercase())) as TransformFn,
        );
        transforms.insert(
            "trim".to_string(),
            Arc::new(|v: &Value| Value::String(value_to_string(v).trim().to_string()))
                as TransformFn,
        );
        drop(transforms);

        let mut functions = self.functions.write();
        functions.insert(
            "Math.max".to_string(),
            Arc::new(|args: &[Value]| {
                numeric_fold(args, f64::NEG_INFINITY, f64::max)
            }) as FunctionFn,
        );
        functions.insert(
            "Math.min".to_string(),
            Arc::new(|args: &[Value]| numeric_fold(args, f64::INFINITY, f64::min)) as FunctionFn,
        );
        functions.insert(
            "Math.abs".to_string(),
            Arc::new(|args: &[Value]| {
                let n = args.first().map(value_to_number).unwrap_or(0.0);
                Ok(Value::from(n.abs()))
            }) as FunctionFn,
        );
        functions.insert(
            "length".to_string(),
            Arc::new(|args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    Some(Value::Null) | None => 0,
                    Some(other) => {
                        return Err(ExpressionError::TypeError {
                            expected: "string, array, or object".to_string(),
                            actual: value_type_name(other),
                        })
                    }
                };
                Ok(Value::from(len))
            }) as FunctionFn,
        );
    }

    /// Register a custom unary transform. Fails with [`EngineError::Conflict`]
    /// when `name` shadows a builtin.
    pub fn register_transform(
        &self,
        name: impl Into<String>,
        f: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) -> Result<(), EngineError> {
        let name = name.into();
        if BUILTIN_TRANSFORMS.contains(&name.as_str()) {
            return Err(EngineError::conflict(format!(
                "transform '{name}' is a builtin and cannot be overwritten"
            )));
        }
        self.transforms.write().insert(name, Arc::new(f));
        Ok(())
    }

    /// Register a custom multi-arity function. Fails with
    /// [`EngineError::Conflict`] when `name` shadows a builtin.
    pub fn register_function(
        &self,
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> Result<Value, ExpressionError> + Send + Sync + 'static,
    ) -> Result<(), EngineError> {
        let name = name.into();
        if BUILTIN_FUNCTIONS.contains(&name.as_str()) {
            return Err(EngineError::conflict(format!(
                "function '{name}' is a builtin and cannot be overwritten"
            )));
        }
        self.functions.write().insert(name, Arc::new(f));
        Ok(())
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    /// Evaluate `expression` against `scope`. Never panics and never
    /// surfaces a parse or runtime failure as an `Err` — failures are
    /// reported through `EvalOutcome::error` ("evaluator never
    /// throws").
    pub fn evaluate(&self, expression: &str, scope: &Scope<'_>) -> EvalOutcome {
        let scope_hash = hash_scope(scope.variables);
        let key = ExpressionCache::key(expression, scope_hash);
        if let Some(cached) = self.cache.get(key) {
            return EvalOutcome {
                success: true,
                value: Some(cached),
                error: None,
            };
        }

        match parser::parse(expression).and_then(|expr| self.eval(&expr, scope)) {
            Ok(value) => {
                self.cache.put(key, value.clone());
                EvalOutcome {
                    success: true,
                    value: Some(value),
                    error: None,
                }
            }
            Err(err) => EvalOutcome {
                success: false,
                value: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Parse and statically check `expression`. If `scope` is supplied, every
    /// top-level variable reference must resolve within it.
    pub fn validate(&self, expression: &str, scope: Option<&Scope<'_>>) -> ValidateOutcome {
        let trimmed = expression.trim().to_string();
        match parser::parse(&trimmed) {
            Err(err) => ValidateOutcome {
                valid: false,
                errors: vec![err.to_string()],
                trimmed,
            },
            Ok(expr) => {
                let mut errors = Vec::new();
                if let Some(scope) = scope {
                    let mut names = Vec::new();
                    parser::referenced_variables(&expr, &mut names);
                    for name in names {
                        if name == "Math" {
                            continue;
                        }
                        let resolvable = scope.variables.contains_key(&name)
                            || scope
                                .custom
                                .map(|custom| custom.contains_key(&name))
                                .unwrap_or(false);
                        if !resolvable {
                            errors.push(format!("unresolvable identifier '{name}'"));
                        }
                    }
                }
                ValidateOutcome {
                    valid: errors.is_empty(),
                    errors,
                    trimmed,
                }
            }
        }
    }

    fn eval(&self, expr: &Expr, scope: &Scope<'_>) -> Result<Value, ExpressionError> {
        match expr {
            Expr::Literal(lit) => Ok(eval_literal(lit)),
            Expr::Variable(name) => Ok(self.eval_variable(name, scope)),
            Expr::Member { object, property } => {
                let obj = self.eval(object, scope)?;
                Ok(member_access(&obj, property))
            }
            Expr::Index { object, index } => {
                let obj = self.eval(object, scope)?;
                let idx = self.eval(index, scope)?;
                Ok(index_access(&obj, &idx))
            }
            Expr::Call { name, args } => {
                let values = self.eval_args(args, scope)?;
                self.call_function(name, &values)
            }
            Expr::MethodCall {
                object,
                method,
                args,
            } => {
                let obj = self.eval(object, scope)?;
                let values = self.eval_args(args, scope)?;
                call_method(&obj, method, &values)
            }
            Expr::Transform { expr, name } => {
                let value = self.eval(expr, scope)?;
                self.apply_transform(name, &value)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!is_truthy(&value)),
                    UnaryOp::Neg => Value::from(-value_to_number(&value)),
                })
            }
            Expr::Binary { left, op, right } => self.eval_binary(left, *op, right, scope),
            Expr::In {
                needle,
                haystack,
                negate,
            } => {
                let needle = self.eval(needle, scope)?;
                let haystack = self.eval(haystack, scope)?;
                let found = membership(&needle, &haystack);
                Ok(Value::Bool(found != *negate))
            }
            Expr::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.eval(cond, scope)?;
                if is_truthy(&cond) {
                    self.eval(then_branch, scope)
                } else {
                    self.eval(else_branch, scope)
                }
            }
        }
    }

    fn eval_args(&self, args: &[Expr], scope: &Scope<'_>) -> Result<Vec<Value>, ExpressionError> {
        args.iter().map(|arg| self.eval(arg, scope)).collect()
    }

    fn eval_variable(&self, name: &str, scope: &Scope<'_>) -> Value {
        scope
            .variables
            .get(name)
            .or_else(|| scope.custom.and_then(|custom| custom.get(name)))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn eval_binary(
        &self,
        left: &Expr,
        op: BinaryOp,
        right: &Expr,
        scope: &Scope<'_>,
    ) -> Result<Value, ExpressionError> {
        if op == BinaryOp::And {
            let left_val = self.eval(left, scope)?;
            if !is_truthy(&left_val) {
                return Ok(left_val);
            }
            return self.eval(right, scope);
        }
        if op == BinaryOp::Or {
            let left_val = self.eval(left, scope)?;
            if is_truthy(&left_val) {
                return Ok(left_val);
            }
            return self.eval(right, scope);
        }

        let left_val = self.eval(left, scope)?;
        let right_val = self.eval(right, scope)?;
        match op {
            BinaryOp::Add => Ok(eval_add(&left_val, &right_val)),
            BinaryOp::Sub => Ok(Value::from(value_to_number(&left_val) - value_to_number(&right_val))),
            BinaryOp::Mul => Ok(Value::from(value_to_number(&left_val) * value_to_number(&right_val))),
            BinaryOp::Div => {
                let denom = value_to_number(&right_val);
                if denom == 0.0 {
                    Err(ExpressionError::DivisionByZero)
                } else {
                    Ok(Value::from(value_to_number(&left_val) / denom))
                }
            }
            BinaryOp::Mod => {
                let denom = value_to_number(&right_val);
                if denom == 0.0 {
                    Err(ExpressionError::DivisionByZero)
                } else {
                    Ok(Value::from(value_to_number(&left_val) % denom))
                }
            }
            BinaryOp::Eq => Ok(Value::Bool(values_equal(&left_val, &right_val))),
            BinaryOp::Ne => Ok(Value::Bool(!values_equal(&left_val, &right_val))),
            BinaryOp::Lt => Ok(Value::Bool(compare(&left_val, &right_val) == Some(std::cmp::Ordering::Less))),
            BinaryOp::Le => Ok(Value::Bool(matches!(
                compare(&left_val, &right_val),
                Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
            ))),
            BinaryOp::Gt => Ok(Value::Bool(compare(&left_val, &right_val) == Some(std::cmp::Ordering::Greater))),
            BinaryOp::Ge => Ok(Value::Bool(matches!(
                compare(&left_val, &right_val),
                Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
            ))),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
        let functions = self.functions.read();
        match functions.get(name) {
            Some(f) => f(args),
            None => Err(ExpressionError::UnknownFunction(name.to_string())),
        }
    }

    fn apply_transform(&self, name: &str, value: &Value) -> Result<Value, ExpressionError> {
        let transforms = self.transforms.read();
        match transforms.get(name) {
            Some(f) => Ok(f(value)),
            None => Err(ExpressionError::UnknownTransform(name.to_string())),
        }
    }

    /// Public entry point used by [`crate::context_filter`]'s `transform`
    /// rules, which apply a named transform by name rather than through a
    /// parsed `|name` expression.
    pub fn apply_named_transform(&self, name: &str, value: &Value) -> Option<Value> {
        self.apply_transform(name, value).ok()
    }
}

fn numeric_fold(
    args: &[Value],
    init: f64,
    fold: impl Fn(f64, f64) -> f64,
) -> Result<Value, ExpressionError> {
    let result = args.iter().map(value_to_number).fold(init, fold);
    Ok(Value::from(result))
}

fn call_method(object: &Value, method: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    match method {
        "contains" => Ok(Value::Bool(contains(object, args.first()))),
        "startsWith" => Ok(Value::Bool(match (object, args.first()) {
            (Value::String(s), Some(Value::String(prefix))) => s.starts_with(prefix.as_str()),
            _ => false,
        })),
        "endsWith" => Ok(Value::Bool(match (object, args.first()) {
            (Value::String(s), Some(Value::String(suffix))) => s.ends_with(suffix.as_str()),
            _ => false,
        })),
        "matches" => {
            let (Value::String(s), Some(Value::String(pattern))) = (object, args.first()) else {
                return Ok(Value::Bool(false));
            };
            let regex = Regex::new(pattern)
                .map_err(|e| ExpressionError::TypeError {
                    expected: "valid regex".to_string(),
                    actual: e.to_string(),
                })?;
            Ok(Value::Bool(regex.is_match(s)))
        }
        other => Err(ExpressionError::UnsupportedMethod(other.to_string())),
    }
}

fn contains(object: &Value, needle: Option<&Value>) -> bool {
    let Some(needle) = needle else { return false };
    match object {
        Value::String(s) => match needle {
            Value::String(n) => s.contains(n.as_str()),
            _ => false,
        },
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        _ => false,
    }
}

fn membership(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::String(s) => match needle {
            Value::String(n) => s.contains(n.as_str()),
            _ => false,
        },
        _ => false,
    }
}

fn member_access(object: &Value, property: &str) -> Value {
    match object {
        Value::Object(map) => map.get(property).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn index_access(object: &Value, index: &Value) -> Value {
    match (object, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n.as_i64().unwrap_or(-1);
            if i < 0 {
                Value::Null
            } else {
                items.get(i as usize).cloned().unwrap_or(Value::Null)
            }
        }
        (Value::Object(map), Value::String(key)) => map.get(key).cloned().unwrap_or(Value::Null),
        (Value::String(s), Value::Number(n)) => {
            let i = n.as_i64().unwrap_or(-1);
            if i < 0 {
                Value::Null
            } else {
                s.chars()
                    .nth(i as usize)
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or(Value::Null)
            }
        }
        _ => Value::Null,
    }
}

fn eval_literal(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Number(n) => Value::from(*n),
        Literal::String(s) => Value::String(s.clone()),
    }
}

fn eval_add(left: &Value, right: &Value) -> Value {
    match (left, right) {
        (Value::String(l), Value::String(r)) => Value::String(format!("{l}{r}")),
        (Value::String(l), r) => Value::String(format!("{l}{}", value_to_string(r))),
        (l, Value::String(r)) => Value::String(format!("{}{r}", value_to_string(l))),
        _ => Value::from(value_to_number(left) + value_to_number(right)),
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            l.as_f64().unwrap_or(0.0) == r.as_f64().unwrap_or(0.0)
        }
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.parse::<f64>().ok() == n.as_f64()
        }
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

fn value_to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(f64::NAN),
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_type_name(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(vars: &[(&str, Value)]) -> FxHashMap<String, Value> {
        vars.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn evaluates_arithmetic_and_comparison() {
        let evaluator = ExpressionEvaluator::new(16);
        let vars = scope(&[("value", Value::from(20))]);
        let outcome = evaluator.evaluate("value > 10", &Scope::new(&vars));
        assert!(outcome.success);
        assert_eq!(outcome.value, Some(Value::Bool(true)));
    }

    #[test]
    fn division_by_zero_is_reported_not_thrown() {
        let evaluator = ExpressionEvaluator::new(16);
        let vars = scope(&[]);
        let outcome = evaluator.evaluate("1 / 0", &Scope::new(&vars));
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("DivisionByZero"));
    }

    #[test]
    fn absent_path_yields_null_not_error() {
        let evaluator = ExpressionEvaluator::new(16);
        let vars = scope(&[("obj", serde_json::json!({"a": 1}))]);
        let outcome = evaluator.evaluate("obj.missing", &Scope::new(&vars));
        assert!(outcome.success);
        assert_eq!(outcome.value, Some(Value::Null));
    }

    #[test]
    fn caches_repeated_evaluations() {
        let evaluator = ExpressionEvaluator::new(16);
        let vars = scope(&[("value", Value::from(1))]);
        let scope_ref = Scope::new(&vars);
        assert_eq!(evaluator.cache_size(), 0);
        evaluator.evaluate("value + 1", &scope_ref);
        assert_eq!(evaluator.cache_size(), 1);
        evaluator.evaluate("value + 1", &scope_ref);
        assert_eq!(evaluator.cache_size(), 1);
    }

    #[test]
    fn register_transform_rejects_builtin_name() {
        let evaluator = ExpressionEvaluator::new(16);
        let result = evaluator.register_transform("upper", |v| v.clone());
        assert!(result.is_err());
    }

    #[test]
    fn ternary_and_transform_compose() {
        let evaluator = ExpressionEvaluator::new(16);
        let vars = scope(&[("name", Value::String("ada".to_string()))]);
        let outcome = evaluator.evaluate("name|upper == \"ADA\" ? 1 : 0", &Scope::new(&vars));
        assert_eq!(outcome.value, Some(Value::from(1)));
    }
}
