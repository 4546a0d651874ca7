//! The expression dialect used to score edge conditions and filter contexts.
//!
//! Deliberately not a general-purpose scripting language: literals, `.`/`[]`
//! access, comparisons, arithmetic, logical operators, `?:`, `in`/`not_in`,
//! a handful of string methods, a whitelisted function table, and named
//! transforms piped with `|`. The parser and evaluator are split so the
//! evaluator can cache a parsed `Expr` independently of how it was produced.

pub mod cache;
pub mod evaluator;
pub mod parser;

pub use evaluator::ExpressionEvaluator;
pub use parser::Expr;

use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

/// Read-only variable scope an expression is evaluated against: the current
/// `ExecutionContext`'s variables plus an optional caller-supplied overlay.
pub struct Scope<'a> {
    pub variables: &'a FxHashMap<String, Value>,
    pub custom: Option<&'a FxHashMap<String, Value>>,
}

impl<'a> Scope<'a> {
    pub fn new(variables: &'a FxHashMap<String, Value>) -> Self {
        Self {
            variables,
            custom: None,
        }
    }

    pub fn with_custom(
        variables: &'a FxHashMap<String, Value>,
        custom: &'a FxHashMap<String, Value>,
    ) -> Self {
        Self {
            variables,
            custom: Some(custom),
        }
    }
}

/// The result of [`ExpressionEvaluator::evaluate`]. Deliberately not a
/// `Result`: the evaluator never throws, so callers inspect `success`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvalOutcome {
    pub success: bool,
    pub value: Option<Value>,
    pub error: Option<String>,
}

/// The result of [`ExpressionEvaluator::validate`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidateOutcome {
    pub valid: bool,
    pub errors: Vec<String>,
    pub trimmed: String,
}

/// Internal failure modes the evaluator folds into an [`EvalOutcome`]'s
/// `error` string, or that `validate` surfaces directly.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("DivisionByZero")]
    DivisionByZero,
    #[error("property not found: {0}")]
    PropertyNotFound(String),
    #[error("type error: expected {expected}, found {actual}")]
    TypeError { expected: String, actual: String },
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("unknown transform: {0}")]
    UnknownTransform(String),
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
}
