//! The engine's error taxonomy.
//!
//! Every subsystem surfaces failures through [`EngineError`]. The eight
//! variants are exhaustive by design: adding a ninth kind of failure to the
//! engine means deciding which of these it really is, not growing the enum.

use miette::Diagnostic;
use thiserror::Error;

use crate::ids::{CheckpointId, EdgeId, NodeId, ThreadId};

/// The engine's single error type. `execute`/`resumeFromCheckpoint` never
/// propagate this as an `Err` for anything other than [`EngineError::Internal`]
/// (a broken invariant, i.e. a bug) — every other kind is instead folded into
/// an [`ExecutionReport`](crate::engine::ExecutionReport)'s `error` field so
/// that `execute` always returns a report.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("validation failed: {message}")]
    #[diagnostic(
        code(threadgraph::validation),
        help("check the workflow/expression/context construction that produced this")
    )]
    Validation { message: String },

    #[error("{what} not found: {id}")]
    #[diagnostic(code(threadgraph::not_found))]
    NotFound { what: &'static str, id: String },

    #[error("conflict: {message}")]
    #[diagnostic(
        code(threadgraph::conflict),
        help("this operation would overwrite or invalidate existing state")
    )]
    Conflict { message: String },

    #[error("operation timed out")]
    #[diagnostic(code(threadgraph::timeout))]
    Timeout,

    #[error("operation cancelled")]
    #[diagnostic(code(threadgraph::cancelled))]
    Cancelled,

    #[error("step budget exceeded: executed {executed} nodes against a budget of {max_steps}")]
    #[diagnostic(
        code(threadgraph::budget_exceeded),
        help("raise `engine.max_steps` or check for an unterminated loop")
    )]
    BudgetExceeded { executed: u64, max_steps: u64 },

    #[error("handler for node {node_id} failed: {message}")]
    #[diagnostic(code(threadgraph::handler))]
    Handler { node_id: NodeId, message: String },

    #[error("internal invariant broken: {message}")]
    #[diagnostic(
        code(threadgraph::internal),
        help("this is a bug in the engine, not in caller input")
    )]
    Internal { message: String },
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found_node(id: &NodeId) -> Self {
        Self::NotFound {
            what: "node",
            id: id.to_string(),
        }
    }

    pub fn not_found_edge(id: &EdgeId) -> Self {
        Self::NotFound {
            what: "edge",
            id: id.to_string(),
        }
    }

    pub fn not_found_thread(id: &ThreadId) -> Self {
        Self::NotFound {
            what: "thread",
            id: id.to_string(),
        }
    }

    pub fn not_found_checkpoint(id: &CheckpointId) -> Self {
        Self::NotFound {
            what: "checkpoint",
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// A short machine-friendly tag for the error kind, used in history
    /// records and execution reports where the full `Display` is too verbose.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "Validation",
            Self::NotFound { .. } => "NotFound",
            Self::Conflict { .. } => "Conflict",
            Self::Timeout => "Timeout",
            Self::Cancelled => "Cancelled",
            Self::BudgetExceeded { .. } => "BudgetExceeded",
            Self::Handler { .. } => "Handler",
            Self::Internal { .. } => "Internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tag_is_stable() {
        assert_eq!(EngineError::Timeout.kind_tag(), "Timeout");
        assert_eq!(
            EngineError::validation("bad expr").kind_tag(),
            "Validation"
        );
    }
}
