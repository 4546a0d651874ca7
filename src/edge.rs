//! Edge kinds and the per-edge record the [`Workflow`](crate::workflow::Workflow)
//! aggregate owns.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context_filter::ContextFilter;
use crate::ids::{EdgeId, NodeId};

/// §3: `sequence | conditional | default | error | timeout`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Sequence,
    Conditional,
    Default,
    Error,
    Timeout,
}

impl EdgeKind {
    /// `kind_bias` from §4.4's priority formula.
    pub fn bias(&self) -> f64 {
        match self {
            EdgeKind::Default => 10.0,
            EdgeKind::Conditional => 20.0,
            EdgeKind::Error => 30.0,
            EdgeKind::Sequence | EdgeKind::Timeout => 10.0,
        }
    }
}

/// A directed transition between two nodes, optionally conditional and
/// always carrying a [`ContextFilter`] (pass-all by default).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Edge {
    pub edge_id: EdgeId,
    pub kind: EdgeKind,
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
    /// A missing condition means "unconditionally satisfied".
    pub condition: Option<String>,
    pub weight: Option<f64>,
    pub properties: FxHashMap<String, Value>,
    #[serde(skip, default = "ContextFilter::pass_all")]
    pub context_filter: ContextFilter,
}

impl Edge {
    pub fn new(edge_id: EdgeId, kind: EdgeKind, from_node_id: NodeId, to_node_id: NodeId) -> Self {
        Self {
            edge_id,
            kind,
            from_node_id,
            to_node_id,
            condition: None,
            weight: None,
            properties: FxHashMap::default(),
            context_filter: ContextFilter::pass_all(),
        }
    }

    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    #[must_use]
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }

    #[must_use]
    pub fn with_context_filter(mut self, filter: ContextFilter) -> Self {
        self.context_filter = filter;
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// `priority = weight + kind_bias`. Edges with no explicit
    /// weight default to `0.0`.
    pub fn priority(&self) -> f64 {
        self.weight.unwrap_or(0.0) + self.kind.bias()
    }

    pub fn is_unconditional(&self) -> bool {
        self.condition.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_combines_weight_and_kind_bias() {
        let edge = Edge::new(
            EdgeId::new("e1"),
            EdgeKind::Conditional,
            NodeId::new("a"),
            NodeId::new("b"),
        )
        .with_weight(5.0);
        assert_eq!(edge.priority(), 25.0);
    }

    #[test]
    fn error_edges_outrank_conditional_at_equal_weight() {
        let cond = Edge::new(EdgeId::new("e1"), EdgeKind::Conditional, NodeId::new("a"), NodeId::new("b"));
        let err = Edge::new(EdgeId::new("e2"), EdgeKind::Error, NodeId::new("a"), NodeId::new("c"));
        assert!(err.priority() > cond.priority());
    }
}
