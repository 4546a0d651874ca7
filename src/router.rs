//! Given the outgoing edges of a node and the current state, decide which
//! edge(s) to follow next.
//!
//! A standalone, independently testable type: unions unconditional edges
//! with conditional-edge predicate targets, so router determinism holds
//! as a property in isolation.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::VecDeque;

use crate::edge::{Edge, EdgeKind};
use crate::expr::{evaluator::is_truthy, ExpressionEvaluator, Scope};
use crate::ids::{EdgeId, NodeId, WorkflowId};

/// The outcome of a routing decision.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteDecision {
    pub next_node_ids: Vec<NodeId>,
    pub satisfied_edges: Vec<EdgeId>,
    pub unsatisfied_edges: Vec<EdgeId>,
    pub state_updates: FxHashMap<String, Value>,
    pub metadata: FxHashMap<String, Value>,
}

impl RouteDecision {
    fn empty_with_reason(reason: &str) -> Self {
        let mut metadata = FxHashMap::default();
        metadata.insert("reason".to_string(), Value::String(reason.to_string()));
        Self {
            metadata,
            ..Default::default()
        }
    }
}

/// Decides which outgoing edge(s) of a node fire, given the current
/// variable scope. Routing history is optional and bounded
/// (disabled unless `with_history` is used), since §4.4 makes it
/// "opt-in via a flag".
pub struct ConditionalRouter {
    evaluator: ExpressionEvaluator,
    history: Option<RwLock<FxHashMap<WorkflowId, VecDeque<RouteDecision>>>>,
    history_bound: usize,
}

impl ConditionalRouter {
    pub fn new(evaluator: ExpressionEvaluator) -> Self {
        Self {
            evaluator,
            history: None,
            history_bound: 0,
        }
    }

    pub fn evaluator(&self) -> &ExpressionEvaluator {
        &self.evaluator
    }

    #[must_use]
    pub fn with_history(mut self, bound: usize) -> Self {
        self.history = Some(RwLock::new(FxHashMap::default()));
        self.history_bound = bound;
        self
    }

    /// Sort edges by descending `priority()`, tiebreaking on ascending
    /// edge-id.
    fn sorted_edges<'a>(&self, edges: &[&'a Edge]) -> Vec<&'a Edge> {
        let mut sorted: Vec<&Edge> = edges.to_vec();
        sorted.sort_by(|a, b| {
            b.priority()
                .partial_cmp(&a.priority())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.edge_id.cmp(&b.edge_id))
        });
        sorted
    }

    fn edge_satisfied(&self, edge: &Edge, variables: &FxHashMap<String, Value>) -> bool {
        match &edge.condition {
            None => true,
            Some(expr) => {
                let scope = Scope::new(variables);
                self.evaluator
                    .evaluate(expr, &scope)
                    .value
                    .map(|v| is_truthy(&v))
                    .unwrap_or(false)
            }
        }
    }

    /// Single-target routing (§4.4 steps 1-4): the first satisfied edge in
    /// priority order wins; if none is satisfied and `allow_default` is
    /// set, fall back to the highest-priority `default` edge.
    pub fn route(
        &self,
        workflow_id: &WorkflowId,
        edges: &[&Edge],
        variables: &FxHashMap<String, Value>,
        allow_default: bool,
    ) -> RouteDecision {
        if edges.is_empty() {
            let decision = RouteDecision::empty_with_reason("end_of_workflow");
            self.record(workflow_id, decision.clone());
            return decision;
        }

        let sorted = self.sorted_edges(edges);
        let mut unsatisfied = Vec::new();
        for edge in &sorted {
            if self.edge_satisfied(edge, variables) {
                let decision = RouteDecision {
                    next_node_ids: vec![edge.to_node_id.clone()],
                    satisfied_edges: vec![edge.edge_id.clone()],
                    unsatisfied_edges: unsatisfied,
                    state_updates: FxHashMap::default(),
                    metadata: FxHashMap::default(),
                };
                self.record(workflow_id, decision.clone());
                return decision;
            }
            unsatisfied.push(edge.edge_id.clone());
        }

        if allow_default {
            if let Some(default_edge) = sorted.iter().find(|e| e.kind == EdgeKind::Default) {
                let mut metadata = FxHashMap::default();
                metadata.insert("isDefault".to_string(), Value::Bool(true));
                let decision = RouteDecision {
                    next_node_ids: vec![default_edge.to_node_id.clone()],
                    satisfied_edges: vec![default_edge.edge_id.clone()],
                    unsatisfied_edges: unsatisfied
                        .into_iter()
                        .filter(|id| id != &default_edge.edge_id)
                        .collect(),
                    state_updates: FxHashMap::default(),
                    metadata,
                };
                self.record(workflow_id, decision.clone());
                return decision;
            }
        }

        let decision = RouteDecision {
            unsatisfied_edges: unsatisfied,
            ..RouteDecision::empty_with_reason("no_satisfied_edges")
        };
        self.record(workflow_id, decision.clone());
        decision
    }

    /// Multi-target routing (§4.4 "routeMultiple"): every satisfied edge is
    /// returned, in priority order.
    pub fn route_multiple(
        &self,
        workflow_id: &WorkflowId,
        edges: &[&Edge],
        variables: &FxHashMap<String, Value>,
    ) -> RouteDecision {
        let sorted = self.sorted_edges(edges);
        let mut next_node_ids = Vec::new();
        let mut satisfied = Vec::new();
        let mut unsatisfied = Vec::new();
        for edge in &sorted {
            if self.edge_satisfied(edge, variables) {
                next_node_ids.push(edge.to_node_id.clone());
                satisfied.push(edge.edge_id.clone());
            } else {
                unsatisfied.push(edge.edge_id.clone());
            }
        }
        let decision = RouteDecision {
            next_node_ids,
            satisfied_edges: satisfied,
            unsatisfied_edges: unsatisfied,
            state_updates: FxHashMap::default(),
            metadata: FxHashMap::default(),
        };
        self.record(workflow_id, decision.clone());
        decision
    }

    fn record(&self, workflow_id: &WorkflowId, decision: RouteDecision) {
        let Some(history) = &self.history else { return };
        if self.history_bound == 0 {
            return;
        }
        let mut history = history.write();
        let entries = history.entry(workflow_id.clone()).or_default();
        entries.push_back(decision);
        while entries.len() > self.history_bound {
            entries.pop_front();
        }
    }

    pub fn routing_history(&self, workflow_id: &WorkflowId) -> Vec<RouteDecision> {
        self.history
            .as_ref()
            .map(|h| {
                h.read()
                    .get(workflow_id)
                    .map(|entries| entries.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(vars: &[(&str, Value)]) -> FxHashMap<String, Value> {
        vars.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn routes_to_first_satisfied_edge_in_priority_order() {
        let router = ConditionalRouter::new(ExpressionEvaluator::new(16));
        let wf_id = WorkflowId::new("wf");
        let branch1 = Edge::new(EdgeId::new("e1"), EdgeKind::Conditional, NodeId::new("start"), NodeId::new("branch1"))
            .with_condition("value > 10");
        let branch2 = Edge::new(EdgeId::new("e2"), EdgeKind::Conditional, NodeId::new("start"), NodeId::new("branch2"))
            .with_condition("value <= 10");
        let edges = vec![&branch1, &branch2];

        let high = router.route(&wf_id, &edges, &scope(&[("value", Value::from(20))]), false);
        assert_eq!(high.next_node_ids, vec![NodeId::new("branch1")]);

        let low = router.route(&wf_id, &edges, &scope(&[("value", Value::from(5))]), false);
        assert_eq!(low.next_node_ids, vec![NodeId::new("branch2")]);
    }

    #[test]
    fn falls_back_to_default_edge_when_allowed() {
        let router = ConditionalRouter::new(ExpressionEvaluator::new(16));
        let wf_id = WorkflowId::new("wf");
        let conditional = Edge::new(EdgeId::new("e1"), EdgeKind::Conditional, NodeId::new("a"), NodeId::new("b"))
            .with_condition("false");
        let default_edge = Edge::new(EdgeId::new("e2"), EdgeKind::Default, NodeId::new("a"), NodeId::new("c"));
        let edges = vec![&conditional, &default_edge];
        let decision = router.route(&wf_id, &edges, &scope(&[]), true);
        assert_eq!(decision.next_node_ids, vec![NodeId::new("c")]);
        assert_eq!(decision.metadata.get("isDefault"), Some(&Value::Bool(true)));
    }

    #[test]
    fn empty_outgoing_edges_reports_end_of_workflow() {
        let router = ConditionalRouter::new(ExpressionEvaluator::new(16));
        let decision = router.route(&WorkflowId::new("wf"), &[], &scope(&[]), false);
        assert!(decision.next_node_ids.is_empty());
        assert_eq!(decision.metadata.get("reason"), Some(&Value::String("end_of_workflow".into())));
    }

    #[test]
    fn route_multiple_returns_every_satisfied_edge() {
        let router = ConditionalRouter::new(ExpressionEvaluator::new(16));
        let wf_id = WorkflowId::new("wf");
        let a = Edge::new(EdgeId::new("e1"), EdgeKind::Conditional, NodeId::new("fork"), NodeId::new("a"))
            .with_condition("true");
        let b = Edge::new(EdgeId::new("e2"), EdgeKind::Conditional, NodeId::new("fork"), NodeId::new("b"))
            .with_condition("true");
        let decision = router.route_multiple(&wf_id, &[&a, &b], &scope(&[]));
        assert_eq!(decision.next_node_ids.len(), 2);
    }

    #[test]
    fn router_is_a_pure_function_of_edges_and_variables() {
        let router = ConditionalRouter::new(ExpressionEvaluator::new(16));
        let wf_id = WorkflowId::new("wf");
        let edge = Edge::new(EdgeId::new("e1"), EdgeKind::Sequence, NodeId::new("a"), NodeId::new("b"));
        let edges = vec![&edge];
        let vars = scope(&[]);
        let first = router.route(&wf_id, &edges, &vars, false);
        let second = router.route(&wf_id, &edges, &vars, false);
        assert_eq!(first, second);
    }
}
