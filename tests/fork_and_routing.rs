//! Black-box coverage for two of the specification's testable properties
//!: deterministic edge routing, and fork purity (the parent thread is
//! never mutated by a fork).

use rustc_hash::FxHashMap;
use serde_json::Value;
use threadgraph::edge::{Edge, EdgeKind};
use threadgraph::expr::ExpressionEvaluator;
use threadgraph::fork::{fork_thread, ForkOptions, ForkStrategy, NodeStateHandling};
use threadgraph::ids::{EdgeId, IdGenerator, NodeId, ThreadId, WorkflowId};
use threadgraph::node::NodeStatus;
use threadgraph::router::ConditionalRouter;
use threadgraph::state::{NodeExecutionState, WorkflowState};

fn router() -> ConditionalRouter {
    ConditionalRouter::new(ExpressionEvaluator::new(64))
}

#[test]
fn routing_is_deterministic_regardless_of_edge_input_order() {
    let edges = vec![
        Edge::new(EdgeId::new("low"), EdgeKind::Sequence, NodeId::new("a"), NodeId::new("x")).with_weight(1.0),
        Edge::new(EdgeId::new("high"), EdgeKind::Sequence, NodeId::new("a"), NodeId::new("y")).with_weight(10.0),
        Edge::new(EdgeId::new("mid"), EdgeKind::Sequence, NodeId::new("a"), NodeId::new("z")).with_weight(5.0),
    ];
    let workflow_id = WorkflowId::new("wf");
    let variables: FxHashMap<String, Value> = FxHashMap::default();
    let router = router();

    let forward: Vec<&Edge> = edges.iter().collect();
    let mut reversed: Vec<&Edge> = edges.iter().collect();
    reversed.reverse();

    let decision_a = router.route(&workflow_id, &forward, &variables, true);
    let decision_b = router.route(&workflow_id, &reversed, &variables, true);

    assert_eq!(decision_a.next_node_ids, decision_b.next_node_ids);
    assert_eq!(decision_a.next_node_ids, vec![NodeId::new("y")]);
}

#[test]
fn fork_never_mutates_the_parent_thread() {
    let id_gen = IdGenerator::new();
    let mut parent = WorkflowState::new(WorkflowId::new("wf"), ThreadId::new("parent"), FxHashMap::default());
    parent.current_node_id = Some(NodeId::new("n1"));
    parent.execution_context = parent.execution_context.set_variable("counter", Value::from(1));
    let mut node_state = NodeExecutionState::default();
    node_state.status = Some(NodeStatus::Completed);
    parent.node_execution_states.insert(NodeId::new("n1"), node_state);

    let before = parent.to_props().unwrap();

    let (_, forked) = fork_thread(
        &id_gen,
        &parent,
        &NodeId::new("n1"),
        ForkOptions::new(ForkStrategy::Full, NodeStateHandling::Copy),
    )
    .unwrap();

    assert_eq!(parent.to_props().unwrap(), before, "fork must not mutate the parent's state");
    assert_ne!(forked.thread_id, parent.thread_id);
    assert_eq!(forked.execution_context.get_variable("counter"), Some(&Value::from(1)));
}
