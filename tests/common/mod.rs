//! Shared fixtures for the black-box integration tests.

use rustc_hash::FxHashMap;
use threadgraph::edge::{Edge, EdgeKind};
use threadgraph::ids::{EdgeId, NodeId, WorkflowId};
use threadgraph::node::{Node, NodeKind};
use threadgraph::workflow::Workflow;

/// `start -> end`, the minimal valid workflow.
pub fn linear_workflow() -> Workflow {
    Workflow::new(WorkflowId::new("wf-linear"), "linear")
        .with_node(Node::new(NodeId::new("start"), NodeKind::Start))
        .with_node(Node::new(NodeId::new("end"), NodeKind::End))
        .with_edge(Edge::new(
            EdgeId::new("e1"),
            EdgeKind::Sequence,
            NodeId::new("start"),
            NodeId::new("end"),
        ))
}

/// `start -> route -> {high, low} -> end`, where `route` has two
/// conditional edges gated on `score` plus a default fallback.
pub fn branching_workflow() -> Workflow {
    Workflow::new(WorkflowId::new("wf-branch"), "branching")
        .with_node(Node::new(NodeId::new("start"), NodeKind::Start))
        .with_node(Node::new(NodeId::new("route"), NodeKind::Condition))
        .with_node(Node::new(NodeId::new("high"), NodeKind::DataTransform))
        .with_node(Node::new(NodeId::new("low"), NodeKind::DataTransform))
        .with_node(Node::new(NodeId::new("end"), NodeKind::End))
        .with_edge(Edge::new(
            EdgeId::new("e0"),
            EdgeKind::Sequence,
            NodeId::new("start"),
            NodeId::new("route"),
        ))
        .with_edge(
            Edge::new(EdgeId::new("e1"), EdgeKind::Conditional, NodeId::new("route"), NodeId::new("high"))
                .with_condition("score >= 50"),
        )
        .with_edge(
            Edge::new(EdgeId::new("e2"), EdgeKind::Conditional, NodeId::new("route"), NodeId::new("low"))
                .with_condition("score < 50"),
        )
        .with_edge(Edge::new(
            EdgeId::new("e3"),
            EdgeKind::Sequence,
            NodeId::new("high"),
            NodeId::new("end"),
        ))
        .with_edge(Edge::new(
            EdgeId::new("e4"),
            EdgeKind::Sequence,
            NodeId::new("low"),
            NodeId::new("end"),
        ))
}

pub fn empty_inputs() -> FxHashMap<String, serde_json::Value> {
    FxHashMap::default()
}
