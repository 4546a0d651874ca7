//! The `Workflow` aggregate: owns nodes and edges, derives start/end nodes,
//! reachability, and adjacency.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::edge::Edge;
use crate::errors::EngineError;
use crate::ids::{EdgeId, NodeId, Version, WorkflowId};
use crate::node::Node;

/// A directed graph of [`Node`]s and [`Edge`]s. Order of the backing maps is
/// irrelevant; routing determinism comes from the
/// [`Router`](crate::router::ConditionalRouter), not iteration order.
#[derive(Clone, Debug)]
pub struct Workflow {
    pub workflow_id: WorkflowId,
    pub name: String,
    pub description: String,
    pub version: Version,
    pub nodes: FxHashMap<NodeId, Node>,
    pub edges: FxHashMap<EdgeId, Edge>,
}

impl Workflow {
    pub fn new(workflow_id: WorkflowId, name: impl Into<String>) -> Self {
        Self {
            workflow_id,
            name: name.into(),
            description: String::new(),
            version: Version::default(),
            nodes: FxHashMap::default(),
            edges: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.insert(node.node_id.clone(), node);
        self
    }

    #[must_use]
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.insert(edge.edge_id.clone(), edge);
        self
    }

    pub fn node(&self, node_id: &NodeId) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn edge(&self, edge_id: &EdgeId) -> Option<&Edge> {
        self.edges.get(edge_id)
    }

    /// Every edge whose `from_node_id == node_id`.
    pub fn outgoing_edges(&self, node_id: &NodeId) -> Vec<&Edge> {
        self.edges
            .values()
            .filter(|e| &e.from_node_id == node_id)
            .collect()
    }

    /// Every edge whose `to_node_id == node_id`.
    pub fn incoming_edges(&self, node_id: &NodeId) -> Vec<&Edge> {
        self.edges
            .values()
            .filter(|e| &e.to_node_id == node_id)
            .collect()
    }

    pub fn in_degree(&self, node_id: &NodeId) -> usize {
        self.incoming_edges(node_id).len()
    }

    pub fn out_degree(&self, node_id: &NodeId) -> usize {
        self.outgoing_edges(node_id).len()
    }

    /// Nodes with in-degree 0, sorted lexicographically by id so callers
    /// get a deterministic "smallest id wins" tiebreak.
    pub fn start_nodes(&self) -> Vec<&NodeId> {
        let mut starts: Vec<&NodeId> = self
            .nodes
            .keys()
            .filter(|id| self.in_degree(id) == 0)
            .collect();
        starts.sort();
        starts
    }

    /// Nodes with out-degree 0, sorted lexicographically by id.
    pub fn end_nodes(&self) -> Vec<&NodeId> {
        let mut ends: Vec<&NodeId> = self
            .nodes
            .keys()
            .filter(|id| self.out_degree(id) == 0)
            .collect();
        ends.sort();
        ends
    }

    /// Nodes reachable from `from` by following outgoing edges.
    pub fn reachable_from(&self, from: &NodeId) -> FxHashSet<NodeId> {
        let mut seen = FxHashSet::default();
        let mut stack = vec![from.clone()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for edge in self.outgoing_edges(&current) {
                if !seen.contains(&edge.to_node_id) {
                    stack.push(edge.to_node_id.clone());
                }
            }
        }
        seen
    }

    /// Validates the graph's structural invariants:
    /// - every edge's endpoints refer to existing nodes,
    /// - no self-loops on a node that isn't `loop_capable`,
    /// - at least one start node and one end node when the workflow is
    ///   non-empty.
    pub fn validate(&self) -> Result<(), EngineError> {
        for edge in self.edges.values() {
            let from = self
                .nodes
                .get(&edge.from_node_id)
                .ok_or_else(|| EngineError::not_found_node(&edge.from_node_id))?;
            self.nodes
                .get(&edge.to_node_id)
                .ok_or_else(|| EngineError::not_found_node(&edge.to_node_id))?;
            if edge.from_node_id == edge.to_node_id && !from.loop_capable {
                return Err(EngineError::validation(format!(
                    "edge {} is a self-loop on non-loop-capable node {}",
                    edge.edge_id, edge.from_node_id
                )));
            }
        }
        if !self.nodes.is_empty() {
            if self.start_nodes().is_empty() {
                return Err(EngineError::validation(
                    "workflow has no node with in-degree 0 (no start node)",
                ));
            }
            if self.end_nodes().is_empty() {
                return Err(EngineError::validation(
                    "workflow has no node with out-degree 0 (no end node)",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeKind;
    use crate::node::NodeKind;

    fn wf() -> Workflow {
        Workflow::new(WorkflowId::new("wf1"), "test")
            .with_node(Node::new(NodeId::new("start"), NodeKind::Start))
            .with_node(Node::new(NodeId::new("end"), NodeKind::End))
            .with_edge(Edge::new(
                EdgeId::new("e1"),
                EdgeKind::Sequence,
                NodeId::new("start"),
                NodeId::new("end"),
            ))
    }

    #[test]
    fn derives_start_and_end_nodes() {
        let workflow = wf();
        assert_eq!(workflow.start_nodes(), vec![&NodeId::new("start")]);
        assert_eq!(workflow.end_nodes(), vec![&NodeId::new("end")]);
        assert!(workflow.validate().is_ok());
    }

    #[test]
    fn rejects_self_loop_on_non_loop_capable_node() {
        let workflow = wf().with_edge(Edge::new(
            EdgeId::new("e2"),
            EdgeKind::Sequence,
            NodeId::new("start"),
            NodeId::new("start"),
        ));
        assert!(workflow.validate().is_err());
    }

    #[test]
    fn allows_self_loop_on_loop_capable_node() {
        let workflow = Workflow::new(WorkflowId::new("wf2"), "loop")
            .with_node(Node::new(NodeId::new("start"), NodeKind::Start))
            .with_node(Node::new(NodeId::new("loop"), NodeKind::LoopStart))
            .with_node(Node::new(NodeId::new("end"), NodeKind::End))
            .with_edge(Edge::new(EdgeId::new("e1"), EdgeKind::Sequence, NodeId::new("start"), NodeId::new("loop")))
            .with_edge(Edge::new(EdgeId::new("e2"), EdgeKind::Sequence, NodeId::new("loop"), NodeId::new("loop")))
            .with_edge(Edge::new(EdgeId::new("e3"), EdgeKind::Sequence, NodeId::new("loop"), NodeId::new("end")));
        assert!(workflow.validate().is_ok());
    }

    #[test]
    fn rejects_dangling_edge() {
        let workflow = Workflow::new(WorkflowId::new("wf3"), "bad").with_edge(Edge::new(
            EdgeId::new("e1"),
            EdgeKind::Sequence,
            NodeId::new("ghost"),
            NodeId::new("nowhere"),
        ));
        assert!(workflow.validate().is_err());
    }
}
