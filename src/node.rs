//! Node kinds and the per-node record the [`Workflow`](crate::workflow::Workflow)
//! aggregate owns.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{NodeId, Timestamp, Version};

/// The tagged variant of node kinds. `Custom` carries a caller-defined
/// tag so collaborators can register handlers for their own node flavors
/// without the engine knowing about them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    End,
    Condition,
    Llm,
    Tool,
    DataTransform,
    Fork,
    Join,
    Subworkflow,
    LoopStart,
    LoopEnd,
    Wait,
    UserInteraction,
    Custom { tag: String },
}

impl NodeKind {
    /// Marker kinds whose semantics are owned by the engine/router rather
    /// than an external handler.
    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            NodeKind::Start
                | NodeKind::End
                | NodeKind::Condition
                | NodeKind::Fork
                | NodeKind::Join
                | NodeKind::Subworkflow
                | NodeKind::LoopStart
                | NodeKind::LoopEnd
        )
    }

    pub fn is_start(&self) -> bool {
        matches!(self, NodeKind::Start)
    }

    pub fn is_end(&self) -> bool {
        matches!(self, NodeKind::End)
    }

    /// A short, stable label used in history/events and as the default
    /// dispatch-table key (see [`crate::executor::NodeKindTag`]).
    pub fn label(&self) -> &str {
        match self {
            NodeKind::Start => "start",
            NodeKind::End => "end",
            NodeKind::Condition => "condition",
            NodeKind::Llm => "llm",
            NodeKind::Tool => "tool",
            NodeKind::DataTransform => "data_transform",
            NodeKind::Fork => "fork",
            NodeKind::Join => "join",
            NodeKind::Subworkflow => "subworkflow",
            NodeKind::LoopStart => "loop_start",
            NodeKind::LoopEnd => "loop_end",
            NodeKind::Wait => "wait",
            NodeKind::UserInteraction => "user_interaction",
            NodeKind::Custom { tag } => tag.as_str(),
        }
    }
}

/// Lifecycle of a node's most recent execution within a thread. Mirrors
/// `node_execution_states[node_id].status` in [`crate::state::WorkflowState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

/// A node in the workflow graph: a unit of execution or a structural
/// marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub kind: NodeKind,
    pub name: Option<String>,
    pub properties: FxHashMap<String, Value>,
    pub status: NodeStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub version: Version,
    /// Self-loops (`from == to`) are rejected by workflow validation unless
    /// this is set. Loop-bearing kinds (`loop_start`/`loop_end`) are
    /// loop-capable by default; any node can opt in explicitly.
    pub loop_capable: bool,
}

impl Node {
    pub fn new(node_id: NodeId, kind: NodeKind) -> Self {
        let now = Timestamp::now();
        let loop_capable = matches!(kind, NodeKind::LoopStart | NodeKind::LoopEnd);
        Self {
            node_id,
            kind,
            name: None,
            properties: FxHashMap::default(),
            status: NodeStatus::Pending,
            created_at: now,
            updated_at: now,
            version: Version::default(),
            loop_capable,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn loop_capable(mut self, yes: bool) -> Self {
        self.loop_capable = yes;
        self
    }

    /// Configure the retry policy (§7: "follows the node's retry policy")
    /// consulted by the engine's handler-failure path. Stored alongside the
    /// node's other free-form settings rather than as dedicated fields,
    /// since most nodes never fail and never need one.
    #[must_use]
    pub fn with_retry_policy(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.properties.insert("max_retries".to_string(), Value::from(max_retries));
        self.properties.insert("retry_delay_ms".to_string(), Value::from(retry_delay_ms));
        self
    }

    /// Number of retries the engine attempts after an initial handler
    /// failure before treating it as exhausted. Defaults to `0` (no
    /// retries) for nodes with no configured policy.
    pub fn max_retries(&self) -> u32 {
        self.properties
            .get("max_retries")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(0)
    }

    /// Delay the engine waits between retry attempts.
    pub fn retry_delay_ms(&self) -> u64 {
        self.properties.get("retry_delay_ms").and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn touch(&mut self) {
        self.updated_at = Timestamp::now();
        self.version = self.version.next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_end_is_loop_capable_by_default() {
        let node = Node::new(NodeId::new("l1"), NodeKind::LoopEnd);
        assert!(node.loop_capable);
    }

    #[test]
    fn llm_is_not_a_marker() {
        assert!(!NodeKind::Llm.is_marker());
        assert!(NodeKind::Fork.is_marker());
    }

    #[test]
    fn retry_policy_defaults_to_no_retries() {
        let node = Node::new(NodeId::new("n"), NodeKind::Tool);
        assert_eq!(node.max_retries(), 0);
        assert_eq!(node.retry_delay_ms(), 0);
    }

    #[test]
    fn with_retry_policy_sets_both_fields() {
        let node = Node::new(NodeId::new("n"), NodeKind::Tool).with_retry_policy(3, 50);
        assert_eq!(node.max_retries(), 3);
        assert_eq!(node.retry_delay_ms(), 50);
    }
}
