//! Per-thread [`WorkflowState`]: the execution context plus per-node
//! execution records and scheduling pointers.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::errors::EngineError;
use crate::ids::{NodeId, ThreadId, Timestamp, WorkflowId};
use crate::node::NodeStatus;

/// Retry policy/progress for a node's handler ("follows the node's
/// retry policy ... until exhausted").
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryInfo {
    pub attempts: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl RetryInfo {
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_retries
    }
}

/// Execution record for one node within one thread.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionState {
    pub status: Option<NodeStatus>,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub duration_ms: Option<i64>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub llm_calls: u32,
    pub tool_calls: u32,
    pub steps: u32,
    pub retry_info: RetryInfo,
}

impl NodeExecutionState {
    pub fn is_stable(&self) -> bool {
        matches!(self.status, Some(NodeStatus::Completed) | Some(NodeStatus::Skipped))
    }
}

/// The engine's per-thread view of an in-flight or completed execution
///. Produced fresh by [`crate::engine::Engine::execute`] or rehydrated
/// from a [`crate::checkpoint::Checkpoint`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: WorkflowId,
    pub thread_id: ThreadId,
    pub current_node_id: Option<NodeId>,
    pub executed_nodes: Vec<NodeId>,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    pub execution_context: ExecutionContext,
    pub node_execution_states: FxHashMap<NodeId, NodeExecutionState>,
    pub version: crate::ids::Version,
}

impl WorkflowState {
    pub fn new(workflow_id: WorkflowId, thread_id: ThreadId, initial_inputs: FxHashMap<String, Value>) -> Self {
        Self {
            workflow_id,
            thread_id,
            current_node_id: None,
            executed_nodes: Vec::new(),
            start_time: Timestamp::now(),
            end_time: None,
            execution_context: ExecutionContext::with_variables(initial_inputs),
            node_execution_states: FxHashMap::default(),
            version: crate::ids::Version::default(),
        }
    }

    /// A thread is considered "active" once it has started and has
    /// not yet terminated.
    pub fn is_active(&self) -> bool {
        self.current_node_id.is_some() && self.end_time.is_none()
    }

    pub fn node_state(&self, node_id: &NodeId) -> Option<&NodeExecutionState> {
        self.node_execution_states.get(node_id)
    }

    pub fn node_state_mut(&mut self, node_id: &NodeId) -> &mut NodeExecutionState {
        self.node_execution_states.entry(node_id.clone()).or_default()
    }

    /// Serializes to a stable, self-describing field set, using
    /// `serde_json::Value` as the encoding. Deterministic: `serde_json`'s
    /// default map type is ordered by key, so two structurally-equal
    /// states always produce byte-identical JSON.
    pub fn to_props(&self) -> Result<Value, EngineError> {
        serde_json::to_value(self)
            .map_err(|e| EngineError::internal(format!("failed to encode WorkflowState: {e}")))
    }

    pub fn from_props(value: Value) -> Result<Self, EngineError> {
        serde_json::from_value(value)
            .map_err(|e| EngineError::internal(format!("failed to decode WorkflowState: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_props_round_trips() {
        let mut inputs = FxHashMap::default();
        inputs.insert("input".to_string(), Value::from("x"));
        let state = WorkflowState::new(WorkflowId::new("wf"), ThreadId::new("t1"), inputs);
        let props = state.to_props().unwrap();
        let restored = WorkflowState::from_props(props.clone()).unwrap();
        assert_eq!(restored.to_props().unwrap(), props);
    }
}
