//! Thread fork: derive a new thread from a parent at a node, selectively
//! retaining state.
//!
//! A pure, non-persisting projection function over [`WorkflowState`] plus a
//! retention-strategy enum: no node kind here has a fork/copy concept of its
//! own, so this is built in the style of the engine's other COW projections
//! (plain functions returning owned, deep-cloned structures, no interior
//! mutability).

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{ContextSnapshot, ExecutionContext, PromptEntry};
use crate::errors::EngineError;
use crate::ids::{ForkId, IdGenerator, NodeId, ThreadId, Timestamp};
use crate::state::{NodeExecutionState, WorkflowState};

/// How much of the parent's state a forked thread retains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkStrategy {
    Full,
    Partial,
    Minimal,
}

impl ForkStrategy {
    fn retain_variables(self) -> bool {
        !matches!(self, ForkStrategy::Minimal)
    }

    fn retain_prompt_context(self) -> bool {
        !matches!(self, ForkStrategy::Minimal)
    }

    fn retain_history(self) -> bool {
        !matches!(self, ForkStrategy::Minimal)
    }

    fn retain_metadata(self) -> bool {
        matches!(self, ForkStrategy::Full)
    }
}

/// How the fork-point node's per-node execution records carry over
///, independent of the overall [`ForkStrategy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStateHandling {
    Copy,
    Inherit,
    Reset,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForkOptions {
    pub strategy: ForkStrategy,
    pub node_state_handling: NodeStateHandling,
    pub metadata: Option<Value>,
}

impl ForkOptions {
    pub fn new(strategy: ForkStrategy, node_state_handling: NodeStateHandling) -> Self {
        Self {
            strategy,
            node_state_handling,
            metadata: None,
        }
    }
}

/// Record of a fork operation, carrying the snapshots it projected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForkContext {
    pub fork_id: ForkId,
    pub parent_thread_id: ThreadId,
    pub fork_point_node_id: NodeId,
    pub variable_snapshot: FxHashMap<String, Value>,
    pub node_state_snapshot: FxHashMap<NodeId, NodeExecutionState>,
    pub prompt_context_snapshot: Vec<PromptEntry>,
    pub options: ForkOptions,
    pub timestamp: Timestamp,
}

/// Project a new thread from `parent` at `fork_point`, per `options`.
/// Returns the [`ForkContext`] describing the operation alongside
/// the forked thread's initial [`WorkflowState`]. `parent` is read-only:
/// the caller's parent state is never touched, so a failed or abandoned
/// fork can never corrupt the thread it branched from.
pub fn fork_thread(
    id_gen: &IdGenerator,
    parent: &WorkflowState,
    fork_point: &NodeId,
    options: ForkOptions,
) -> Result<(ForkContext, WorkflowState), EngineError> {
    if !parent.is_active() {
        return Err(EngineError::conflict(format!(
            "cannot fork thread {}: thread is not active",
            parent.thread_id
        )));
    }

    let fork_point_state = parent
        .node_state(fork_point)
        .ok_or_else(|| EngineError::not_found_node(fork_point))?;

    if matches!(fork_point_state.status, Some(crate::node::NodeStatus::Pending) | None) {
        tracing::warn!(
            thread_id = %parent.thread_id,
            node_id = %fork_point,
            "forking at a node with no completed execution record yet"
        );
    }

    let strategy = options.strategy;
    let variables = if strategy.retain_variables() {
        parent.execution_context.variables()
    } else {
        FxHashMap::default()
    };
    let metadata = if strategy.retain_metadata() {
        parent.execution_context.metadata()
    } else {
        FxHashMap::default()
    };
    let (prompt_history, next_index) = if strategy.retain_prompt_context() {
        (
            parent.execution_context.prompt_history(),
            parent.execution_context.next_index(),
        )
    } else {
        (Vec::new(), 0)
    };

    let (node_contexts, node_results) = if options.node_state_handling == NodeStateHandling::Reset {
        (FxHashMap::default(), FxHashMap::default())
    } else {
        (
            parent.execution_context.node_contexts(),
            parent.execution_context.node_results(),
        )
    };

    let new_execution_context = ExecutionContext::restore(ContextSnapshot {
        variables: variables.clone(),
        node_contexts,
        node_results,
        prompt_history: prompt_history.clone(),
        metadata,
        next_index,
        snapshot_at: Timestamp::now(),
    });

    let node_execution_states: FxHashMap<NodeId, NodeExecutionState> = match options.node_state_handling {
        NodeStateHandling::Copy => parent.node_execution_states.clone(),
        NodeStateHandling::Inherit => parent
            .node_execution_states
            .iter()
            .filter(|(_, state)| state.is_stable())
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect(),
        NodeStateHandling::Reset => FxHashMap::default(),
    };

    let executed_nodes = if strategy.retain_history() {
        parent.executed_nodes.clone()
    } else {
        Vec::new()
    };

    let forked_thread_id = id_gen.thread_id();
    let forked_state = WorkflowState {
        workflow_id: parent.workflow_id.clone(),
        thread_id: forked_thread_id,
        current_node_id: Some(fork_point.clone()),
        executed_nodes,
        start_time: Timestamp::now(),
        end_time: None,
        execution_context: new_execution_context,
        node_execution_states,
        version: crate::ids::Version::default(),
    };

    let fork_context = ForkContext {
        fork_id: id_gen.fork_id(),
        parent_thread_id: parent.thread_id.clone(),
        fork_point_node_id: fork_point.clone(),
        variable_snapshot: variables,
        node_state_snapshot: forked_state.node_execution_states.clone(),
        prompt_context_snapshot: prompt_history,
        options,
        timestamp: Timestamp::now(),
    };

    Ok((fork_context, forked_state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::WorkflowId;
    use crate::node::NodeStatus;

    fn active_parent() -> WorkflowState {
        let mut state = WorkflowState::new(WorkflowId::new("wf"), ThreadId::new("parent"), FxHashMap::default());
        state.current_node_id = Some(NodeId::new("n1"));
        state.execution_context = state.execution_context.set_variable("x", Value::from(1));
        let mut node_state = NodeExecutionState::default();
        node_state.status = Some(NodeStatus::Completed);
        state.node_execution_states.insert(NodeId::new("n1"), node_state);
        state
    }

    #[test]
    fn full_strategy_retains_variables() {
        let id_gen = IdGenerator::new();
        let parent = active_parent();
        let (_, forked) = fork_thread(
            &id_gen,
            &parent,
            &NodeId::new("n1"),
            ForkOptions::new(ForkStrategy::Full, NodeStateHandling::Copy),
        )
        .unwrap();
        assert_eq!(forked.execution_context.get_variable("x"), Some(&Value::from(1)));
    }

    #[test]
    fn minimal_strategy_drops_variables() {
        let id_gen = IdGenerator::new();
        let parent = active_parent();
        let (_, forked) = fork_thread(
            &id_gen,
            &parent,
            &NodeId::new("n1"),
            ForkOptions::new(ForkStrategy::Minimal, NodeStateHandling::Reset),
        )
        .unwrap();
        assert!(forked.execution_context.get_variable("x").is_none());
        assert!(forked.node_execution_states.is_empty());
    }

    #[test]
    fn fork_does_not_mutate_parent() {
        let id_gen = IdGenerator::new();
        let parent = active_parent();
        let before = parent.to_props().unwrap();
        let _ = fork_thread(
            &id_gen,
            &parent,
            &NodeId::new("n1"),
            ForkOptions::new(ForkStrategy::Partial, NodeStateHandling::Inherit),
        )
        .unwrap();
        assert_eq!(parent.to_props().unwrap(), before);
    }

    #[test]
    fn forking_inactive_thread_is_conflict() {
        let id_gen = IdGenerator::new();
        let mut parent = active_parent();
        parent.end_time = Some(Timestamp::now());
        let err = fork_thread(
            &id_gen,
            &parent,
            &NodeId::new("n1"),
            ForkOptions::new(ForkStrategy::Full, NodeStateHandling::Copy),
        )
        .unwrap_err();
        assert_eq!(err.kind_tag(), "Conflict");
    }
}
