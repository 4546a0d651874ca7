//! Whole-thread duplication: a mirror of [`crate::fork`] that copies an
//! entire thread instead of branching at one node.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::context::{ContextSnapshot, ExecutionContext};
use crate::errors::EngineError;
use crate::ids::{CopyId, IdGenerator, NodeId, ThreadId, Timestamp};
use crate::state::WorkflowState;

/// Retention strategy for whole-thread duplication.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStrategy {
    /// Copy everything, no reset.
    Full,
    /// Copy only stable (completed/skipped) node state, reset execution
    /// progress, drop history and metadata.
    Partial,
    /// Restrict the copy to `selected_node_ids`.
    Selective,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CopyOptions {
    pub strategy: CopyStrategy,
    pub selected_node_ids: Option<Vec<NodeId>>,
}

impl CopyOptions {
    pub fn full() -> Self {
        Self {
            strategy: CopyStrategy::Full,
            selected_node_ids: None,
        }
    }

    pub fn partial() -> Self {
        Self {
            strategy: CopyStrategy::Partial,
            selected_node_ids: None,
        }
    }

    pub fn selective(node_ids: Vec<NodeId>) -> Self {
        Self {
            strategy: CopyStrategy::Selective,
            selected_node_ids: Some(node_ids),
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.strategy == CopyStrategy::Selective {
            let has_nodes = self.selected_node_ids.as_ref().is_some_and(|ids| !ids.is_empty());
            if !has_nodes {
                return Err(EngineError::validation(
                    "selective copy requires a non-empty selected_node_ids",
                ));
            }
        }
        Ok(())
    }
}

/// Record of a copy operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreadCopyResult {
    pub copy_id: CopyId,
    pub source_thread_id: ThreadId,
    /// The node ids the copy actually carried state for.
    pub scope: Vec<NodeId>,
    /// Maps each source identifier (the thread id, and each copied node
    /// context's node id) to a freshly-generated identifier for the new
    /// thread.
    pub relationship_mapping: FxHashMap<String, String>,
    pub options: CopyOptions,
    pub timestamp: Timestamp,
}

/// Duplicate `source` into a new thread, per `options`. `source` is
/// read-only; the caller's source state is never touched (same atomicity
/// guarantee as [`crate::fork::fork_thread`]).
pub fn copy_thread(
    id_gen: &IdGenerator,
    source: &WorkflowState,
    options: CopyOptions,
) -> Result<(ThreadCopyResult, WorkflowState), EngineError> {
    options.validate()?;

    let included: Vec<NodeId> = match options.strategy {
        CopyStrategy::Full => source.node_execution_states.keys().cloned().collect(),
        CopyStrategy::Partial => source
            .node_execution_states
            .iter()
            .filter(|(_, state)| state.is_stable())
            .map(|(id, _)| id.clone())
            .collect(),
        CopyStrategy::Selective => options.selected_node_ids.clone().unwrap_or_default(),
    };
    let included_set: std::collections::HashSet<&NodeId> = included.iter().collect();

    let node_execution_states = source
        .node_execution_states
        .iter()
        .filter(|(id, _)| included_set.contains(id))
        .map(|(id, state)| (id.clone(), state.clone()))
        .collect();

    let node_contexts: FxHashMap<String, _> = source
        .execution_context
        .node_contexts()
        .iter()
        .filter(|(id, _)| included_set.contains(&NodeId::new(id.as_str())))
        .map(|(id, entry)| (id.clone(), entry.clone()))
        .collect();

    let (variables, prompt_history, metadata, next_index, executed_nodes, reset_progress) = match options.strategy {
        CopyStrategy::Full => (
            source.execution_context.variables(),
            source.execution_context.prompt_history(),
            source.execution_context.metadata(),
            source.execution_context.next_index(),
            source.executed_nodes.clone(),
            false,
        ),
        CopyStrategy::Partial => (
            source.execution_context.variables(),
            Vec::new(),
            FxHashMap::default(),
            0,
            Vec::new(),
            true,
        ),
        CopyStrategy::Selective => (
            source.execution_context.variables(),
            source.execution_context.prompt_history(),
            source.execution_context.metadata(),
            source.execution_context.next_index(),
            source
                .executed_nodes
                .iter()
                .filter(|id| included_set.contains(id))
                .cloned()
                .collect(),
            false,
        ),
    };

    let node_results = if options.strategy == CopyStrategy::Partial {
        FxHashMap::default()
    } else {
        source
            .execution_context
            .node_results()
            .iter()
            .filter(|(id, _)| included_set.contains(&NodeId::new(id.as_str())))
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect()
    };

    let new_execution_context = ExecutionContext::restore(ContextSnapshot {
        variables,
        node_contexts,
        node_results,
        prompt_history,
        metadata,
        next_index,
        snapshot_at: Timestamp::now(),
    });

    let new_thread_id = id_gen.thread_id();
    let mut relationship_mapping = FxHashMap::default();
    relationship_mapping.insert(source.thread_id.to_string(), new_thread_id.to_string());
    for node_id in &included {
        relationship_mapping.insert(node_id.to_string(), id_gen.copy_id().to_string());
    }

    let new_state = WorkflowState {
        workflow_id: source.workflow_id.clone(),
        thread_id: new_thread_id,
        current_node_id: if reset_progress { None } else { source.current_node_id.clone() },
        executed_nodes,
        start_time: Timestamp::now(),
        end_time: if reset_progress { None } else { source.end_time },
        execution_context: new_execution_context,
        node_execution_states,
        version: crate::ids::Version::default(),
    };

    let result = ThreadCopyResult {
        copy_id: id_gen.copy_id(),
        source_thread_id: source.thread_id.clone(),
        scope: included,
        relationship_mapping,
        options,
        timestamp: Timestamp::now(),
    };

    Ok((result, new_state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::WorkflowId;
    use crate::node::NodeStatus;
    use crate::state::NodeExecutionState;
    use serde_json::Value;

    fn source_state() -> WorkflowState {
        let mut state = WorkflowState::new(WorkflowId::new("wf"), ThreadId::new("src"), FxHashMap::default());
        state.execution_context = state.execution_context.set_variable("x", Value::from(1));
        let mut completed = NodeExecutionState::default();
        completed.status = Some(NodeStatus::Completed);
        state.node_execution_states.insert(NodeId::new("a"), completed);
        let mut running = NodeExecutionState::default();
        running.status = Some(NodeStatus::Running);
        state.node_execution_states.insert(NodeId::new("b"), running);
        state
    }

    #[test]
    fn full_copy_retains_everything() {
        let id_gen = IdGenerator::new();
        let source = source_state();
        let (result, copy) = copy_thread(&id_gen, &source, CopyOptions::full()).unwrap();
        assert_eq!(copy.node_execution_states.len(), 2);
        assert_eq!(result.scope.len(), 2);
    }

    #[test]
    fn partial_copy_keeps_only_stable_nodes() {
        let id_gen = IdGenerator::new();
        let source = source_state();
        let (_, copy) = copy_thread(&id_gen, &source, CopyOptions::partial()).unwrap();
        assert_eq!(copy.node_execution_states.len(), 1);
        assert!(copy.node_execution_states.contains_key(&NodeId::new("a")));
    }

    #[test]
    fn selective_copy_without_node_ids_is_validation_error() {
        let id_gen = IdGenerator::new();
        let source = source_state();
        let err = copy_thread(&id_gen, &source, CopyOptions::selective(vec![])).unwrap_err();
        assert_eq!(err.kind_tag(), "Validation");
    }

    #[test]
    fn relationship_mapping_includes_thread_and_node_ids() {
        let id_gen = IdGenerator::new();
        let source = source_state();
        let (result, _) = copy_thread(&id_gen, &source, CopyOptions::full()).unwrap();
        assert!(result.relationship_mapping.contains_key("src"));
        assert!(result.relationship_mapping.contains_key("a"));
    }

    #[test]
    fn copy_does_not_mutate_source() {
        let id_gen = IdGenerator::new();
        let source = source_state();
        let before = source.to_props().unwrap();
        let _ = copy_thread(&id_gen, &source, CopyOptions::full()).unwrap();
        assert_eq!(source.to_props().unwrap(), before);
    }
}
