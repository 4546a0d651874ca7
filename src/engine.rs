//! The workflow scheduler: drives the step loop, owns the per-thread
//! manager collaborators, and implements engine-level fork/join (§4.8,
//! §4.11).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::checkpoint::CheckpointManager;
use crate::config::EngineConfig;
use crate::context::{ContextSnapshot, ExecutionContext};
use crate::edge::{Edge, EdgeKind};
use crate::errors::EngineError;
use crate::event_bus::{Event, EventBus};
use crate::executor::NodeExecutor;
use crate::expr::ExpressionEvaluator;
use crate::history::HistoryManager;
use crate::ids::{CheckpointId, IdGenerator, NodeId, ThreadId, Timestamp};
use crate::node::NodeKind;
use crate::router::ConditionalRouter;
use crate::state::{NodeExecutionState, WorkflowState};
use crate::workflow::Workflow;

/// Cooperative cancellation signal shared between a caller and an in-flight
/// `execute` call (§4.8 "Cancellation"). Checked at suspension points, never
/// polled inside a handler.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call knobs for [`Engine::execute`].
#[derive(Clone, Debug)]
pub struct ExecuteOptions {
    pub enable_checkpoints: bool,
    pub checkpoint_interval: u64,
    pub max_steps: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub resume_from: Option<CheckpointId>,
    pub allow_default_edges: bool,
    pub cancel: Option<CancelToken>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            enable_checkpoints: false,
            checkpoint_interval: 1,
            max_steps: None,
            timeout_ms: None,
            resume_from: None,
            allow_default_edges: true,
            cancel: None,
        }
    }
}

impl ExecuteOptions {
    #[must_use]
    pub fn with_checkpoints(mut self, interval: u64) -> Self {
        self.enable_checkpoints = true;
        self.checkpoint_interval = interval.max(1);
        self
    }

    #[must_use]
    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// The outcome of an `execute`/`resumeFromCheckpoint` call. Always
/// produced, even on failure — only a broken engine invariant
/// ([`EngineError::Internal`]) surfaces as an `Err` instead.
#[derive(Clone, Debug)]
pub struct ExecutionReport {
    pub success: bool,
    pub executed_nodes: Vec<NodeId>,
    pub final_state: WorkflowState,
    pub checkpoint_count: usize,
    pub error: Option<String>,
}

enum StepOutcome {
    Advance(NodeId),
    End,
    DeadEnd,
    HandlerFailed(String),
}

struct BranchResult {
    branch_id: String,
    reached_join: Option<NodeId>,
    state: WorkflowState,
    error: Option<String>,
    finished_at: Timestamp,
}

struct ForkMergeResult {
    next_node_id: NodeId,
    execution_context: ExecutionContext,
    node_execution_states: FxHashMap<NodeId, NodeExecutionState>,
    executed_nodes: Vec<NodeId>,
}

/// Ties a [`Workflow`] to the manager collaborators that make it runnable:
/// node dispatch, routing, history, checkpointing, and the ambient event
/// bus.
pub struct Engine {
    workflow: Workflow,
    executor: NodeExecutor,
    router: ConditionalRouter,
    history: HistoryManager,
    checkpoints: CheckpointManager,
    config: EngineConfig,
    event_bus: Arc<EventBus>,
    id_gen: IdGenerator,
}

impl Engine {
    pub fn new(workflow: Workflow, executor: NodeExecutor, config: EngineConfig) -> Self {
        let evaluator = ExpressionEvaluator::new(config.evaluator_cache_max_entries);
        let checkpoints = CheckpointManager::new(config.checkpoint.max_per_thread, config.checkpoint.max_total);
        let event_bus = config.build_event_bus();
        Self {
            workflow,
            executor,
            router: ConditionalRouter::new(evaluator),
            history: HistoryManager::new(),
            checkpoints,
            config,
            event_bus,
            id_gen: IdGenerator::new(),
        }
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run `workflow` for `thread_id` from a fresh [`WorkflowState`] seeded
    /// with `initial_inputs`, or from `options.resume_from` if set.
    pub async fn execute(
        &self,
        thread_id: ThreadId,
        initial_inputs: FxHashMap<String, Value>,
        options: ExecuteOptions,
    ) -> Result<ExecutionReport, EngineError> {
        let (mut state, mut current) = match &options.resume_from {
            Some(checkpoint_id) => {
                let restored = self
                    .checkpoints
                    .restore(checkpoint_id)?
                    .ok_or_else(|| EngineError::not_found_checkpoint(checkpoint_id))?;
                let current = restored.current_node_id.clone();
                (restored, current)
            }
            None => {
                let starts = self.workflow.start_nodes();
                let Some(&first) = starts.first() else {
                    return Err(EngineError::validation("workflow has no start node to begin execution at"));
                };
                let mut state = WorkflowState::new(self.workflow.workflow_id.clone(), thread_id.clone(), initial_inputs);
                state.current_node_id = Some(first.clone());
                (state, Some(first.clone()))
            }
        };

        self.run_step_loop(&thread_id, &mut state, &mut current, &options).await
    }

    /// Restore `checkpoint_id` and continue the step loop from its
    /// `current_node_id` (§4.8 "resumeFromCheckpoint"). Fails with
    /// [`EngineError::NotFound`] if the checkpoint is unknown.
    pub async fn resume_from_checkpoint(
        &self,
        thread_id: ThreadId,
        checkpoint_id: CheckpointId,
        mut options: ExecuteOptions,
    ) -> Result<ExecutionReport, EngineError> {
        options.resume_from = Some(checkpoint_id);
        self.execute(thread_id, FxHashMap::default(), options).await
    }

    async fn run_step_loop(
        &self,
        thread_id: &ThreadId,
        state: &mut WorkflowState,
        current: &mut Option<NodeId>,
        options: &ExecuteOptions,
    ) -> Result<ExecutionReport, EngineError> {
        let max_steps = options.max_steps.unwrap_or(self.config.max_steps);
        let timeout_ms = options.timeout_ms.unwrap_or(self.config.timeout_ms);
        let deadline = (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms));
        let mut steps: u64 = 0;
        let mut checkpoint_count = 0usize;

        loop {
            if let Some(cancel) = &options.cancel {
                if cancel.is_cancelled() {
                    return Ok(self.terminate(state, false, Some("Cancelled".to_string()), checkpoint_count));
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Ok(self.terminate(state, false, Some("Timeout".to_string()), checkpoint_count));
                }
            }

            let Some(node_id) = current.clone() else {
                return Ok(self.terminate(state, true, None, checkpoint_count));
            };

            if steps >= max_steps {
                let err = EngineError::BudgetExceeded {
                    executed: steps,
                    max_steps,
                };
                return Ok(self.terminate(state, false, Some(err.to_string()), checkpoint_count));
            }

            let node = self
                .workflow
                .node(&node_id)
                .ok_or_else(|| EngineError::not_found_node(&node_id))?
                .clone();

            if matches!(node.kind, NodeKind::Fork) {
                match self.execute_fork(thread_id, state, &node_id, options, deadline).await {
                    Ok(merge) => {
                        state.execution_context = merge.execution_context;
                        state.node_execution_states = merge.node_execution_states;
                        state.executed_nodes.extend(merge.executed_nodes);
                        *current = Some(merge.next_node_id);
                        state.current_node_id = current.clone();
                        steps += 1;
                        continue;
                    }
                    Err(message) => {
                        return Ok(self.terminate(state, false, Some(message), checkpoint_count));
                    }
                }
            }

            match self
                .execute_one_node(thread_id, state, &node, options.allow_default_edges)
                .await?
            {
                StepOutcome::Advance(next) => {
                    state.executed_nodes.push(node_id.clone());
                    *current = Some(next);
                    state.current_node_id = current.clone();
                }
                StepOutcome::End => {
                    state.executed_nodes.push(node_id.clone());
                    state.current_node_id = None;
                    state.end_time = Some(Timestamp::now());
                    return Ok(self.terminate(state, true, None, checkpoint_count));
                }
                StepOutcome::DeadEnd => {
                    state.executed_nodes.push(node_id.clone());
                    return Ok(self.terminate(
                        state,
                        false,
                        Some(format!("no outgoing edge satisfied from node {node_id} (not an end node)")),
                        checkpoint_count,
                    ));
                }
                StepOutcome::HandlerFailed(message) => {
                    state.executed_nodes.push(node_id.clone());
                    return Ok(self.terminate(state, false, Some(message), checkpoint_count));
                }
            }

            steps += 1;

            if options.enable_checkpoints && steps % options.checkpoint_interval == 0 {
                self.checkpoints.create(
                    &self.id_gen,
                    thread_id,
                    &self.workflow.workflow_id,
                    state.current_node_id.as_ref(),
                    state,
                    None,
                )?;
                checkpoint_count += 1;
            }
        }
    }

    fn terminate(
        &self,
        state: &WorkflowState,
        success: bool,
        error: Option<String>,
        checkpoint_count: usize,
    ) -> ExecutionReport {
        ExecutionReport {
            success,
            executed_nodes: state.executed_nodes.clone(),
            final_state: state.clone(),
            checkpoint_count,
            error,
        }
    }

    /// Execute one non-fork node: dispatch, record, and — unless it's an
    /// `end` node — route to the next node (§4.8 steps a-e).
    async fn execute_one_node(
        &self,
        thread_id: &ThreadId,
        state: &mut WorkflowState,
        node: &crate::node::Node,
        allow_default_edges: bool,
    ) -> Result<StepOutcome, EngineError> {
        let node_id = &node.node_id;
        let started = Timestamp::now();
        {
            let node_state = state.node_state_mut(node_id);
            node_state.status = Some(crate::node::NodeStatus::Running);
            node_state.start = Some(started);
            node_state.retry_info.max_retries = node.max_retries();
            node_state.retry_info.retry_delay_ms = node.retry_delay_ms();
            node_state.retry_info.attempts = 0;
        }
        self.history.record(
            &self.id_gen,
            thread_id,
            node_id,
            crate::history::HistoryStatus::Running,
            None,
            None,
            None,
        );
        let _ = self.event_bus.get_emitter().emit(Event::node_message(
            node.kind.label().to_string(),
            format!("running node {node_id}"),
        ));

        // §7: a handler failure is retried per the node's retry policy
        // before it is treated as fatal.
        let output = loop {
            let attempt = self.executor.dispatch(node, state).await;
            if attempt.success {
                break attempt;
            }
            let exhausted = state.node_state_mut(node_id).retry_info.exhausted();
            if exhausted {
                break attempt;
            }
            let (attempts, max_retries, delay_ms) = {
                let node_state = state.node_state_mut(node_id);
                node_state.retry_info.attempts += 1;
                (
                    node_state.retry_info.attempts,
                    node_state.retry_info.max_retries,
                    node_state.retry_info.retry_delay_ms,
                )
            };
            let _ = self.event_bus.get_emitter().emit(Event::node_message(
                node.kind.label().to_string(),
                format!("retrying node {node_id} (attempt {attempts} of {max_retries})"),
            ));
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        };
        let ended = Timestamp::now();
        let duration_ms = (ended.0 - started.0).num_milliseconds();

        if !output.success {
            let message = output.error.clone().unwrap_or_else(|| "handler failed".to_string());
            {
                let node_state = state.node_state_mut(node_id);
                node_state.status = Some(crate::node::NodeStatus::Failed);
                node_state.end = Some(ended);
                node_state.duration_ms = Some(duration_ms);
                node_state.error = Some(message.clone());
            }
            self.history.record(
                &self.id_gen,
                thread_id,
                node_id,
                crate::history::HistoryStatus::Failure,
                None,
                Some(message.clone()),
                output.metadata.clone(),
            );

            // §7: "unless an error-kind edge leaves the failing node, in
            // which case the engine routes along it and continues".
            let outgoing = self.workflow.outgoing_edges(node_id);
            let mut error_edges: Vec<&Edge> = outgoing.iter().filter(|e| e.kind == EdgeKind::Error).copied().collect();
            error_edges.sort_by(|a, b| {
                b.priority()
                    .partial_cmp(&a.priority())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.edge_id.cmp(&b.edge_id))
            });

            if let Some(error_edge) = error_edges.first() {
                let evaluator = self.router.evaluator();
                state.execution_context = error_edge.context_filter.apply(&state.execution_context, evaluator);
                let _ = self.event_bus.get_emitter().emit(Event::node_message(
                    node.kind.label().to_string(),
                    format!("node {node_id} failed after retries exhausted, routing along error edge {}", error_edge.edge_id),
                ));
                return Ok(StepOutcome::Advance(error_edge.to_node_id.clone()));
            }

            let rendered = EngineError::Handler {
                node_id: node_id.clone(),
                message,
            }
            .to_string();
            return Ok(StepOutcome::HandlerFailed(rendered));
        }

        state.execution_context = state
            .execution_context
            .set_node_result(node_id.as_str(), output.output.clone().unwrap_or(Value::Null));
        for (name, value) in &output.variable_updates {
            state.execution_context = state.execution_context.set_variable(name.clone(), value.clone());
        }
        {
            let node_state = state.node_state_mut(node_id);
            node_state.status = Some(crate::node::NodeStatus::Completed);
            node_state.end = Some(ended);
            node_state.duration_ms = Some(duration_ms);
            node_state.result = output.output.clone();
        }
        self.history.record(
            &self.id_gen,
            thread_id,
            node_id,
            crate::history::HistoryStatus::Success,
            output.output.clone(),
            None,
            output.metadata.clone(),
        );

        if matches!(node.kind, NodeKind::End) {
            return Ok(StepOutcome::End);
        }

        let edges = self.workflow.outgoing_edges(node_id);
        let variables = state.execution_context.variables();
        let decision = self.router.route(&self.workflow.workflow_id, &edges, &variables, allow_default_edges);

        if decision.next_node_ids.is_empty() {
            return Ok(StepOutcome::DeadEnd);
        }

        let satisfied: Vec<&Edge> = decision
            .satisfied_edges
            .iter()
            .filter_map(|edge_id| self.workflow.edge(edge_id))
            .collect();
        let evaluator = self.router.evaluator();
        let mut ctx = state.execution_context.clone();
        for edge in satisfied {
            ctx = edge.context_filter.apply(&ctx, evaluator);
        }
        state.execution_context = ctx;

        Ok(StepOutcome::Advance(decision.next_node_ids[0].clone()))
    }

    /// Engine-level fork/join: fan out one subtask per outgoing
    /// "branch" edge, run each independently against a shallow copy of
    /// `state`, and barrier at the first `join` node each reaches.
    async fn execute_fork(
        &self,
        thread_id: &ThreadId,
        state: &WorkflowState,
        fork_node_id: &NodeId,
        options: &ExecuteOptions,
        deadline: Option<Instant>,
    ) -> Result<ForkMergeResult, String> {
        let edges = self.workflow.outgoing_edges(fork_node_id);
        if edges.is_empty() {
            return Err(format!("fork node {fork_node_id} has no branches"));
        }

        let max_steps = options.max_steps.unwrap_or(self.config.max_steps);
        let branches = edges.iter().map(|edge| {
            self.run_branch(
                thread_id,
                edge.edge_id.to_string(),
                edge.to_node_id.clone(),
                state.clone(),
                max_steps,
            )
        });

        let results = if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, join_all(branches)).await {
                Ok(results) => results,
                Err(_) => return Err("Timeout: one or more fork branches never reached a join".to_string()),
            }
        } else {
            join_all(branches).await
        };

        let mut orphaned = Vec::new();
        for result in &results {
            if result.reached_join.is_none() {
                let detail = result.error.clone().unwrap_or_else(|| "no join reached".to_string());
                orphaned.push(format!("{} ({detail})", result.branch_id));
            }
        }
        if !orphaned.is_empty() {
            return Err(format!("orphan fork branch(es) never reached a join: {}", orphaned.join(", ")));
        }

        let mut sorted = results;
        sorted.sort_by(|a, b| a.finished_at.cmp(&b.finished_at).then_with(|| a.branch_id.cmp(&b.branch_id)));

        let join_node_id = sorted
            .last()
            .and_then(|r| r.reached_join.clone())
            .expect("checked above: all branches reached a join");

        let mut merged_vars = state.execution_context.variables();
        let mut merged_node_results = state.execution_context.node_results();
        let mut merged_node_contexts = state.execution_context.node_contexts();
        let mut merged_node_states = state.node_execution_states.clone();
        let mut executed_nodes = Vec::new();
        let mut last_prompt_history = state.execution_context.prompt_history();
        let mut last_metadata = state.execution_context.metadata();
        let mut last_next_index = state.execution_context.next_index();

        for branch in &sorted {
            merged_vars.extend(branch.state.execution_context.variables());
            merged_node_results.extend(branch.state.execution_context.node_results());
            merged_node_contexts.extend(branch.state.execution_context.node_contexts());
            merged_node_states.extend(branch.state.node_execution_states.clone());
            executed_nodes.extend(branch.state.executed_nodes.clone());
            last_prompt_history = branch.state.execution_context.prompt_history();
            last_metadata = branch.state.execution_context.metadata();
            last_next_index = branch.state.execution_context.next_index();
        }

        let execution_context = ExecutionContext::restore(ContextSnapshot {
            variables: merged_vars,
            node_contexts: merged_node_contexts,
            node_results: merged_node_results,
            prompt_history: last_prompt_history,
            metadata: last_metadata,
            next_index: last_next_index,
            snapshot_at: Timestamp::now(),
        });

        Ok(ForkMergeResult {
            next_node_id: join_node_id,
            execution_context,
            node_execution_states: merged_node_states,
            executed_nodes,
        })
    }

    /// Run one fork branch until it reaches a `join` node (success), an
    /// `end` node or dead end (orphan), or exhausts `max_steps` (orphan).
    async fn run_branch(
        &self,
        thread_id: &ThreadId,
        branch_id: String,
        start: NodeId,
        mut branch_state: WorkflowState,
        max_steps: u64,
    ) -> BranchResult {
        let mut current = start;
        let mut steps = 0u64;
        loop {
            if steps >= max_steps {
                return BranchResult {
                    branch_id,
                    reached_join: None,
                    state: branch_state,
                    error: Some("branch exceeded its step budget".to_string()),
                    finished_at: Timestamp::now(),
                };
            }
            let Some(node) = self.workflow.node(&current).cloned() else {
                return BranchResult {
                    branch_id,
                    reached_join: None,
                    state: branch_state,
                    error: Some(format!("branch references unknown node {current}")),
                    finished_at: Timestamp::now(),
                };
            };
            if matches!(node.kind, NodeKind::Join) {
                return BranchResult {
                    branch_id,
                    reached_join: Some(current),
                    state: branch_state,
                    error: None,
                    finished_at: Timestamp::now(),
                };
            }

            match self.execute_one_node(thread_id, &mut branch_state, &node, true).await {
                Ok(StepOutcome::Advance(next)) => {
                    branch_state.executed_nodes.push(current.clone());
                    current = next;
                }
                Ok(StepOutcome::End) | Ok(StepOutcome::DeadEnd) => {
                    branch_state.executed_nodes.push(current.clone());
                    return BranchResult {
                        branch_id,
                        reached_join: None,
                        state: branch_state,
                        error: Some(format!("branch reached {current} without rejoining")),
                        finished_at: Timestamp::now(),
                    };
                }
                Ok(StepOutcome::HandlerFailed(message)) => {
                    branch_state.executed_nodes.push(current.clone());
                    return BranchResult {
                        branch_id,
                        reached_join: None,
                        state: branch_state,
                        error: Some(message),
                        finished_at: Timestamp::now(),
                    };
                }
                Err(err) => {
                    return BranchResult {
                        branch_id,
                        reached_join: None,
                        state: branch_state,
                        error: Some(err.to_string()),
                        finished_at: Timestamp::now(),
                    };
                }
            }
            steps += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeKind;
    use crate::ids::{EdgeId, WorkflowId};
    use crate::node::Node;

    fn linear_workflow() -> Workflow {
        Workflow::new(WorkflowId::new("wf"), "linear")
            .with_node(Node::new(NodeId::new("start"), NodeKind::Start))
            .with_node(Node::new(NodeId::new("end"), NodeKind::End))
            .with_edge(Edge::new(EdgeId::new("e1"), EdgeKind::Sequence, NodeId::new("start"), NodeId::new("end")))
    }

    #[tokio::test]
    async fn linear_workflow_completes() {
        let engine = Engine::new(linear_workflow(), NodeExecutor::new(), EngineConfig::new());
        let report = engine
            .execute(ThreadId::new("t1"), FxHashMap::default(), ExecuteOptions::default())
            .await
            .unwrap();
        assert!(report.success);
        assert_eq!(report.executed_nodes, vec![NodeId::new("start"), NodeId::new("end")]);
    }

    #[tokio::test]
    async fn budget_cap_terminates_unsuccessfully() {
        let workflow = Workflow::new(WorkflowId::new("wf"), "loop")
            .with_node(Node::new(NodeId::new("a"), NodeKind::Start).loop_capable(true))
            .with_node(Node::new(NodeId::new("b"), NodeKind::End))
            .with_edge(Edge::new(EdgeId::new("e1"), EdgeKind::Sequence, NodeId::new("a"), NodeId::new("a")));
        let engine = Engine::new(workflow, NodeExecutor::new(), EngineConfig::new());
        let report = engine
            .execute(
                ThreadId::new("t1"),
                FxHashMap::default(),
                ExecuteOptions::default().with_max_steps(3),
            )
            .await
            .unwrap();
        assert!(!report.success);
        assert!(report.error.unwrap().contains("budget"));
    }

    #[tokio::test]
    async fn fork_join_merges_branch_variables() {
        let workflow = Workflow::new(WorkflowId::new("wf"), "forkjoin")
            .with_node(Node::new(NodeId::new("start"), NodeKind::Start))
            .with_node(Node::new(NodeId::new("fork"), NodeKind::Fork))
            .with_node(Node::new(NodeId::new("a"), NodeKind::DataTransform))
            .with_node(Node::new(NodeId::new("b"), NodeKind::DataTransform))
            .with_node(Node::new(NodeId::new("join"), NodeKind::Join))
            .with_node(Node::new(NodeId::new("end"), NodeKind::End))
            .with_edge(Edge::new(EdgeId::new("e0"), EdgeKind::Sequence, NodeId::new("start"), NodeId::new("fork")))
            .with_edge(Edge::new(EdgeId::new("e1"), EdgeKind::Sequence, NodeId::new("fork"), NodeId::new("a")))
            .with_edge(Edge::new(EdgeId::new("e2"), EdgeKind::Sequence, NodeId::new("fork"), NodeId::new("b")))
            .with_edge(Edge::new(EdgeId::new("e3"), EdgeKind::Sequence, NodeId::new("a"), NodeId::new("join")))
            .with_edge(Edge::new(EdgeId::new("e4"), EdgeKind::Sequence, NodeId::new("b"), NodeId::new("join")))
            .with_edge(Edge::new(EdgeId::new("e5"), EdgeKind::Sequence, NodeId::new("join"), NodeId::new("end")));

        let mut executor = NodeExecutor::new();
        executor.register(
            crate::executor::NodeKindTag::DataTransform,
            Arc::new(VariableSetter),
        );

        let engine = Engine::new(workflow, executor, EngineConfig::new());
        let report = engine
            .execute(ThreadId::new("t1"), FxHashMap::default(), ExecuteOptions::default())
            .await
            .unwrap();
        assert!(report.success);
        let vars = report.final_state.execution_context.variables();
        assert_eq!(vars.get("a"), Some(&Value::from(1)));
        assert_eq!(vars.get("b"), Some(&Value::from(2)));
    }

    struct VariableSetter;

    #[async_trait::async_trait]
    impl crate::executor::Handler for VariableSetter {
        async fn execute(
            &self,
            node: &crate::node::Node,
            _state: &WorkflowState,
        ) -> crate::executor::HandlerOutput {
            let value = match node.node_id.as_str() {
                "a" => 1,
                "b" => 2,
                _ => 0,
            };
            crate::executor::HandlerOutput::ok(serde_json::json!({ "node": node.node_id.to_string() }))
                .with_variable(node.node_id.to_string(), Value::from(value))
        }
    }
}
