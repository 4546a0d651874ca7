//! Black-box engine scenarios, one per seed test case in the specification's
//! testable-properties section: a linear run, a conditional branch, a
//! checkpoint cadence, a step budget cap, fork/join convergence, and
//! resume-from-checkpoint.

mod common;

use rustc_hash::FxHashMap;
use serde_json::Value;
use threadgraph::config::EngineConfig;
use threadgraph::edge::{Edge, EdgeKind};
use threadgraph::engine::{Engine, ExecuteOptions};
use threadgraph::executor::{Handler, HandlerOutput, NodeExecutor, NodeKindTag};
use threadgraph::ids::{EdgeId, NodeId, ThreadId, WorkflowId};
use threadgraph::node::{Node, NodeKind};
use threadgraph::state::WorkflowState;
use threadgraph::workflow::Workflow;

#[tokio::test]
async fn linear_two_node_workflow_completes() {
    let engine = Engine::new(common::linear_workflow(), NodeExecutor::new(), EngineConfig::new());
    let report = engine
        .execute(ThreadId::new("t1"), common::empty_inputs(), ExecuteOptions::default())
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.executed_nodes, vec![NodeId::new("start"), NodeId::new("end")]);
    assert!(report.final_state.current_node_id.is_none() || report.final_state.current_node_id == Some(NodeId::new("end")));
}

#[tokio::test]
async fn conditional_branch_follows_the_satisfied_edge() {
    let engine = Engine::new(common::branching_workflow(), NodeExecutor::new(), EngineConfig::new());

    let mut high_inputs = FxHashMap::default();
    high_inputs.insert("score".to_string(), Value::from(75));
    let report = engine
        .execute(ThreadId::new("high"), high_inputs, ExecuteOptions::default())
        .await
        .unwrap();
    assert!(report.success);
    assert!(report.executed_nodes.contains(&NodeId::new("high")));
    assert!(!report.executed_nodes.contains(&NodeId::new("low")));

    let mut low_inputs = FxHashMap::default();
    low_inputs.insert("score".to_string(), Value::from(10));
    let report = engine
        .execute(ThreadId::new("low"), low_inputs, ExecuteOptions::default())
        .await
        .unwrap();
    assert!(report.success);
    assert!(report.executed_nodes.contains(&NodeId::new("low")));
    assert!(!report.executed_nodes.contains(&NodeId::new("high")));
}

#[tokio::test]
async fn checkpoint_cadence_creates_one_checkpoint_per_interval() {
    let workflow = Workflow::new(WorkflowId::new("wf-chain"), "chain")
        .with_node(Node::new(NodeId::new("start"), NodeKind::Start))
        .with_node(Node::new(NodeId::new("mid"), NodeKind::DataTransform))
        .with_node(Node::new(NodeId::new("end"), NodeKind::End))
        .with_edge(Edge::new(EdgeId::new("e0"), EdgeKind::Sequence, NodeId::new("start"), NodeId::new("mid")))
        .with_edge(Edge::new(EdgeId::new("e1"), EdgeKind::Sequence, NodeId::new("mid"), NodeId::new("end")));

    let mut executor = NodeExecutor::new();
    executor.register(NodeKindTag::DataTransform, std::sync::Arc::new(NoopHandler));

    let engine = Engine::new(workflow, executor, EngineConfig::new());
    let report = engine
        .execute(
            ThreadId::new("t1"),
            common::empty_inputs(),
            ExecuteOptions::default().with_checkpoints(1),
        )
        .await
        .unwrap();

    assert!(report.success);
    assert!(report.checkpoint_count >= 1);
    assert_eq!(engine.checkpoints().checkpoints_for(&ThreadId::new("t1")), report.checkpoint_count);
}

#[tokio::test]
async fn step_budget_cap_terminates_without_success() {
    let workflow = Workflow::new(WorkflowId::new("wf-loop"), "loop")
        .with_node(Node::new(NodeId::new("a"), NodeKind::Start).loop_capable(true))
        .with_node(Node::new(NodeId::new("b"), NodeKind::End))
        .with_edge(Edge::new(EdgeId::new("e1"), EdgeKind::Sequence, NodeId::new("a"), NodeId::new("a")));

    let engine = Engine::new(workflow, NodeExecutor::new(), EngineConfig::new());
    let report = engine
        .execute(
            ThreadId::new("t1"),
            common::empty_inputs(),
            ExecuteOptions::default().with_max_steps(5),
        )
        .await
        .unwrap();

    assert!(!report.success);
    assert!(report.error.unwrap().to_lowercase().contains("budget"));
}

#[tokio::test]
async fn fork_join_converges_both_branches() {
    let workflow = Workflow::new(WorkflowId::new("wf-fj"), "forkjoin")
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
    executor.register(NodeKindTag::DataTransform, std::sync::Arc::new(BranchSetter));

    let engine = Engine::new(workflow, executor, EngineConfig::new());
    let report = engine
        .execute(ThreadId::new("t1"), common::empty_inputs(), ExecuteOptions::default())
        .await
        .unwrap();

    assert!(report.success);
    let vars = report.final_state.execution_context.variables();
    assert_eq!(vars.get("a"), Some(&Value::from(1)));
    assert_eq!(vars.get("b"), Some(&Value::from(2)));
    assert!(report.executed_nodes.contains(&NodeId::new("join")));
}

#[tokio::test]
async fn resume_from_checkpoint_continues_the_interrupted_thread() {
    let workflow = Workflow::new(WorkflowId::new("wf-resume"), "resume")
        .with_node(Node::new(NodeId::new("start"), NodeKind::Start))
        .with_node(Node::new(NodeId::new("mid"), NodeKind::DataTransform))
        .with_node(Node::new(NodeId::new("end"), NodeKind::End))
        .with_edge(Edge::new(EdgeId::new("e0"), EdgeKind::Sequence, NodeId::new("start"), NodeId::new("mid")))
        .with_edge(Edge::new(EdgeId::new("e1"), EdgeKind::Sequence, NodeId::new("mid"), NodeId::new("end")));

    let mut executor = NodeExecutor::new();
    executor.register(NodeKindTag::DataTransform, std::sync::Arc::new(NoopHandler));

    let engine = Engine::new(workflow, executor, EngineConfig::new());
    let thread_id = ThreadId::new("t1");

    // Run just far enough to produce a checkpoint after `start`, then stop.
    let report = engine
        .execute(
            thread_id.clone(),
            common::empty_inputs(),
            ExecuteOptions::default().with_checkpoints(1).with_max_steps(1),
        )
        .await
        .unwrap();
    assert!(!report.success);
    assert!(report.checkpoint_count >= 1);

    let checkpoint_id = engine
        .checkpoints()
        .get_latest_checkpoint(&thread_id)
        .expect("a checkpoint was created")
        .checkpoint_id;

    let resumed = engine
        .resume_from_checkpoint(thread_id, checkpoint_id, ExecuteOptions::default())
        .await
        .unwrap();
    assert!(resumed.success);
    assert!(resumed.executed_nodes.contains(&NodeId::new("end")));
}

struct NoopHandler;

#[async_trait::async_trait]
impl Handler for NoopHandler {
    async fn execute(&self, _node: &Node, _state: &WorkflowState) -> HandlerOutput {
        HandlerOutput::ok_empty()
    }
}

struct BranchSetter;

#[async_trait::async_trait]
impl Handler for BranchSetter {
    async fn execute(&self, node: &Node, _state: &WorkflowState) -> HandlerOutput {
        let value = if node.node_id.as_str() == "a" { 1 } else { 2 };
        HandlerOutput::ok_empty().with_variable(node.node_id.to_string(), Value::from(value))
    }
}
