//! Capability-based node dispatch.
//!
//! [`Handler`] is the async dispatch target for a node's execution logic;
//! [`NodeExecutor`] wraps a `node_kind -> handler` table and registers
//! the built-in handlers for marker/control-flow node kinds up front.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::node::{Node, NodeKind};
use crate::state::WorkflowState;

/// The dispatch-table key: a node kind with its `Custom` payload erased,
/// since handlers are registered per *kind of work*, not per specific
/// custom tag value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeKindTag {
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
    Custom,
}

impl From<&NodeKind> for NodeKindTag {
    fn from(kind: &NodeKind) -> Self {
        match kind {
            NodeKind::Start => NodeKindTag::Start,
            NodeKind::End => NodeKindTag::End,
            NodeKind::Condition => NodeKindTag::Condition,
            NodeKind::Llm => NodeKindTag::Llm,
            NodeKind::Tool => NodeKindTag::Tool,
            NodeKind::DataTransform => NodeKindTag::DataTransform,
            NodeKind::Fork => NodeKindTag::Fork,
            NodeKind::Join => NodeKindTag::Join,
            NodeKind::Subworkflow => NodeKindTag::Subworkflow,
            NodeKind::LoopStart => NodeKindTag::LoopStart,
            NodeKind::LoopEnd => NodeKindTag::LoopEnd,
            NodeKind::Wait => NodeKindTag::Wait,
            NodeKind::UserInteraction => NodeKindTag::UserInteraction,
            NodeKind::Custom { .. } => NodeKindTag::Custom,
        }
    }
}

/// What a [`Handler`] reports back to the engine.
///
/// `variable_updates` lets a handler request writes into the execution
/// context's shared `variables` map; the engine applies them after a
/// successful dispatch, alongside recording `output` under the node's own
/// result slot. This is how fork branches make their effects visible
/// to a join: a handler never touches `ExecutionContext` directly, it just
/// queues the updates it wants and the engine folds them in.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HandlerOutput {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub metadata: Option<Value>,
    pub variable_updates: FxHashMap<String, Value>,
}

impl HandlerOutput {
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            metadata: None,
            variable_updates: FxHashMap::default(),
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variable_updates.insert(name.into(), value);
        self
    }
}

/// The async dispatch target for a non-marker node kind. Handlers for
/// `llm`/`tool`/`data_transform`/`wait`/
/// `user_interaction`/`custom` are supplied by collaborators; the engine
/// treats them as opaque, possibly non-deterministic async operations.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn can_execute(&self, _node: &Node, _state: &WorkflowState) -> bool {
        true
    }

    async fn execute(&self, node: &Node, state: &WorkflowState) -> HandlerOutput;
}

struct StartHandler;

#[async_trait]
impl Handler for StartHandler {
    async fn execute(&self, _node: &Node, _state: &WorkflowState) -> HandlerOutput {
        HandlerOutput::ok_empty()
    }
}

struct EndHandler;

#[async_trait]
impl Handler for EndHandler {
    async fn execute(&self, _node: &Node, _state: &WorkflowState) -> HandlerOutput {
        HandlerOutput::ok_empty()
    }
}

/// Marker handler for `condition`, `fork`, `join`, `subworkflow`,
/// `loop_start`, `loop_end`: these produce only metadata, since their real
/// semantics live in the router/engine.
struct MarkerHandler;

#[async_trait]
impl Handler for MarkerHandler {
    async fn execute(&self, node: &Node, _state: &WorkflowState) -> HandlerOutput {
        HandlerOutput::ok_empty().with_metadata(serde_json::json!({ "marker": node.kind.label() }))
    }
}

/// A `node_kind -> handler` dispatch table. Built-in marker kinds
/// (`start`/`end`/`condition`/`fork`/`join`/`subworkflow`/`loop_start`/
/// `loop_end`) are registered automatically; everything else must be
/// registered by the caller before the engine reaches it, or dispatch
/// fails with a `Handler`-kind error.
pub struct NodeExecutor {
    handlers: FxHashMap<NodeKindTag, Arc<dyn Handler>>,
}

impl Default for NodeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeExecutor {
    pub fn new() -> Self {
        let mut handlers: FxHashMap<NodeKindTag, Arc<dyn Handler>> = FxHashMap::default();
        handlers.insert(NodeKindTag::Start, Arc::new(StartHandler));
        handlers.insert(NodeKindTag::End, Arc::new(EndHandler));
        handlers.insert(NodeKindTag::Condition, Arc::new(MarkerHandler));
        handlers.insert(NodeKindTag::Fork, Arc::new(MarkerHandler));
        handlers.insert(NodeKindTag::Join, Arc::new(MarkerHandler));
        handlers.insert(NodeKindTag::Subworkflow, Arc::new(MarkerHandler));
        handlers.insert(NodeKindTag::LoopStart, Arc::new(MarkerHandler));
        handlers.insert(NodeKindTag::LoopEnd, Arc::new(MarkerHandler));
        Self { handlers }
    }

    /// Register (or override) the handler for a node kind. Used to supply
    /// the `llm`/`tool`/`data_transform`/`wait`/`user_interaction`/`custom`
    /// collaborators the engine itself knows nothing about.
    pub fn register(&mut self, kind: NodeKindTag, handler: Arc<dyn Handler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn has_handler(&self, kind: &NodeKind) -> bool {
        self.handlers.contains_key(&NodeKindTag::from(kind))
    }

    pub async fn dispatch(&self, node: &Node, state: &WorkflowState) -> HandlerOutput {
        let tag = NodeKindTag::from(&node.kind);
        match self.handlers.get(&tag) {
            Some(handler) => {
                if !handler.can_execute(node, state).await {
                    return HandlerOutput::fail(format!(
                        "handler declined to execute node {} (kind {})",
                        node.node_id,
                        node.kind.label()
                    ));
                }
                handler.execute(node, state).await
            }
            None => HandlerOutput::fail(format!(
                "no handler registered for node kind '{}'",
                node.kind.label()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{NodeId, ThreadId, WorkflowId};

    fn state() -> WorkflowState {
        WorkflowState::new(WorkflowId::new("wf"), ThreadId::new("t1"), FxHashMap::default())
    }

    #[tokio::test]
    async fn start_and_end_always_succeed_with_empty_output() {
        let executor = NodeExecutor::new();
        let start = Node::new(NodeId::new("s"), NodeKind::Start);
        let out = executor.dispatch(&start, &state()).await;
        assert!(out.success);
        assert!(out.output.is_none());
    }

    #[tokio::test]
    async fn unregistered_llm_handler_fails() {
        let executor = NodeExecutor::new();
        let node = Node::new(NodeId::new("l"), NodeKind::Llm);
        let out = executor.dispatch(&node, &state()).await;
        assert!(!out.success);
    }

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn execute(&self, node: &Node, _state: &WorkflowState) -> HandlerOutput {
            HandlerOutput::ok(serde_json::json!({ "echoed": node.node_id.to_string() }))
        }
    }

    #[tokio::test]
    async fn registered_handler_is_dispatched() {
        let mut executor = NodeExecutor::new();
        executor.register(NodeKindTag::Llm, Arc::new(EchoHandler));
        let node = Node::new(NodeId::new("l1"), NodeKind::Llm);
        let out = executor.dispatch(&node, &state()).await;
        assert!(out.success);
        assert_eq!(out.output.unwrap()["echoed"], "l1");
    }
}
