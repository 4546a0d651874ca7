//! # threadgraph: a durable, stateful workflow execution engine
//!
//! `threadgraph` runs directed graphs of typed nodes and edges against a
//! per-thread, copy-on-write execution context, with checkpointing, thread
//! fork/copy, and deterministic conditional routing. It is built for
//! LLM-oriented agent pipelines: nodes can call out to language models or
//! tools, a restricted expression dialect gates conditional edges, and every
//! mutation to a thread's state produces a new, immutable snapshot rather
//! than mutating in place.
//!
//! ## Core concepts
//!
//! - **Workflow**: an arena of [`node::Node`]s and [`edge::Edge`]s (`graph`
//!   structure, validated once, run many times).
//! - **Engine**: drives the step loop over a [`workflow::Workflow`],
//!   dispatching each node to a [`executor::Handler`], routing via
//!   [`router::ConditionalRouter`], checkpointing via
//!   [`checkpoint::CheckpointManager`].
//! - **ExecutionContext**: the copy-on-write state a thread carries between
//!   steps — variables, prompt history, per-node results — where every
//!   mutator returns a new value instead of mutating `&mut self` in place.
//! - **Fork / copy**: [`fork::fork_thread`] and [`thread_copy::copy_thread`]
//!   project a new thread from an existing one under a retention strategy,
//!   without touching the source thread.
//!
//! ## Quick start
//!
//! ```
//! use rustc_hash::FxHashMap;
//! use threadgraph::config::EngineConfig;
//! use threadgraph::edge::{Edge, EdgeKind};
//! use threadgraph::engine::{Engine, ExecuteOptions};
//! use threadgraph::executor::NodeExecutor;
//! use threadgraph::ids::{EdgeId, NodeId, ThreadId, WorkflowId};
//! use threadgraph::node::{Node, NodeKind};
//! use threadgraph::workflow::Workflow;
//!
//! # async fn run() -> Result<(), threadgraph::errors::EngineError> {
//! let workflow = Workflow::new(WorkflowId::new("wf"), "greeting")
//!     .with_node(Node::new(NodeId::new("start"), NodeKind::Start))
//!     .with_node(Node::new(NodeId::new("end"), NodeKind::End))
//!     .with_edge(Edge::new(
//!         EdgeId::new("e1"),
//!         EdgeKind::Sequence,
//!         NodeId::new("start"),
//!         NodeId::new("end"),
//!     ));
//!
//! let engine = Engine::new(workflow, NodeExecutor::new(), EngineConfig::new());
//! let report = engine
//!     .execute(ThreadId::new("t1"), FxHashMap::default(), ExecuteOptions::default())
//!     .await?;
//! assert!(report.success);
//! # Ok(())
//! # }
//! ```
//!
//! ### Handlers write back via `HandlerOutput`
//!
//! A node kind the engine doesn't already know how to run (`llm`, `tool`,
//! `data_transform`, `wait`, `user_interaction`, `custom`) is dispatched to a
//! collaborator-supplied [`executor::Handler`]. A handler never mutates the
//! execution context directly; it returns a [`executor::HandlerOutput`] and
//! the engine folds the requested variable updates and node result in:
//!
//! ```
//! use async_trait::async_trait;
//! use threadgraph::executor::{Handler, HandlerOutput};
//! use threadgraph::node::Node;
//! use threadgraph::state::WorkflowState;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Handler for Echo {
//!     async fn execute(&self, node: &Node, _state: &WorkflowState) -> HandlerOutput {
//!         HandlerOutput::ok(serde_json::json!({ "ran": node.node_id.to_string() }))
//!             .with_variable("last_node", serde_json::Value::from(node.node_id.to_string()))
//!     }
//! }
//! ```
//!
//! ### Conditional routing
//!
//! Edges carry an optional boolean expression in the restricted dialect
//! described in [`expr`]; [`router::ConditionalRouter`] evaluates them
//! against the thread's `variables` and picks the highest-priority satisfied
//! edge, falling back to a `default` edge when one exists.
//!
//! ## Module guide
//!
//! - [`ids`] — opaque, sortable identifiers and the thread-safe id generator
//! - [`node`] / [`edge`] / [`workflow`] — the graph data model
//! - [`context`] / [`context_filter`] — the copy-on-write execution context
//!   and its per-edge filtering rules
//! - [`expr`] — the restricted expression parser, evaluator, and cache
//! - [`router`] — deterministic conditional edge routing
//! - [`executor`] — capability-based node dispatch
//! - [`history`] — append-only per-thread execution history
//! - [`checkpoint`] — bounded, cascading-eviction state snapshots
//! - [`engine`] — the step loop, fork/join barrier, cancellation
//! - [`fork`] / [`thread_copy`] — thread fork and whole-thread copy
//! - [`state`] — the per-thread [`state::WorkflowState`] aggregate
//! - [`errors`] — the engine's exhaustive error taxonomy
//! - [`config`] — engine configuration and environment overlay
//! - [`event_bus`] / [`telemetry`] — ambient observability: a broadcast-based
//!   event bus with pluggable sinks, and plain-text rendering for them

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod context_filter;
pub mod edge;
pub mod engine;
pub mod errors;
pub mod event_bus;
pub mod executor;
pub mod expr;
pub mod fork;
pub mod history;
pub mod ids;
pub mod node;
pub mod router;
pub mod state;
pub mod telemetry;
pub mod thread_copy;
pub mod workflow;
