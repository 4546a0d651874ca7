//! The thread-scoped execution context: an immutable, copy-on-write bag of
//! variables, node outputs, prompt history, and metadata.
//!
//! Every mutator returns a new [`ExecutionContext`] rather than mutating in
//! place: a write always produces a new value instead of exposing `&mut`
//! on shared containers.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EngineError;
use crate::ids::Timestamp;

/// The role of a [`PromptEntry`]. `Output` is transient: it exists only
/// until [`ExecutionContext::convert_output_to_input`] rewrites it to
/// `Assistant`, at which point no entry should carry it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    System,
    User,
    Assistant,
    Tool,
    Output,
}

impl PromptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptRole::System => "system",
            PromptRole::User => "user",
            PromptRole::Assistant => "assistant",
            PromptRole::Tool => "tool",
            PromptRole::Output => "output",
        }
    }
}

/// One entry in the dense, zero-indexed prompt history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptEntry {
    pub index: usize,
    pub role: PromptRole,
    pub content: String,
    pub tool_calls: Option<Value>,
    pub tool_call_id: Option<String>,
    pub metadata: Option<Value>,
}

impl PromptEntry {
    /// Matched against `history` filter-rule patterns, which treat
    /// the role as the entry's matchable "key".
    pub fn role_str(&self) -> String {
        self.role.as_str().to_string()
    }
}

/// Per-node scratch space: local variables, free-form metadata, and the
/// last time a node touched this entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeContextEntry {
    pub local_variables: FxHashMap<String, Value>,
    pub metadata: FxHashMap<String, Value>,
    pub last_accessed_at: Option<Timestamp>,
}

/// A deep-cloned, inert view of an [`ExecutionContext`] at a point in time:
/// safe to hand to a node handler or encode into a checkpoint without
/// worrying about subsequent mutation of the live context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub variables: FxHashMap<String, Value>,
    pub node_contexts: FxHashMap<String, NodeContextEntry>,
    pub node_results: FxHashMap<String, Value>,
    pub prompt_history: Vec<PromptEntry>,
    pub metadata: FxHashMap<String, Value>,
    pub next_index: usize,
    pub snapshot_at: Timestamp,
}

/// Immutable bag of `{variables, node_contexts, node_results, prompt_history,
/// metadata}` associated with one thread.
///
/// All mutators consume `&self` and return a new `ExecutionContext`; none
/// exposes `&mut` access to the internal maps. Container accessors
/// (`variables()`, `prompt_history()`, ...) return references into the
/// current value, never into a future one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    variables: FxHashMap<String, Value>,
    node_contexts: FxHashMap<String, NodeContextEntry>,
    node_results: FxHashMap<String, Value>,
    prompt_history: Vec<PromptEntry>,
    metadata: FxHashMap<String, Value>,
    next_index: usize,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            variables: FxHashMap::default(),
            node_contexts: FxHashMap::default(),
            node_results: FxHashMap::default(),
            prompt_history: Vec::new(),
            metadata: FxHashMap::default(),
            next_index: 0,
        }
    }

    pub fn with_variables(variables: FxHashMap<String, Value>) -> Self {
        Self {
            variables,
            ..Self::new()
        }
    }

    /// A defensive copy of the full variable map (§4.3: "container
    /// accessors return defensive copies"). Prefer [`Self::get_variable`]
    /// for single-key reads.
    pub fn variables(&self) -> FxHashMap<String, Value> {
        self.variables.clone()
    }

    /// A defensive copy of the per-node context map.
    pub fn node_contexts(&self) -> FxHashMap<String, NodeContextEntry> {
        self.node_contexts.clone()
    }

    /// A defensive copy of the per-node result map.
    pub fn node_results(&self) -> FxHashMap<String, Value> {
        self.node_results.clone()
    }

    /// A defensive copy of the dense, zero-indexed prompt history.
    pub fn prompt_history(&self) -> Vec<PromptEntry> {
        self.prompt_history.clone()
    }

    /// A defensive copy of the metadata map.
    pub fn metadata(&self) -> FxHashMap<String, Value> {
        self.metadata.clone()
    }

    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    #[must_use]
    pub fn set_variable(&self, name: impl Into<String>, value: Value) -> Self {
        let mut next = self.clone();
        next.variables.insert(name.into(), value);
        next
    }

    pub fn get_node_result(&self, node_id: &str) -> Option<&Value> {
        self.node_results.get(node_id)
    }

    #[must_use]
    pub fn set_node_result(&self, node_id: impl Into<String>, value: Value) -> Self {
        let mut next = self.clone();
        next.node_results.insert(node_id.into(), value);
        next
    }

    pub fn get_node_context(&self, node_id: &str) -> Option<&NodeContextEntry> {
        self.node_contexts.get(node_id)
    }

    #[must_use]
    pub fn set_node_context(&self, node_id: impl Into<String>, entry: NodeContextEntry) -> Self {
        let mut next = self.clone();
        next.node_contexts.insert(node_id.into(), entry);
        next
    }

    #[must_use]
    pub fn update_metadata(&self, key: impl Into<String>, value: Value) -> Self {
        let mut next = self.clone();
        next.metadata.insert(key.into(), value);
        next
    }

    fn push_prompt_entry(
        &self,
        role: PromptRole,
        content: impl Into<String>,
        tool_calls: Option<Value>,
        tool_call_id: Option<String>,
        metadata: Option<Value>,
    ) -> Self {
        let mut next = self.clone();
        let entry = PromptEntry {
            index: next.next_index,
            role,
            content: content.into(),
            tool_calls,
            tool_call_id,
            metadata,
        };
        next.next_index += 1;
        next.prompt_history.push(entry);
        next
    }

    #[must_use]
    pub fn add_prompt_entry(
        &self,
        role: PromptRole,
        content: impl Into<String>,
        tool_calls: Option<Value>,
        tool_call_id: Option<String>,
        metadata: Option<Value>,
    ) -> Self {
        self.push_prompt_entry(role, content, tool_calls, tool_call_id, metadata)
    }

    #[must_use]
    pub fn add_system_prompt(&self, content: impl Into<String>) -> Self {
        self.push_prompt_entry(PromptRole::System, content, None, None, None)
    }

    #[must_use]
    pub fn add_user_prompt(&self, content: impl Into<String>) -> Self {
        self.push_prompt_entry(PromptRole::User, content, None, None, None)
    }

    /// Append an `assistant` entry, optionally carrying `tool_calls` emitted
    /// alongside the message.
    #[must_use]
    pub fn add_assistant_output(&self, content: impl Into<String>, tool_calls: Option<Value>) -> Self {
        self.push_prompt_entry(PromptRole::Assistant, content, tool_calls, None, None)
    }

    /// Append a `tool` entry. `tool_call_id` is required by §3's invariant
    /// that every `tool` role entry carries one.
    #[must_use]
    pub fn add_tool_result(&self, tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        self.push_prompt_entry(PromptRole::Tool, content, None, Some(tool_call_id.into()), None)
    }

    #[must_use]
    pub fn add_output(&self, content: impl Into<String>) -> Self {
        self.push_prompt_entry(PromptRole::Output, content, None, None, None)
    }

    /// Rewrite every `output`-role entry to `assistant`, in place of the
    /// indices they already hold ("without changing indices").
    #[must_use]
    pub fn convert_output_to_input(&self) -> Self {
        let mut next = self.clone();
        for entry in next.prompt_history.iter_mut() {
            if entry.role == PromptRole::Output {
                entry.role = PromptRole::Assistant;
            }
        }
        next
    }

    /// Drop every entry with `index >= k` and reset `next_index` to `k`.
    /// Used by checkpoint restoration to re-establish dense indexing.
    /// Fails with [`EngineError::Conflict`] when `k` is past the current
    /// `next_index` ("trimming history past `next_index`").
    pub fn trim_to_index(&self, k: usize) -> Result<Self, EngineError> {
        if k > self.next_index {
            return Err(EngineError::conflict(format!(
                "cannot trim to index {k}: history only has {} entries",
                self.next_index
            )));
        }
        let mut next = self.clone();
        next.prompt_history.retain(|entry| entry.index < k);
        next.next_index = k;
        Ok(next)
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// Used by [`crate::context_filter::ContextFilter::apply`] when
    /// `default_behavior = block` and no rules are present: every
    /// filterable target becomes empty.
    pub fn with_empty_filterable_state(&self) -> Self {
        let mut next = self.clone();
        next.variables.clear();
        next.metadata.clear();
        next.prompt_history.clear();
        next.next_index = 0;
        next
    }

    /// Used by [`crate::context_filter::ContextFilter::apply`] to produce a
    /// new context from filtered containers without re-deriving
    /// `next_index` from the surviving entries (indices stay meaningful for
    /// whatever remains).
    pub fn with_filtered_state(
        &self,
        variables: FxHashMap<String, Value>,
        prompt_history: Vec<PromptEntry>,
        metadata: FxHashMap<String, Value>,
    ) -> Self {
        let mut next = self.clone();
        next.variables = variables;
        next.prompt_history = prompt_history;
        next.metadata = metadata;
        next
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            variables: self.variables.clone(),
            node_contexts: self.node_contexts.clone(),
            node_results: self.node_results.clone(),
            prompt_history: self.prompt_history.clone(),
            metadata: self.metadata.clone(),
            next_index: self.next_index,
            snapshot_at: Timestamp::now(),
        }
    }

    pub fn restore(snapshot: ContextSnapshot) -> Self {
        Self {
            variables: snapshot.variables,
            node_contexts: snapshot.node_contexts,
            node_results: snapshot.node_results,
            prompt_history: snapshot.prompt_history,
            metadata: snapshot.metadata,
            next_index: snapshot.next_index,
        }
    }

    /// A deterministic, UTF-16-code-unit-based size estimate used only for
    /// reporting and checkpoint eviction hints — never for
    /// correctness.
    pub fn memory_estimate(&self) -> usize {
        let mut total = 0usize;
        for (k, v) in &self.variables {
            total += k.encode_utf16().count() + value_memory_estimate(v);
        }
        for (k, v) in &self.node_results {
            total += k.encode_utf16().count() + value_memory_estimate(v);
        }
        for (k, entry) in &self.node_contexts {
            total += k.encode_utf16().count();
            for (lk, lv) in &entry.local_variables {
                total += lk.encode_utf16().count() + value_memory_estimate(lv);
            }
            for (mk, mv) in &entry.metadata {
                total += mk.encode_utf16().count() + value_memory_estimate(mv);
            }
        }
        for (k, v) in &self.metadata {
            total += k.encode_utf16().count() + value_memory_estimate(v);
        }
        for entry in &self.prompt_history {
            total += entry.content.encode_utf16().count() + 16;
            if let Some(id) = &entry.tool_call_id {
                total += id.encode_utf16().count();
            }
        }
        total
    }
}

fn value_memory_estimate(value: &Value) -> usize {
    match value {
        Value::Null => 4,
        Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => s.encode_utf16().count(),
        Value::Array(items) => items.iter().map(value_memory_estimate).sum(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| k.encode_utf16().count() + value_memory_estimate(v))
            .sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_variable_is_copy_on_write() {
        let ctx = ExecutionContext::new().set_variable("x", Value::from(1));
        let ctx2 = ctx.set_variable("x", Value::from(2));
        assert_eq!(ctx.get_variable("x"), Some(&Value::from(1)));
        assert_eq!(ctx2.get_variable("x"), Some(&Value::from(2)));
    }

    #[test]
    fn prompt_history_indexing_is_dense() {
        let ctx = ExecutionContext::new()
            .add_user_prompt("hi")
            .add_assistant_output("hello", None)
            .add_tool_result("call_1", "42");
        let indices: Vec<usize> = ctx.prompt_history.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(ctx.next_index(), 3);
    }

    #[test]
    fn convert_output_to_input_preserves_indices() {
        let ctx = ExecutionContext::new()
            .add_user_prompt("hi")
            .add_output("draft answer");
        let converted = ctx.convert_output_to_input();
        assert_eq!(converted.prompt_history[1].role, PromptRole::Assistant);
        assert_eq!(converted.prompt_history[1].index, 1);
    }

    #[test]
    fn trim_to_index_drops_entries_and_resets_next_index() {
        let ctx = ExecutionContext::new()
            .add_user_prompt("a")
            .add_user_prompt("b")
            .add_user_prompt("c");
        let trimmed = ctx.trim_to_index(1).unwrap();
        assert_eq!(trimmed.prompt_history.len(), 1);
        assert_eq!(trimmed.next_index(), 1);
    }

    #[test]
    fn trim_past_next_index_is_conflict() {
        let ctx = ExecutionContext::new().add_user_prompt("a");
        let err = ctx.trim_to_index(5).unwrap_err();
        assert_eq!(err.kind_tag(), "Conflict");
    }

    #[test]
    fn snapshot_restore_round_trips() {
        let ctx = ExecutionContext::new()
            .set_variable("x", Value::from(1))
            .add_user_prompt("hi");
        let snap = ctx.snapshot();
        let restored = ExecutionContext::restore(snap);
        assert_eq!(ctx, restored);
    }
}
