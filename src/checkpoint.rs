//! State snapshot/restore with bounded retention.
//!
//! A bounded, ordered checkpoint history per thread plus a global
//! eviction bound: §4.7 requires both `max_per_thread` and `max_total`
//! to be enforced.

use std::collections::VecDeque;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::errors::EngineError;
use crate::ids::{CheckpointId, IdGenerator, NodeId, ThreadId, Timestamp, WorkflowId};
use crate::state::WorkflowState;

/// An encoded snapshot of a [`WorkflowState`] at a point in time.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    pub checkpoint_id: CheckpointId,
    pub thread_id: ThreadId,
    pub workflow_id: WorkflowId,
    pub current_node_id: Option<NodeId>,
    pub state_snapshot: Value,
    pub timestamp: Timestamp,
    pub metadata: Option<Value>,
}

struct Inner {
    per_thread: FxHashMap<ThreadId, VecDeque<Checkpoint>>,
    /// Global creation order, oldest at the front; used to find the
    /// globally-oldest checkpoint in O(1) once total exceeds `max_total`.
    global_order: VecDeque<(ThreadId, CheckpointId)>,
}

/// Snapshot/restore with bounded, cascading retention.
///
/// Construction parameters `max_per_thread`/`max_total` bound the per-thread
/// and global checkpoint counts respectively; eviction happens synchronously
/// inside [`CheckpointManager::create`] ("Eviction is performed
/// synchronously within the create call").
pub struct CheckpointManager {
    max_per_thread: usize,
    max_total: usize,
    inner: RwLock<Inner>,
}

impl CheckpointManager {
    pub fn new(max_per_thread: usize, max_total: usize) -> Self {
        Self {
            max_per_thread,
            max_total,
            inner: RwLock::new(Inner {
                per_thread: FxHashMap::default(),
                global_order: VecDeque::new(),
            }),
        }
    }

    /// Serializes `state.to_props()` and appends it to the thread's ordered
    /// list, evicting as needed to stay within `max_per_thread`/`max_total`
    /// (§4.7, §8 "checkpoint eviction").
    pub fn create(
        &self,
        id_gen: &IdGenerator,
        thread_id: &ThreadId,
        workflow_id: &WorkflowId,
        node_id: Option<&NodeId>,
        state: &WorkflowState,
        metadata: Option<Value>,
    ) -> Result<CheckpointId, EngineError> {
        let checkpoint_id = id_gen.checkpoint_id();
        let checkpoint = Checkpoint {
            checkpoint_id: checkpoint_id.clone(),
            thread_id: thread_id.clone(),
            workflow_id: workflow_id.clone(),
            current_node_id: node_id.cloned(),
            state_snapshot: state.to_props()?,
            timestamp: Timestamp::now(),
            metadata,
        };

        let mut inner = self.inner.write();
        inner
            .per_thread
            .entry(thread_id.clone())
            .or_default()
            .push_back(checkpoint);
        inner
            .global_order
            .push_back((thread_id.clone(), checkpoint_id.clone()));

        if self.max_per_thread > 0 {
            if let Some(bucket) = inner.per_thread.get_mut(thread_id) {
                while bucket.len() > self.max_per_thread {
                    if let Some(evicted) = bucket.pop_front() {
                        remove_from_global_order(&mut inner.global_order, &evicted.checkpoint_id);
                    }
                }
            }
        }

        if self.max_total > 0 {
            while total_count(&inner.per_thread) > self.max_total {
                let Some((oldest_thread, oldest_id)) = inner.global_order.pop_front() else {
                    break;
                };
                if let Some(bucket) = inner.per_thread.get_mut(&oldest_thread) {
                    bucket.retain(|cp| cp.checkpoint_id != oldest_id);
                }
            }
        }

        Ok(checkpoint_id)
    }

    /// Rehydrate a [`WorkflowState`] from the encoded snapshot, re-trimming
    /// the prompt history to `next_index` so dense indexing survives
    /// restoration intact ("re-establish the dense prompt-history
    /// indexing").
    pub fn restore(&self, checkpoint_id: &CheckpointId) -> Result<Option<WorkflowState>, EngineError> {
        let Some(checkpoint) = self.get(checkpoint_id) else {
            return Ok(None);
        };
        let mut state = WorkflowState::from_props(checkpoint.state_snapshot)?;
        let next_index = state.execution_context.next_index();
        state.execution_context = state.execution_context.trim_to_index(next_index)?;
        Ok(Some(state))
    }

    pub fn get(&self, checkpoint_id: &CheckpointId) -> Option<Checkpoint> {
        let inner = self.inner.read();
        inner
            .per_thread
            .values()
            .flat_map(|bucket| bucket.iter())
            .find(|cp| &cp.checkpoint_id == checkpoint_id)
            .cloned()
    }

    pub fn delete(&self, checkpoint_id: &CheckpointId) -> bool {
        let mut inner = self.inner.write();
        let mut removed = false;
        for bucket in inner.per_thread.values_mut() {
            let before = bucket.len();
            bucket.retain(|cp| &cp.checkpoint_id != checkpoint_id);
            removed |= bucket.len() != before;
        }
        remove_from_global_order(&mut inner.global_order, checkpoint_id);
        removed
    }

    /// Newest-first.
    pub fn get_thread_checkpoints(&self, thread_id: &ThreadId) -> Vec<Checkpoint> {
        let inner = self.inner.read();
        inner
            .per_thread
            .get(thread_id)
            .map(|bucket| bucket.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_latest_checkpoint(&self, thread_id: &ThreadId) -> Option<Checkpoint> {
        let inner = self.inner.read();
        inner.per_thread.get(thread_id).and_then(|b| b.back().cloned())
    }

    pub fn clear_thread_checkpoints(&self, thread_id: &ThreadId) {
        let mut inner = self.inner.write();
        inner.per_thread.remove(thread_id);
        inner.global_order.retain(|(t, _)| t != thread_id);
    }

    pub fn clear_all(&self) {
        let mut inner = self.inner.write();
        inner.per_thread.clear();
        inner.global_order.clear();
    }

    pub fn total_checkpoints(&self) -> usize {
        total_count(&self.inner.read().per_thread)
    }

    pub fn checkpoints_for(&self, thread_id: &ThreadId) -> usize {
        self.inner
            .read()
            .per_thread
            .get(thread_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

fn total_count(per_thread: &FxHashMap<ThreadId, VecDeque<Checkpoint>>) -> usize {
    per_thread.values().map(VecDeque::len).sum()
}

fn remove_from_global_order(order: &mut VecDeque<(ThreadId, CheckpointId)>, checkpoint_id: &CheckpointId) {
    order.retain(|(_, id)| id != checkpoint_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap as Map;

    fn state(thread: &str) -> WorkflowState {
        WorkflowState::new(WorkflowId::new("wf"), ThreadId::new(thread), Map::default())
    }

    #[test]
    fn eviction_respects_per_thread_bound() {
        let manager = CheckpointManager::new(2, 100);
        let id_gen = IdGenerator::new();
        let thread = ThreadId::new("t1");
        for _ in 0..5 {
            manager
                .create(&id_gen, &thread, &WorkflowId::new("wf"), None, &state("t1"), None)
                .unwrap();
        }
        assert_eq!(manager.checkpoints_for(&thread), 2);
    }

    #[test]
    fn eviction_respects_global_bound() {
        let manager = CheckpointManager::new(10, 3);
        let id_gen = IdGenerator::new();
        for i in 0..5 {
            let thread = ThreadId::new(format!("t{i}"));
            manager
                .create(&id_gen, &thread, &WorkflowId::new("wf"), None, &state(&format!("t{i}")), None)
                .unwrap();
        }
        assert_eq!(manager.total_checkpoints(), 3);
    }

    #[test]
    fn restore_unknown_checkpoint_returns_none() {
        let manager = CheckpointManager::new(10, 10);
        assert!(manager.restore(&CheckpointId::new("missing")).unwrap().is_none());
    }

    #[test]
    fn create_then_restore_round_trips() {
        let manager = CheckpointManager::new(10, 10);
        let id_gen = IdGenerator::new();
        let thread = ThreadId::new("t1");
        let original = state("t1");
        let checkpoint_id = manager
            .create(&id_gen, &thread, &WorkflowId::new("wf"), Some(&NodeId::new("n1")), &original, None)
            .unwrap();
        let restored = manager.restore(&checkpoint_id).unwrap().unwrap();
        assert_eq!(restored.to_props().unwrap(), original.to_props().unwrap());
    }
}
