//! Append-only per-thread execution trace.
//!
//! Timestamped, scoped records in an ordered `Vec`, guarded by a
//! `parking_lot::RwLock` over a per-thread map.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{HistoryId, IdGenerator, NodeId, ThreadId, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    Success,
    Failure,
    Pending,
    Running,
}

/// One append-only record of a node's execution within a thread.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub history_id: HistoryId,
    pub thread_id: ThreadId,
    pub node_id: NodeId,
    pub timestamp: Timestamp,
    pub status: HistoryStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub metadata: Value,
}

/// Counts of history records by status, for a single thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStatistics {
    pub total: usize,
    pub success: usize,
    pub failure: usize,
    pub pending: usize,
    pub running: usize,
}

/// Thread-local execution history; no cross-thread visibility.
pub struct HistoryManager {
    records: RwLock<FxHashMap<ThreadId, Vec<HistoryRecord>>>,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryManager {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(FxHashMap::default()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        id_gen: &IdGenerator,
        thread_id: &ThreadId,
        node_id: &NodeId,
        status: HistoryStatus,
        result: Option<Value>,
        error: Option<String>,
        metadata: Option<Value>,
    ) -> HistoryId {
        let history_id = id_gen.history_id();
        let record = HistoryRecord {
            history_id: history_id.clone(),
            thread_id: thread_id.clone(),
            node_id: node_id.clone(),
            timestamp: Timestamp::now(),
            status,
            result,
            error,
            metadata: metadata.unwrap_or(Value::Null),
        };
        self.records
            .write()
            .entry(thread_id.clone())
            .or_default()
            .push(record);
        history_id
    }

    pub fn get_history(&self, thread_id: &ThreadId) -> Vec<HistoryRecord> {
        self.records
            .read()
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_node_history(&self, thread_id: &ThreadId, node_id: &NodeId) -> Vec<HistoryRecord> {
        self.get_history(thread_id)
            .into_iter()
            .filter(|r| &r.node_id == node_id)
            .collect()
    }

    /// Most recent records first, optionally bounded to `limit`.
    pub fn get_latest_history(&self, thread_id: &ThreadId, limit: Option<usize>) -> Vec<HistoryRecord> {
        let mut records = self.get_history(thread_id);
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        records
    }

    pub fn get_statistics(&self, thread_id: &ThreadId) -> HistoryStatistics {
        let records = self.get_history(thread_id);
        let mut stats = HistoryStatistics {
            total: records.len(),
            ..Default::default()
        };
        for record in &records {
            match record.status {
                HistoryStatus::Success => stats.success += 1,
                HistoryStatus::Failure => stats.failure += 1,
                HistoryStatus::Pending => stats.pending += 1,
                HistoryStatus::Running => stats.running += 1,
            }
        }
        stats
    }

    pub fn clear_history(&self, thread_id: &ThreadId) {
        self.records.write().remove(thread_id);
    }

    pub fn clear_all(&self) {
        self.records.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_thread_local() {
        let manager = HistoryManager::new();
        let id_gen = IdGenerator::new();
        let t1 = ThreadId::new("t1");
        let t2 = ThreadId::new("t2");
        manager.record(&id_gen, &t1, &NodeId::new("n1"), HistoryStatus::Success, None, None, None);
        assert_eq!(manager.get_history(&t1).len(), 1);
        assert_eq!(manager.get_history(&t2).len(), 0);
    }

    #[test]
    fn latest_history_is_sorted_descending() {
        let manager = HistoryManager::new();
        let id_gen = IdGenerator::new();
        let t1 = ThreadId::new("t1");
        for i in 0..3 {
            manager.record(
                &id_gen,
                &t1,
                &NodeId::new(format!("n{i}")),
                HistoryStatus::Success,
                None,
                None,
                None,
            );
        }
        let latest = manager.get_latest_history(&t1, Some(2));
        assert_eq!(latest.len(), 2);
        assert!(latest[0].timestamp >= latest[1].timestamp);
    }

    #[test]
    fn statistics_count_by_status() {
        let manager = HistoryManager::new();
        let id_gen = IdGenerator::new();
        let t1 = ThreadId::new("t1");
        manager.record(&id_gen, &t1, &NodeId::new("a"), HistoryStatus::Success, None, None, None);
        manager.record(&id_gen, &t1, &NodeId::new("b"), HistoryStatus::Failure, None, Some("boom".into()), None);
        let stats = manager.get_statistics(&t1);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failure, 1);
    }
}
