//! A small, fixed-capacity, best-effort result cache for the evaluator.
//!
//! An `FxHashMap` for lookup plus a `VecDeque` tracking insertion order for
//! eviction, guarded by a `parking_lot::Mutex`. Races that cause duplicate
//! evaluation work but converge on the same cached value are acceptable
//! ("thread-safe and best-effort").

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};

use rustc_hash::{FxHashMap, FxHasher};
use parking_lot::Mutex;
use serde_json::Value;

struct CacheInner {
    entries: FxHashMap<u64, Value>,
    order: VecDeque<u64>,
}

pub struct ExpressionCache {
    inner: Mutex<CacheInner>,
    max_entries: usize,
}

impl ExpressionCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: FxHashMap::default(),
                order: VecDeque::new(),
            }),
            max_entries,
        }
    }

    /// Build the cache key from the expression source and a caller-supplied
    /// scope hash (§4.1: `(expression_source, hash_of_scope)`).
    pub fn key(expression_source: &str, scope_hash: u64) -> u64 {
        let mut hasher = FxHasher::default();
        expression_source.hash(&mut hasher);
        scope_hash.hash(&mut hasher);
        hasher.finish()
    }

    pub fn get(&self, key: u64) -> Option<Value> {
        self.inner.lock().entries.get(&key).cloned()
    }

    pub fn put(&self, key: u64, value: Value) {
        if self.max_entries == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&key) {
            inner.order.push_back(key);
        }
        inner.entries.insert(key, value);
        while inner.entries.len() > self.max_entries {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }
}

/// Hash a variable scope deterministically regardless of `FxHashMap`'s
/// unspecified iteration order, by hashing over sorted keys.
pub fn hash_scope(variables: &FxHashMap<String, Value>) -> u64 {
    let mut keys: Vec<&String> = variables.keys().collect();
    keys.sort();
    let mut hasher = FxHasher::default();
    for key in keys {
        key.hash(&mut hasher);
        if let Some(value) = variables.get(key) {
            serde_json::to_string(value).unwrap_or_default().hash(&mut hasher);
        }
    }
    hasher.finish()
}
