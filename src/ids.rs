//! Opaque identifiers, monotonic timestamps, and entity versions.
//!
//! Every identifier in the engine is a thin newtype around `String` so that
//! workflow ids, thread ids, node ids, and so on can't be accidentally mixed
//! up at a call site. [`IdGenerator`] produces ids whose lexicographic order
//! approximates creation order: a millisecond timestamp prefix followed by a
//! random suffix.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(WorkflowId, "Identifies a compiled [`Workflow`](crate::workflow::Workflow).");
opaque_id!(ThreadId, "Identifies one concrete execution of a workflow.");
opaque_id!(NodeId, "Identifies a node within a workflow.");
opaque_id!(EdgeId, "Identifies an edge within a workflow.");
opaque_id!(CheckpointId, "Identifies a stored checkpoint.");
opaque_id!(HistoryId, "Identifies a single history record.");
opaque_id!(ForkId, "Identifies a fork operation and its resulting thread.");
opaque_id!(CopyId, "Identifies a thread-copy operation.");

/// A point in time. Thin wrapper over [`chrono::DateTime<Utc>`] so call
/// sites read `Timestamp::now()` instead of reaching into `chrono` directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// A monotonically increasing version counter for an entity (node, edge,
/// execution context channel, ...). Starts at 0 for a freshly created
/// entity and increments by one on each observable mutation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Generates lexicographically-sortable-enough opaque ids.
///
/// Not a strict guarantee (two ids minted within the same millisecond only
/// sort by their random suffix) but good enough that ids roughly track
/// creation order, which is all callers depending on insertion order need.
#[derive(Debug, Default)]
pub struct IdGenerator {
    // Disambiguates ids minted in the same process within the same millisecond.
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&self, prefix: &str) -> String {
        let millis = Utc::now().timestamp_millis();
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let nonce: u32 = rand::rng().random();
        format!("{prefix}_{millis:013x}_{seq:06x}_{nonce:08x}")
    }

    pub fn workflow_id(&self) -> WorkflowId {
        WorkflowId(self.mint("wf"))
    }

    pub fn thread_id(&self) -> ThreadId {
        ThreadId(self.mint("th"))
    }

    pub fn node_id(&self, hint: &str) -> NodeId {
        NodeId(hint.to_string())
    }

    pub fn edge_id(&self) -> EdgeId {
        EdgeId(self.mint("ed"))
    }

    pub fn checkpoint_id(&self) -> CheckpointId {
        CheckpointId(self.mint("cp"))
    }

    pub fn history_id(&self) -> HistoryId {
        HistoryId(self.mint("hi"))
    }

    pub fn fork_id(&self) -> ForkId {
        ForkId(self.mint("fk"))
    }

    pub fn copy_id(&self) -> CopyId {
        CopyId(self.mint("cy"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_and_prefixed() {
        let gen = IdGenerator::new();
        let a = gen.thread_id();
        let b = gen.thread_id();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("th_"));
    }

    #[test]
    fn version_increments() {
        let v = Version::default();
        assert_eq!(v.0, 0);
        assert_eq!(v.next().0, 1);
    }

    #[test]
    fn timestamp_roundtrips_through_json() {
        let ts = Timestamp::now();
        let json = serde_json::to_string(&ts).unwrap();
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, back);
    }
}
