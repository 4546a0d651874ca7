//! Runtime configuration: resolves engine-wide settings from builder calls
//! or environment variables into a single validated struct.

use std::sync::Arc;

use crate::event_bus::{EventBus, StdOutSink};

/// Bounded retention for the [`CheckpointManager`](crate::checkpoint::CheckpointManager).
#[derive(Clone, Copy, Debug)]
pub struct CheckpointConfig {
    pub max_per_thread: usize,
    pub max_total: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            max_per_thread: 10,
            max_total: 1000,
        }
    }
}

/// Sink selection for the ambient event bus.
#[derive(Clone, Debug, Default)]
pub enum SinkConfig {
    #[default]
    StdOut,
    Memory,
}

/// Engine-wide configuration, resolved once per [`Engine`](crate::engine::Engine).
///
/// Every field has a documented default; `EngineConfig::from_env`
/// overlays environment variables via `dotenvy`.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub checkpoint: CheckpointConfig,
    pub max_steps: u64,
    pub timeout_ms: u64,
    pub checkpoint_interval_steps: Option<u64>,
    pub evaluator_cache_max_entries: usize,
    pub event_bus_sink: SinkConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint: CheckpointConfig::default(),
            max_steps: 1000,
            timeout_ms: 0,
            checkpoint_interval_steps: None,
            evaluator_cache_max_entries: 1024,
            event_bus_sink: SinkConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay environment variables on top of the defaults. Unset variables
    /// leave the default untouched; malformed values are ignored rather than
    /// failing construction.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("THREADGRAPH_MAX_STEPS") {
            if let Ok(n) = v.parse() {
                cfg.max_steps = n;
            }
        }
        if let Ok(v) = std::env::var("THREADGRAPH_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                cfg.timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("THREADGRAPH_CHECKPOINT_MAX_PER_THREAD") {
            if let Ok(n) = v.parse() {
                cfg.checkpoint.max_per_thread = n;
            }
        }
        if let Ok(v) = std::env::var("THREADGRAPH_CHECKPOINT_MAX_TOTAL") {
            if let Ok(n) = v.parse() {
                cfg.checkpoint.max_total = n;
            }
        }
        cfg
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_checkpoint_interval(mut self, steps: u64) -> Self {
        self.checkpoint_interval_steps = Some(steps);
        self
    }

    pub fn with_checkpoint_bounds(mut self, max_per_thread: usize, max_total: usize) -> Self {
        self.checkpoint = CheckpointConfig {
            max_per_thread,
            max_total,
        };
        self
    }

    pub fn with_memory_event_bus(mut self) -> Self {
        self.event_bus_sink = SinkConfig::Memory;
        self
    }

    /// Build the event bus this configuration describes.
    pub fn build_event_bus(&self) -> Arc<EventBus> {
        match self.event_bus_sink {
            SinkConfig::StdOut => Arc::new(EventBus::with_sink(StdOutSink::default())),
            SinkConfig::Memory => {
                Arc::new(EventBus::with_sink(crate::event_bus::MemorySink::new()))
            }
        }
    }
}
