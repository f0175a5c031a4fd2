//! Run event system for observability.
//!
//! Emits [`RunEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! observers (loggers, progress output, tests) can follow a run without
//! coupling to the executor internals.

use serde::{Deserialize, Serialize};

/// Events emitted during graph execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
    RunStarted {
        start_node: String,
        node_count: usize,
    },
    ToolApplied {
        node_id: String,
        tool_name: String,
        iteration: u64,
    },
    ConditionEvaluated {
        node_id: String,
        result: bool,
        next: String,
    },
    MaxIterationsExceeded {
        node_id: String,
        max_iterations: u64,
    },
    RunCompleted {
        steps: usize,
        duration_ms: u64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
