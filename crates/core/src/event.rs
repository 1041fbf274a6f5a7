//! Domain events for observing task progress.
//!
//! The task loop, edit pipeline and shadow verifier publish events here;
//! UIs, loggers and tests subscribe without coupling to the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::task::{StepStatus, StepType, TaskStatus};

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    TaskStarted {
        task_id: String,
        description: String,
        timestamp: DateTime<Utc>,
    },

    /// Plain model narration, with tool-call frames removed
    Narration { task_id: String, text: String },

    StepStarted {
        task_id: String,
        step_id: String,
        step_type: StepType,
        description: String,
        timestamp: DateTime<Utc>,
    },

    StepFinished {
        task_id: String,
        step_id: String,
        status: StepStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A malformed tool call was dropped
    CallDropped { task_id: String, reason: String },

    EditRejected {
        path: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    EditApplied {
        path: String,
        added_lines: usize,
        removed_lines: usize,
        timestamp: DateTime<Utc>,
    },

    VerificationFinished {
        root: String,
        passed: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    ApprovalRequested {
        task_id: String,
        description: String,
        timestamp: DateTime<Utc>,
    },

    TaskFinished {
        task_id: String,
        status: TaskStatus,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
