//! Single-slot human approval.
//!
//! At most one task is waiting for approval at any time. Other tasks that
//! need approval queue behind it until the approving layer resolves the
//! pending request.

use chrono::Utc;
use patchwright_core::event::{DomainEvent, EventBus};
use patchwright_core::task::TaskId;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApproval {
    pub task_id: TaskId,
    pub description: String,
}

struct Slot {
    request: PendingApproval,
    responder: oneshot::Sender<bool>,
}

#[derive(Default)]
pub struct ApprovalGate {
    turn: tokio::sync::Mutex<()>,
    pending: Mutex<Option<Slot>>,
    event_bus: Option<Arc<EventBus>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Wait until `task_id` holds the slot, flag it, then wait for the
    /// decision. A dropped request counts as denied.
    pub async fn request(&self, task_id: &TaskId, description: impl Into<String>) -> bool {
        let _turn = self.turn.lock().await;
        let description = description.into();
        let (responder, decision) = oneshot::channel();

        *self.slot() = Some(Slot {
            request: PendingApproval {
                task_id: task_id.clone(),
                description: description.clone(),
            },
            responder,
        });
        let _clear = ClearOnDrop { gate: self, task_id };

        info!(task_id = %task_id, %description, "Approval requested");
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::ApprovalRequested {
                task_id: task_id.to_string(),
                description,
                timestamp: Utc::now(),
            });
        }

        decision.await.unwrap_or(false)
    }

    /// The request currently waiting, if any.
    pub fn pending(&self) -> Option<PendingApproval> {
        self.slot().as_ref().map(|slot| slot.request.clone())
    }

    /// Approve or deny the pending request of `task_id`. Returns `false`
    /// when that task is not the one waiting.
    pub fn resolve(&self, task_id: &TaskId, approved: bool) -> bool {
        let mut slot = self.slot();
        match slot.take() {
            Some(current) if current.request.task_id == *task_id => {
                debug!(task_id = %task_id, approved, "Approval resolved");
                let _ = current.responder.send(approved);
                true
            }
            other => {
                *slot = other;
                false
            }
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Slot>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears the slot if its owner stops waiting without a decision.
struct ClearOnDrop<'a> {
    gate: &'a ApprovalGate,
    task_id: &'a TaskId,
}

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        let mut slot = self.gate.slot();
        if slot
            .as_ref()
            .is_some_and(|s| s.request.task_id == *self.task_id)
        {
            *slot = None;
        }
    }
}
