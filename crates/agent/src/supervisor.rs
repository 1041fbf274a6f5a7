//! Runs task loops concurrently and keeps track of them by id.

use crate::loop_runner::TaskLoop;
use crate::model::ModelSource;
use patchwright_core::task::{AgentTask, TaskId, TaskStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct Running {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<AgentTask>,
}

#[derive(Default)]
struct Registry {
    running: HashMap<TaskId, Running>,
    finished: HashMap<TaskId, AgentTask>,
}

/// Spawns each task loop on the runtime. Tasks share nothing through the
/// supervisor; finished tasks are archived until collected with `wait`.
#[derive(Default, Clone)]
pub struct TaskSupervisor {
    inner: Arc<Mutex<Registry>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&self, task_loop: TaskLoop, mut model: Box<dyn ModelSource>) -> TaskId {
        let (cancel, cancel_rx) = watch::channel(false);
        let task_loop = task_loop.with_cancellation(cancel_rx);
        let id = task_loop.task().id.clone();

        let inner = self.inner.clone();
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let task = task_loop.run(model.as_mut()).await;
            lock(&inner).finished.insert(task_id, task.clone());
            task
        });

        info!(task_id = %id, "Task spawned");
        lock(&self.inner)
            .running
            .insert(id.clone(), Running { cancel, handle });
        id
    }

    /// Ask a running task to stop. Returns `false` for unknown or finished
    /// tasks.
    pub fn cancel(&self, id: &TaskId) -> bool {
        let registry = lock(&self.inner);
        if registry.finished.contains_key(id) {
            return false;
        }
        match registry.running.get(id) {
            Some(running) => running.cancel.send(true).is_ok(),
            None => false,
        }
    }

    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        let registry = lock(&self.inner);
        if let Some(task) = registry.finished.get(id) {
            return Some(task.status);
        }
        registry.running.contains_key(id).then_some(TaskStatus::Running)
    }

    /// Ids of tasks that have not finished yet.
    pub fn active(&self) -> Vec<TaskId> {
        let registry = lock(&self.inner);
        registry
            .running
            .keys()
            .filter(|id| !registry.finished.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Wait for a task to finish and take it out of the archive.
    pub async fn wait(&self, id: &TaskId) -> Option<AgentTask> {
        let running = lock(&self.inner).running.remove(id);
        let task = match running {
            Some(running) => match running.handle.await {
                Ok(task) => Some(task),
                Err(e) => {
                    warn!(task_id = %id, error = %e, "Task loop aborted");
                    None
                }
            },
            None => None,
        };
        let archived = lock(&self.inner).finished.remove(id);
        task.or(archived)
    }
}

fn lock(inner: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
