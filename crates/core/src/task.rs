//! Agent tasks and their append-only step history.
//!
//! Both carry small state machines:
//!
//! ```text
//! step:  pending → executing → completed | failed
//! task:  running → completed | failed | cancelled
//! ```
//!
//! Terminal states are final. A step that has completed or failed is never
//! executed again; a task only leaves `running` once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::TransitionError;

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Terminal,
    FileRead,
    FileWrite,
    Search,
    Thinking,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One unit of work inside a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub id: String,
    pub step_type: StepType,
    pub description: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AgentStep {
    pub fn new(step_type: StepType, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            step_type,
            description: description.into(),
            status: StepStatus::Pending,
            output: None,
            result: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        if self.status != StepStatus::Pending {
            return Err(self.transition_error(StepStatus::Executing));
        }
        self.status = StepStatus::Executing;
        self.timestamp = Utc::now();
        Ok(())
    }

    pub fn complete(&mut self, output: impl Into<String>) -> Result<(), TransitionError> {
        if self.status != StepStatus::Executing {
            return Err(self.transition_error(StepStatus::Completed));
        }
        self.status = StepStatus::Completed;
        self.output = Some(output.into());
        self.timestamp = Utc::now();
        Ok(())
    }

    /// Fails a pending or executing step.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(self.transition_error(StepStatus::Failed));
        }
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.timestamp = Utc::now();
        Ok(())
    }

    fn transition_error(&self, to: StepStatus) -> TransitionError {
        TransitionError {
            entity: "step",
            id: self.id.clone(),
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

/// A step that was still running when its task ended.
#[derive(Debug, Clone, PartialEq)]
pub struct AbortedStep {
    pub step_id: String,
    /// When the step entered the state it was aborted from.
    pub started: DateTime<Utc>,
}

/// A unit of user-submitted work against one project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: TaskId,
    pub description: String,
    pub project_root: PathBuf,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    /// Why the task ended, when it did not simply complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub steps: Vec<AgentStep>,
}

impl AgentTask {
    pub fn new(description: impl Into<String>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            id: TaskId::new(),
            description: description.into(),
            project_root: project_root.into(),
            created_at: Utc::now(),
            completed_at: None,
            status: TaskStatus::Running,
            reason: None,
            steps: Vec::new(),
        }
    }

    /// Append a pending step and return its index.
    pub fn push_step(&mut self, step: AgentStep) -> usize {
        self.steps.push(step);
        self.steps.len() - 1
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut AgentStep> {
        self.steps.get_mut(index)
    }

    /// Steps still pending or executing.
    pub fn in_flight(&self) -> impl Iterator<Item = &AgentStep> {
        self.steps.iter().filter(|s| !s.status.is_terminal())
    }

    pub fn complete(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.finish(TaskStatus::Completed, reason.into())
    }

    /// Fail the task. Steps still in flight are failed with it and returned.
    pub fn fail(
        &mut self,
        reason: impl Into<String>,
    ) -> Result<Vec<AbortedStep>, TransitionError> {
        let reason = reason.into();
        self.finish(TaskStatus::Failed, reason.clone())?;
        Ok(self.abort_in_flight(&format!("task failed: {reason}")))
    }

    /// Cancel the task. Steps still in flight are failed and returned.
    pub fn cancel(
        &mut self,
        reason: impl Into<String>,
    ) -> Result<Vec<AbortedStep>, TransitionError> {
        let reason = reason.into();
        self.finish(TaskStatus::Cancelled, reason.clone())?;
        Ok(self.abort_in_flight(&format!("cancelled: {reason}")))
    }

    fn abort_in_flight(&mut self, error: &str) -> Vec<AbortedStep> {
        let mut aborted = Vec::new();
        for step in self.steps.iter_mut().filter(|s| !s.status.is_terminal()) {
            let started = step.timestamp;
            if step.fail(error).is_ok() {
                aborted.push(AbortedStep {
                    step_id: step.id.clone(),
                    started,
                });
            }
        }
        aborted
    }

    fn finish(&mut self, to: TaskStatus, reason: String) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError {
                entity: "task",
                id: self.id.to_string(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.reason = Some(reason);
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_follows_state_machine() {
        let mut step = AgentStep::new(StepType::Terminal, "ls");
        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.complete("too early").is_err());
        step.start().unwrap();
        step.complete("ok").unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.output.as_deref(), Some("ok"));
    }

    #[test]
    fn finished_step_is_never_restarted() {
        let mut step = AgentStep::new(StepType::FileRead, "read a.rs");
        step.start().unwrap();
        step.fail("missing").unwrap();
        let err = step.start().unwrap_err();
        assert_eq!(err.from, "failed");
        assert!(step.fail("again").is_err());
    }

    #[test]
    fn task_terminal_state_is_final() {
        let mut task = AgentTask::new("fix bug", "/tmp/project");
        task.complete("done").unwrap();
        assert!(task.completed_at.is_some());
        assert!(task.fail("late").is_err());
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn cancel_fails_in_flight_steps() {
        let mut task = AgentTask::new("refactor", "/tmp/project");
        let done = task.push_step(AgentStep::new(StepType::FileRead, "read"));
        task.step_mut(done).unwrap().start().unwrap();
        task.step_mut(done).unwrap().complete("contents").unwrap();
        let running = task.push_step(AgentStep::new(StepType::Terminal, "cargo test"));
        task.step_mut(running).unwrap().start().unwrap();

        let aborted = task.cancel("user request").unwrap();
        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].step_id, task.steps[running].id);
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.steps[done].status, StepStatus::Completed);
        assert_eq!(task.steps[running].status, StepStatus::Failed);
        assert_eq!(task.in_flight().count(), 0);
    }

    #[test]
    fn fail_reports_aborted_steps() {
        let mut task = AgentTask::new("refactor", "/tmp/project");
        let pending = task.push_step(AgentStep::new(StepType::FileWrite, "write"));

        let aborted = task.fail("budget exceeded").unwrap();
        assert_eq!(aborted.len(), 1);
        assert_eq!(task.steps[pending].status, StepStatus::Failed);
        assert_eq!(
            task.steps[pending].error.as_deref(),
            Some("task failed: budget exceeded")
        );
        assert!(task.fail("again").is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&StepType::FileWrite).unwrap();
        assert_eq!(json, "\"file_write\"");
        assert_eq!(TaskStatus::Cancelled.to_string(), "cancelled");
    }
}
