//! The agent task loop.
//!
//! One [`TaskLoop`] drives one task. Each model turn is fed fragment by
//! fragment through a fresh [`StreamParser`]; every decoded call becomes a
//! step:
//!
//! - terminal calls run through the command policy and, when needed, the
//!   approval slot
//! - file writes are staged, reconciled by the robustness guard while the
//!   turn streams, and go through the edit pipeline once it ends
//! - reads, listings and searches are dispatched to the tool registry
//! - `done` asks the completion gate whether the task may finish
//!
//! Turns are consumed sequentially. Separate tasks share nothing mutable
//! except the approval slot.

use crate::approval::ApprovalGate;
use crate::completion::{CompletionGate, CompletionGateResult, CompletionInput};
use crate::executor::ApplyProgress;
use crate::model::{ModelSource, ModelTurn};
use crate::pipeline::{EditPipeline, EditVerdict};
use chrono::Utc;
use futures::StreamExt;
use patchwright_config::AgentConfig;
use patchwright_core::edit::ProposedEdit;
use patchwright_core::event::{DomainEvent, EventBus};
use patchwright_core::task::{AbortedStep, AgentStep, AgentTask, StepStatus, StepType, TaskStatus};
use patchwright_core::tool::{ToolCallRequest, ToolRegistry};
use patchwright_parser::{ParsedChunk, StreamParser};
use patchwright_safety::RobustnessGuard;
use patchwright_security::{CommandCheck, CommandPolicy};
use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Step type for a tool name, `None` for tools the loop does not know.
pub fn step_type_for(tool: &str) -> Option<StepType> {
    match tool {
        "run_terminal_cmd" | "terminal" | "shell" => Some(StepType::Terminal),
        "write_file" | "edit_file" | "create_file" => Some(StepType::FileWrite),
        "read_file" | "file_read" | "list_dir" | "list_directory" => Some(StepType::FileRead),
        "codebase_search" | "grep_search" | "web_search" => Some(StepType::Search),
        "think" => Some(StepType::Thinking),
        "done" | "task_complete" => Some(StepType::Done),
        _ => None,
    }
}

/// What one turn did to the task.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub status: TaskStatus,
    pub reason: String,
    /// Narration with tool-call frames removed
    pub narration: String,
    pub applied: usize,
    /// Present when the model signalled `done`
    pub gate: Option<CompletionGateResult>,
}

struct DoneSignal {
    step: usize,
    no_changes: bool,
}

#[derive(Default)]
struct TurnState {
    body_len: usize,
    dispatched: usize,
    narration: String,
    /// Guard-reconciled edits, one per path
    edits: Vec<ProposedEdit>,
    write_steps: BTreeMap<PathBuf, Vec<usize>>,
    /// Latest guard rejection per path
    withheld: HashMap<PathBuf, String>,
    validation_errors: Vec<String>,
    done: Option<DoneSignal>,
}

pub struct TaskLoop {
    task: AgentTask,
    tools: Arc<ToolRegistry>,
    pipeline: Arc<EditPipeline>,
    guard: RobustnessGuard,
    policy: CommandPolicy,
    approval: Option<Arc<ApprovalGate>>,
    gate: CompletionGate,
    config: AgentConfig,
    event_bus: Arc<EventBus>,
    cancel: Option<watch::Receiver<bool>>,
    progress: Option<mpsc::UnboundedSender<ApplyProgress>>,
}

impl TaskLoop {
    pub fn new(
        task: AgentTask,
        tools: Arc<ToolRegistry>,
        pipeline: Arc<EditPipeline>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            task,
            tools,
            pipeline,
            guard: RobustnessGuard::default(),
            policy: CommandPolicy::from_config(&Default::default()),
            approval: None,
            gate: CompletionGate,
            config: AgentConfig::default(),
            event_bus,
            cancel: None,
            progress: None,
        }
    }

    pub fn with_guard(mut self, guard: RobustnessGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_policy(mut self, policy: CommandPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_approval(mut self, approval: Arc<ApprovalGate>) -> Self {
        self.approval = Some(approval);
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<ApplyProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn task(&self) -> &AgentTask {
        &self.task
    }

    pub fn into_task(self) -> AgentTask {
        self.task
    }

    /// Drive the task until it reaches a terminal state or the model has
    /// nothing more to say. A model that stops without signalling `done`
    /// fails the task.
    pub async fn run(mut self, model: &mut dyn ModelSource) -> AgentTask {
        info!(task_id = %self.task.id, root = %self.task.project_root.display(), "Task started");
        self.event_bus.publish(DomainEvent::TaskStarted {
            task_id: self.task.id.to_string(),
            description: self.task.description.clone(),
            timestamp: Utc::now(),
        });

        while !self.task.status.is_terminal() {
            if self.is_cancelled() {
                self.cancel_task("cancelled before the next model turn");
                break;
            }
            let Some(turn) = model.next_turn(&self.task).await else {
                self.fail_task("model stopped without signalling completion");
                break;
            };
            let report = self.run_turn(turn).await;
            debug!(task_id = %self.task.id, status = %report.status, reason = %report.reason, "Turn finished");
        }
        self.task
    }

    /// Process one model turn.
    pub async fn run_turn(&mut self, turn: ModelTurn) -> TurnReport {
        let ModelTurn {
            status,
            mut fragments,
        } = turn;
        let mut state = TurnState::default();
        if self.task.status.is_terminal() {
            return self.report(&state, 0, None);
        }

        let mut parser = StreamParser::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => {
                    self.cancel_task("cancelled while the model was streaming");
                    return self.report(&state, 0, None);
                }
                next = fragments.next() => next,
            };
            let Some(fragment) = next else {
                break;
            };
            state.body_len += fragment.len();
            let chunk = parser.feed(&fragment);
            if self.handle_chunk(chunk, &mut state).await.is_break() {
                return self.report(&state, 0, None);
            }
        }

        let chunk = parser.flush();
        if self.handle_chunk(chunk, &mut state).await.is_break() {
            return self.report(&state, 0, None);
        }

        self.finish_turn(status, state).await
    }

    async fn handle_chunk(&mut self, chunk: ParsedChunk, state: &mut TurnState) -> ControlFlow<()> {
        if !chunk.text.is_empty() {
            state.narration.push_str(&chunk.text);
            self.event_bus.publish(DomainEvent::Narration {
                task_id: self.task.id.to_string(),
                text: chunk.text,
            });
        }
        for error in chunk.errors {
            self.drop_call(error.to_string());
        }

        for call in chunk.calls {
            if state.done.is_some() {
                warn!(task_id = %self.task.id, tool = %call.name, "Ignoring call after done");
                continue;
            }
            if self.is_cancelled() {
                self.cancel_task("cancelled between tool calls");
                return ControlFlow::Break(());
            }
            state.dispatched += 1;
            if state.dispatched > self.config.max_steps {
                self.fail_task(format!(
                    "exceeded {} tool calls in one model turn",
                    self.config.max_steps
                ));
                return ControlFlow::Break(());
            }
            self.dispatch(call, state).await;
        }
        ControlFlow::Continue(())
    }

    async fn dispatch(&mut self, call: ToolCallRequest, state: &mut TurnState) {
        let Some(step_type) = step_type_for(&call.name) else {
            self.drop_call(format!("unknown tool '{}' (call {})", call.name, call.id));
            return;
        };
        match step_type {
            StepType::FileWrite => self.stage_write(&call, state),
            StepType::Done => {
                let step = self.begin_step(StepType::Done, "signal completion");
                state.done = Some(DoneSignal {
                    step,
                    no_changes: call.flag("no_changes"),
                });
            }
            StepType::Thinking => {
                let thought = call.str_arg("thought").unwrap_or_default().to_string();
                let step = self.begin_step(StepType::Thinking, "think");
                self.finish_step(step, Ok(thought));
            }
            StepType::Terminal => self.run_terminal(&call).await,
            StepType::FileRead | StepType::Search => self.run_tool(step_type, &call).await,
        }
    }

    fn stage_write(&mut self, call: &ToolCallRequest, state: &mut TurnState) {
        let path = call.str_arg("path").or_else(|| call.str_arg("file_path"));
        let description = format!("write {}", path.unwrap_or("<missing path>"));
        let step = self.begin_step(StepType::FileWrite, description);

        let (Some(path), Some(content)) = (path, call.str_arg("content")) else {
            self.finish_step(step, Err("write needs 'path' and 'content' arguments".into()));
            return;
        };

        let path = PathBuf::from(path);
        let edit = if call.flag("partial") {
            ProposedEdit::streaming(path.clone(), content)
        } else {
            ProposedEdit::complete(path.clone(), "", content)
        };

        let merged = self
            .guard
            .merge_files(&state.edits, std::slice::from_ref(&edit), true);
        state.edits = merged.edits;
        match merged.rejected.first() {
            Some(rejection) => {
                debug!(task_id = %self.task.id, path = rejection.path(), error = %rejection, "Revision withheld");
                state.withheld.insert(path.clone(), rejection.to_string());
            }
            None => {
                state.withheld.remove(&path);
            }
        }
        state.write_steps.entry(path).or_default().push(step);
    }

    async fn run_terminal(&mut self, call: &ToolCallRequest) {
        let Some(command) = call.str_arg("command") else {
            let step = self.begin_step(StepType::Terminal, call.name.clone());
            self.finish_step(step, Err("Missing 'command' argument".into()));
            return;
        };
        let step = self.begin_step(StepType::Terminal, command.to_string());

        if let CommandCheck::NeedsApproval { reason } = self.policy.check(command) {
            let Some(approval) = self.approval.clone() else {
                self.finish_step(step, Err(format!("Command needs approval: {reason}")));
                return;
            };
            let request = format!("{command} ({reason})");
            if !approval.request(&self.task.id, request).await {
                self.finish_step(step, Err(format!("Command not approved: {reason}")));
                return;
            }
        }

        let result = self.execute_tool(call).await;
        self.finish_step(step, result);
    }

    async fn run_tool(&mut self, step_type: StepType, call: &ToolCallRequest) {
        let step = self.begin_step(step_type, describe(call));
        let result = self.execute_tool(call).await;
        self.finish_step(step, result);
    }

    async fn execute_tool(&self, call: &ToolCallRequest) -> Result<String, String> {
        match self.tools.execute(call).await {
            Ok(result) if result.success => Ok(result.output),
            Ok(result) => Err(result.output),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn finish_turn(&mut self, http_status: u16, mut state: TurnState) -> TurnReport {
        let staged = std::mem::take(&mut state.edits);
        let mut final_edits = self.guard.merge_files(&[], &staged, false);
        for rejection in &final_edits.rejected {
            state
                .withheld
                .insert(PathBuf::from(rejection.path()), rejection.to_string());
        }
        let proposed = final_edits.edits.len();

        if !(200..300).contains(&http_status) {
            for edit in final_edits.edits.drain(..) {
                state.withheld.insert(
                    edit.path.clone(),
                    format!(
                        "{}: model response failed with HTTP status {http_status}",
                        edit.display_path()
                    ),
                );
            }
        }

        let mut applied = 0;
        if !final_edits.edits.is_empty() {
            let outcome = self
                .pipeline
                .run(final_edits.edits, self.config.default_intent, self.progress.as_ref())
                .await;
            applied = outcome.applied().count();
            for result in &outcome.results {
                let steps = state
                    .write_steps
                    .get(&result.edit.path)
                    .cloned()
                    .unwrap_or_default();
                let verdict = match &result.verdict {
                    EditVerdict::Applied => Ok(format!(
                        "wrote {} (+{} -{})",
                        result.edit.display_path(),
                        result.edit.added_lines,
                        result.edit.removed_lines
                    )),
                    EditVerdict::Rejected { reason }
                    | EditVerdict::Withheld { reason }
                    | EditVerdict::Failed { reason } => Err(reason.clone()),
                };
                for step in steps {
                    self.finish_step(step, verdict.clone());
                }
            }
            state.validation_errors.extend(outcome.errors());
            for issue in &outcome.lint_issues {
                debug!(path = %issue.path.display(), message = %issue.message, "Lint issue");
            }
        }

        // Writes whose content never made it past the guard
        let write_steps = std::mem::take(&mut state.write_steps);
        for (path, steps) in &write_steps {
            let open: Vec<usize> = steps
                .iter()
                .copied()
                .filter(|&i| !self.task.steps[i].status.is_terminal())
                .collect();
            if open.is_empty() {
                continue;
            }
            let reason = state.withheld.get(path).cloned().unwrap_or_else(|| {
                format!("{}: edit never completed", path.display())
            });
            state.validation_errors.push(reason.clone());
            for step in open {
                self.finish_step(step, Err(reason.clone()));
            }
        }
        let parsed_files = write_steps.len();
        state.write_steps = write_steps;

        let Some(done) = state.done.take() else {
            return self.report(&state, applied, None);
        };

        let input = CompletionInput {
            http_status,
            body_len: state.body_len,
            parsed_files,
            proposed_edits: proposed,
            validation_errors: state.validation_errors.clone(),
            explicit_no_op: done.no_changes,
        };
        let verdict = self.gate.evaluate(&input);
        if verdict.can_complete {
            self.finish_step(done.step, Ok(verdict.reason.clone()));
            self.complete_task(verdict.reason.clone());
        } else {
            warn!(task_id = %self.task.id, reason = %verdict.reason, "Completion gate rejected task");
            self.finish_step(done.step, Err(verdict.reason.clone()));
            if self.config.fail_on_gate_rejection {
                self.fail_task(verdict.reason.clone());
            }
        }
        self.report(&state, applied, Some(verdict))
    }

    fn report(
        &self,
        state: &TurnState,
        applied: usize,
        gate: Option<CompletionGateResult>,
    ) -> TurnReport {
        let reason = match (&self.task.reason, &gate) {
            (Some(reason), _) if self.task.status.is_terminal() => reason.clone(),
            (_, Some(gate)) => gate.reason.clone(),
            _ => "waiting for the model to signal completion".to_string(),
        };
        TurnReport {
            status: self.task.status,
            reason,
            narration: state.narration.clone(),
            applied,
            gate,
        }
    }

    fn begin_step(&mut self, step_type: StepType, description: impl Into<String>) -> usize {
        let mut step = AgentStep::new(step_type, description);
        if let Err(e) = step.start() {
            warn!(error = %e, "Step could not start");
        }
        self.event_bus.publish(DomainEvent::StepStarted {
            task_id: self.task.id.to_string(),
            step_id: step.id.clone(),
            step_type,
            description: step.description.clone(),
            timestamp: step.timestamp,
        });
        self.task.push_step(step)
    }

    fn finish_step(&mut self, index: usize, result: Result<String, String>) {
        let task_id = self.task.id.to_string();
        let Some(step) = self.task.step_mut(index) else {
            return;
        };
        let started = step.timestamp;
        let transition = match result {
            Ok(output) => step.complete(output),
            Err(error) => {
                debug!(task_id = %task_id, step = %step.description, %error, "Step failed");
                step.fail(error)
            }
        };
        if let Err(e) = transition {
            warn!(task_id = %task_id, error = %e, "Step already finished");
            return;
        }
        self.event_bus.publish(DomainEvent::StepFinished {
            task_id,
            step_id: step.id.clone(),
            status: step.status,
            duration_ms: (Utc::now() - started).num_milliseconds().max(0) as u64,
            timestamp: Utc::now(),
        });
    }

    fn drop_call(&self, reason: String) {
        warn!(task_id = %self.task.id, %reason, "Tool call dropped");
        self.event_bus.publish(DomainEvent::CallDropped {
            task_id: self.task.id.to_string(),
            reason,
        });
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn complete_task(&mut self, reason: String) {
        if self.task.complete(reason.clone()).is_ok() {
            self.publish_finished(reason);
        }
    }

    fn fail_task(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if let Ok(aborted) = self.task.fail(reason.clone()) {
            self.publish_aborted(aborted);
            self.publish_finished(reason);
        }
    }

    fn cancel_task(&mut self, reason: &str) {
        if let Ok(aborted) = self.task.cancel(reason) {
            self.publish_aborted(aborted);
            self.publish_finished(reason.to_string());
        }
    }

    fn publish_aborted(&self, aborted: Vec<AbortedStep>) {
        let now = Utc::now();
        for step in aborted {
            self.event_bus.publish(DomainEvent::StepFinished {
                task_id: self.task.id.to_string(),
                step_id: step.step_id,
                status: StepStatus::Failed,
                duration_ms: (now - step.started).num_milliseconds().max(0) as u64,
                timestamp: now,
            });
        }
    }

    fn publish_finished(&self, reason: String) {
        info!(task_id = %self.task.id, status = %self.task.status, %reason, "Task finished");
        self.event_bus.publish(DomainEvent::TaskFinished {
            task_id: self.task.id.to_string(),
            status: self.task.status,
            reason,
            timestamp: Utc::now(),
        });
    }
}

fn describe(call: &ToolCallRequest) -> String {
    let arg = ["path", "query", "command"]
        .iter()
        .find_map(|key| call.str_arg(key));
    match arg {
        Some(arg) => format!("{} {arg}", call.name),
        None => call.name.clone(),
    }
}

/// Resolves once cancellation is requested; never without a receiver.
async fn cancelled(cancel: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        let requested = rx.wait_for(|c| *c).await.is_ok();
        if requested {
            return;
        }
    }
    std::future::pending::<()>().await
}
