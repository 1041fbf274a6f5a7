//! `patchwright run`: replay a recorded model transcript through a task loop.
//!
//! The transcript is a JSON array of turns, each `{ "status", "fragments" }`.
//! Terminal commands outside the allowlist ask for approval; `--yes`
//! approves them, otherwise they are denied.

use super::{CmdResult, build_pipeline, project_root, spawn_progress_printer};
use clap::Args;
use patchwright_agent::{ApprovalGate, ScriptedModel, TaskLoop, TaskSupervisor};
use patchwright_config::AppConfig;
use patchwright_core::event::{DomainEvent, EventBus};
use patchwright_core::task::{AgentTask, StepStatus, TaskId, TaskStatus};
use patchwright_safety::RobustnessGuard;
use patchwright_security::CommandPolicy;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Project root
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Recorded model transcript (JSON)
    #[arg(long)]
    pub transcript: PathBuf,

    /// Task description
    #[arg(long, default_value = "Replay recorded transcript")]
    pub description: String,

    /// Approve every command that asks for approval
    #[arg(short, long)]
    pub yes: bool,

    /// Skip the shadow build
    #[arg(long)]
    pub no_verify: bool,

    /// Print the finished task as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: RunArgs, config: AppConfig) -> CmdResult {
    let root = project_root(&args.root)?;
    let transcript = std::fs::read_to_string(&args.transcript)
        .map_err(|e| format!("cannot read {}: {e}", args.transcript.display()))?;
    let model = ScriptedModel::from_json(&transcript)
        .map_err(|e| format!("invalid transcript {}: {e}", args.transcript.display()))?;

    let event_bus = Arc::new(EventBus::default());
    let approval = Arc::new(ApprovalGate::new().with_event_bus(event_bus.clone()));
    let printer = spawn_event_printer(&event_bus, approval.clone(), args.yes);
    let (progress, progress_printer) = spawn_progress_printer();

    let tools = Arc::new(patchwright_tools::default_registry(&root, &config));
    let pipeline = Arc::new(build_pipeline(
        &root,
        &config,
        !args.no_verify,
        event_bus.clone(),
    ));
    let task_loop = TaskLoop::new(
        AgentTask::new(args.description, &root),
        tools,
        pipeline,
        event_bus.clone(),
    )
    .with_guard(RobustnessGuard::new(config.guard.clone()))
    .with_policy(CommandPolicy::from_config(&config.autonomy))
    .with_approval(approval)
    .with_config(config.agent.clone())
    .with_progress(progress);

    let supervisor = TaskSupervisor::new();
    let id = supervisor.spawn(task_loop, Box::new(model));

    let interrupt = {
        let supervisor = supervisor.clone();
        let id = id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\n⚠️  Interrupted, cancelling task");
                supervisor.cancel(&id);
            }
        })
    };
    let task = supervisor.wait(&id).await;
    interrupt.abort();
    let task = task.ok_or("task loop aborted")?;

    let _ = progress_printer.await;
    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        warn!("Event printer did not see the task finish");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        print_summary(&task);
    }

    match task.status {
        TaskStatus::Completed => Ok(()),
        status => Err(format!(
            "task {status}: {}",
            task.reason.as_deref().unwrap_or("no reason given")
        )
        .into()),
    }
}

/// Mirror loop events on stdout and answer approval requests. Ends with the
/// task.
fn spawn_event_printer(
    event_bus: &Arc<EventBus>,
    approval: Arc<ApprovalGate>,
    approve: bool,
) -> tokio::task::JoinHandle<()> {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Event printer lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match event.as_ref() {
                DomainEvent::Narration { text, .. } => print!("{text}"),
                DomainEvent::StepStarted {
                    step_type,
                    description,
                    ..
                } => println!("\n→ [{step_type:?}] {description}"),
                DomainEvent::StepFinished {
                    status,
                    duration_ms,
                    ..
                } => {
                    let mark = if *status == StepStatus::Completed { "✅" } else { "❌" };
                    println!("  {mark} {status} ({duration_ms}ms)");
                }
                DomainEvent::CallDropped { reason, .. } => {
                    println!("\n⚠️  Dropped tool call: {reason}")
                }
                DomainEvent::EditRejected { path, reason, .. } => {
                    println!("  ⚠️  {path} rejected: {reason}")
                }
                DomainEvent::VerificationFinished {
                    passed, duration_ms, ..
                } => {
                    let mark = if *passed { "✅" } else { "❌" };
                    println!("  {mark} Shadow build ({duration_ms}ms)");
                }
                DomainEvent::ApprovalRequested {
                    task_id,
                    description,
                    ..
                } => {
                    let verdict = if approve { "approved" } else { "denied (pass --yes to allow)" };
                    println!("  ❓ Approval for '{description}': {verdict}");
                    approval.resolve(&TaskId(task_id.clone()), approve);
                }
                DomainEvent::TaskFinished { .. } => break,
                DomainEvent::TaskStarted { .. } | DomainEvent::EditApplied { .. } => {}
            }
        }
    })
}

fn print_summary(task: &AgentTask) {
    println!();
    println!("Task {} {}", task.id, task.status);
    if let Some(reason) = &task.reason {
        println!("  {reason}");
    }
    for step in &task.steps {
        let detail = step.error.as_deref().or(step.output.as_deref()).unwrap_or("");
        let detail = detail.lines().next().unwrap_or_default();
        println!(
            "  {:<10} {:<9} {}  {}",
            format!("{:?}", step.step_type),
            step.status.to_string(),
            step.description,
            detail
        );
    }
}
