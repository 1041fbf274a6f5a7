//! End-to-end tests for patchwright.
//!
//! These exercise the crates together the way the CLI wires them: plans
//! become edits, edits go through the pipeline, and recorded model streams
//! drive a full task loop against a real directory.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use patchwright_agent::{
    ActionExecutor, ApprovalGate, EditPipeline, EditVerdict, ScriptedModel, TaskLoop,
    TaskSupervisor,
};
use patchwright_config::{AppConfig, SafetyConfig, ShadowConfig};
use patchwright_core::edit::{IntentCategory, ProposedEdit};
use patchwright_core::error::ProcessError;
use patchwright_core::event::{DomainEvent, EventBus};
use patchwright_core::plan::{Operation, PlanningContext, Scope};
use patchwright_core::process::{
    CommandOutput, CommandSpec, ExecutorFactory, OutputLine, ProcessExecutor,
};
use patchwright_core::task::{AgentTask, StepStatus, StepType, TaskId, TaskStatus};
use patchwright_core::tool::ToolCallRequest;
use patchwright_parser::{StreamParser, encode_frame};
use patchwright_planner::{EditGenerator, PlanBuilder, WorkspaceScanner};
use patchwright_safety::{DiffClassifier, RobustnessGuard};
use patchwright_security::CommandPolicy;
use patchwright_shadow::ShadowVerifier;
use patchwright_tools::default_registry;
use tokio::sync::mpsc;

// ── Mock Build ──────────────────────────────────────────────────────────

/// Stands in for the real build command and counts how often it ran.
struct MockBuild {
    exit_code: i32,
    output: &'static str,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessExecutor for MockBuild {
    async fn execute(
        &self,
        _spec: CommandSpec,
        _lines: Option<mpsc::UnboundedSender<OutputLine>>,
    ) -> Result<CommandOutput, ProcessError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(CommandOutput {
            exit_code: Some(self.exit_code),
            stdout: String::new(),
            stderr: self.output.into(),
            combined: self.output.into(),
        })
    }

    fn execute_sync(&self, _spec: CommandSpec) -> Result<CommandOutput, ProcessError> {
        unreachable!("builds run async")
    }
}

fn mock_builds(exit_code: i32, output: &'static str) -> (ExecutorFactory, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let factory: ExecutorFactory = Arc::new(move || {
        Arc::new(MockBuild {
            exit_code,
            output,
            runs: counter.clone(),
        }) as Arc<dyn ProcessExecutor>
    });
    (factory, runs)
}

fn shadow_config() -> ShadowConfig {
    ShadowConfig {
        prefer_clone: false,
        ..Default::default()
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn read(root: &Path, relative: &str) -> String {
    std::fs::read_to_string(root.join(relative)).unwrap()
}

fn frame(id: &str, name: &str, input: serde_json::Value) -> String {
    let serde_json::Value::Object(input) = input else {
        panic!("object expected");
    };
    format!("TOOL_CALL:{}\n", encode_frame(&ToolCallRequest::new(id, name, input)))
}

fn pipeline(
    root: &Path,
    verifier: Option<ExecutorFactory>,
    event_bus: Arc<EventBus>,
) -> EditPipeline {
    let executor = ActionExecutor::new(root, vec![".git".into()]).with_event_bus(event_bus.clone());
    let mut pipeline = EditPipeline::new(DiffClassifier::new(SafetyConfig::default()), executor)
        .with_event_bus(event_bus.clone());
    if let Some(factory) = verifier {
        pipeline = pipeline.with_verifier(Arc::new(
            ShadowVerifier::new(shadow_config(), factory).with_event_bus(event_bus),
        ));
    }
    pipeline
}

fn task_loop(root: &Path, pipeline: EditPipeline, event_bus: Arc<EventBus>) -> TaskLoop {
    let config = AppConfig::default();
    TaskLoop::new(
        AgentTask::new("e2e task", root),
        Arc::new(default_registry(root, &config)),
        Arc::new(pipeline),
        event_bus,
    )
    .with_guard(RobustnessGuard::new(config.guard.clone()))
    .with_policy(CommandPolicy::from_config(&config.autonomy))
    .with_config(config.agent.clone())
}

fn three_file_project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.swift", "func helper() {}\n");
    write(dir.path(), "b.swift", "func oldFunc() {}\nlet x = oldFunc()\n");
    write(dir.path(), "c.swift", "let y = 1\n");
    dir
}

// ── Deterministic Plans ─────────────────────────────────────────────────

#[tokio::test]
async fn e2e_rename_plan_targets_only_matching_file() {
    let dir = three_file_project();
    let scanner = WorkspaceScanner::default();
    let ctx = PlanningContext {
        all_files: scanner.list_files(dir.path()),
        ..Default::default()
    };

    let plan = PlanBuilder::default().build("rename oldFunc to newFunc", &ctx);
    assert_eq!(plan.operation, Operation::Rename);
    assert_eq!(plan.scope, Scope::EntireProject);

    let matches = scanner.scan_for_matches("oldFunc", dir.path(), false);
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].path, Path::new("b.swift"));
    assert_eq!(matches[0].occurrences, 2);

    let generated = EditGenerator::new(scanner)
        .generate_replacement_edits(&plan, dir.path())
        .unwrap();
    assert_eq!(generated.edits.len(), 1);
    assert_eq!(generated.edits[0].occurrences, 2);
    assert_eq!(
        generated.edits[0].edit.content,
        "func newFunc() {}\nlet x = newFunc()\n"
    );
}

#[tokio::test]
async fn e2e_rename_plan_applies_through_pipeline() {
    let dir = three_file_project();
    let plan = PlanBuilder::default().build("rename oldFunc to newFunc", &PlanningContext::default());
    let generated = EditGenerator::default()
        .generate_replacement_edits(&plan, dir.path())
        .unwrap();

    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let outcome = pipeline(dir.path(), None, bus)
        .run(generated.proposed(), IntentCategory::TextReplacement, None)
        .await;

    assert!(outcome.errors().is_empty(), "{:?}", outcome.errors());
    assert_eq!(read(dir.path(), "b.swift"), "func newFunc() {}\nlet x = newFunc()\n");
    assert_eq!(read(dir.path(), "a.swift"), "func helper() {}\n");
    assert_eq!(read(dir.path(), "c.swift"), "let y = 1\n");

    match events.recv().await.unwrap().as_ref() {
        DomainEvent::EditApplied { path, .. } => assert!(path.ends_with("b.swift")),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn e2e_current_file_plan_leaves_other_files_alone() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.rs", "let foo = 1;\n");
    write(dir.path(), "b.rs", "let foo = 2;\n");

    let ctx = PlanningContext {
        current_file: Some("a.rs".into()),
        current_file_only: true,
        ..Default::default()
    };
    let plan = PlanBuilder::default().build("replace foo with bar", &ctx);
    assert_eq!(plan.scope, Scope::CurrentFile);

    let generated = EditGenerator::default()
        .generate_replacement_edits(&plan, dir.path())
        .unwrap();
    let outcome = pipeline(dir.path(), None, Arc::new(EventBus::default()))
        .run(generated.proposed(), IntentCategory::TextReplacement, None)
        .await;

    assert_eq!(outcome.applied().count(), 1);
    assert_eq!(read(dir.path(), "a.rs"), "let bar = 1;\n");
    assert_eq!(read(dir.path(), "b.rs"), "let foo = 2;\n");
}

// ── Safety Classifier ───────────────────────────────────────────────────

#[tokio::test]
async fn e2e_large_deletion_is_rejected_before_disk() {
    let dir = tempfile::tempdir().unwrap();
    let original: String = (1..=100).map(|i| format!("line {i}\n")).collect();
    let shrunk: String = (1..=60).map(|i| format!("line {i}\n")).collect();
    write(dir.path(), "notes.txt", &original);

    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let outcome = pipeline(dir.path(), None, bus)
        .run(
            vec![ProposedEdit::complete("notes.txt", "", shrunk)],
            IntentCategory::TextReplacement,
            None,
        )
        .await;

    match &outcome.results[0].verdict {
        EditVerdict::Rejected { reason } => {
            assert!(reason.contains("40%"), "{reason}");
            assert!(reason.contains("30%"), "{reason}");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(read(dir.path(), "notes.txt"), original);
    assert!(matches!(
        events.recv().await.unwrap().as_ref(),
        DomainEvent::EditRejected { .. }
    ));
}

// ── Shadow Verification ─────────────────────────────────────────────────

#[tokio::test]
async fn e2e_project_without_manifest_verifies_without_building() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "README.md", "# notes\n");
    let (factory, runs) = mock_builds(0, "");

    let report = ShadowVerifier::new(shadow_config(), factory)
        .verify(
            &[ProposedEdit::complete("README.md", "", "# new notes\n")],
            dir.path(),
        )
        .await
        .unwrap();

    assert!(report.passed);
    assert_eq!(report.message, "no build system detected");
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(read(dir.path(), "README.md"), "# notes\n");
}

#[tokio::test]
async fn e2e_failing_shadow_build_withholds_edits() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "Makefile", "all:\n\tcc main.c\n");
    write(dir.path(), "main.c", "int main(void) { return 0; }\n");
    let (factory, runs) = mock_builds(2, "main.c:1: error: expected ';'");

    let outcome = pipeline(dir.path(), Some(factory), Arc::new(EventBus::default()))
        .run(
            vec![ProposedEdit::complete("main.c", "", "int main(void) { return 1 }\n")],
            IntentCategory::BoundedEdit,
            None,
        )
        .await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!outcome.verification.as_ref().unwrap().passed);
    match &outcome.results[0].verdict {
        EditVerdict::Withheld { reason } => assert!(reason.contains("expected ';'"), "{reason}"),
        other => panic!("expected withheld edit, got {other:?}"),
    }
    assert_eq!(read(dir.path(), "main.c"), "int main(void) { return 0; }\n");
}

// ── Stream Parsing ──────────────────────────────────────────────────────

#[test]
fn e2e_split_frame_yields_one_call_after_terminator() {
    // {"p":"a.txt"} split inside its base64 payload
    let mut parser = StreamParser::new();
    let first = parser.feed("TOOL_CALL:42:write_file:eyJ");
    assert!(first.calls.is_empty());
    assert!(first.errors.is_empty());

    let second = parser.feed("wIjoiYS50eHQifQ==\n");
    assert_eq!(second.calls.len(), 1);
    assert_eq!(second.calls[0].id, "42");
    assert_eq!(second.calls[0].name, "write_file");
    assert_eq!(second.calls[0].str_arg("p"), Some("a.txt"));
    assert!(parser.flush().is_empty());
}

// ── Task Loop ───────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_task_reads_writes_verifies_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "Makefile", "all:\n\tcc main.c\n");
    write(dir.path(), "main.c", "int main(void) {\n    return 0;\n}\n");
    let (factory, runs) = mock_builds(0, "");
    let bus = Arc::new(EventBus::default());

    let new_main = "int main(void) {\n    return 1;\n}\n";
    let mut model = ScriptedModel::single([
        "Let me look at the entry point.\n".to_string(),
        frame("1", "read_file", serde_json::json!({"path": "main.c"})),
        "Changing the exit code.\n".to_string(),
        frame("2", "write_file", serde_json::json!({"path": "main.c", "content": new_main})),
        frame("3", "done", serde_json::json!({})),
    ]);

    let task = task_loop(dir.path(), pipeline(dir.path(), Some(factory), bus.clone()), bus)
        .run(&mut model)
        .await;

    assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.reason);
    assert_eq!(read(dir.path(), "main.c"), new_main);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let types: Vec<StepType> = task.steps.iter().map(|s| s.step_type).collect();
    assert_eq!(types, vec![StepType::FileRead, StepType::FileWrite, StepType::Done]);
    assert!(task.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert!(task.steps[0].output.as_deref().unwrap().contains("return 0;"));
}

#[tokio::test]
async fn e2e_task_fails_when_build_breaks() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "Makefile", "all:\n\tcc main.c\n");
    write(dir.path(), "main.c", "int main(void) {\n    return 0;\n}\n");
    let (factory, _) = mock_builds(1, "main.c:2: error: expected ';'");
    let bus = Arc::new(EventBus::default());

    let mut model = ScriptedModel::single([
        frame(
            "1",
            "write_file",
            serde_json::json!({"path": "main.c", "content": "int main(void) {\n    return 1\n}\n"}),
        ),
        frame("2", "done", serde_json::json!({})),
    ]);

    let task = task_loop(dir.path(), pipeline(dir.path(), Some(factory), bus.clone()), bus)
        .run(&mut model)
        .await;

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.reason.as_deref().unwrap().contains("validation error"));
    assert_eq!(read(dir.path(), "main.c"), "int main(void) {\n    return 0;\n}\n");
}

#[tokio::test]
async fn e2e_fragmented_stream_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "lib.rs", "pub fn answer() -> u32 {\n    41\n}\n");
    let bus = Arc::new(EventBus::default());

    let content = "pub fn answer() -> u32 {\n    42\n}\n";
    let stream = format!(
        "Fixing the answer.\n{}{}",
        frame("w", "write_file", serde_json::json!({"path": "lib.rs", "content": content})),
        frame("d", "done", serde_json::json!({}))
    );
    // Deliver the whole response a few bytes at a time
    let fragments: Vec<String> = stream
        .as_bytes()
        .chunks(7)
        .map(|c| String::from_utf8(c.to_vec()).unwrap())
        .collect();
    let mut model = ScriptedModel::single(fragments);

    let task = task_loop(dir.path(), pipeline(dir.path(), None, bus.clone()), bus)
        .run(&mut model)
        .await;

    assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.reason);
    assert_eq!(read(dir.path(), "lib.rs"), content);
}

#[tokio::test]
async fn e2e_silent_model_cannot_complete_without_no_op_signal() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(EventBus::default());

    let mut model = ScriptedModel::single([
        "Looks fine to me.\n".to_string(),
        frame("1", "done", serde_json::json!({})),
    ]);
    let task = task_loop(dir.path(), pipeline(dir.path(), None, bus.clone()), bus.clone())
        .run(&mut model)
        .await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.reason.as_deref().unwrap().contains("explicitly"));

    let mut model = ScriptedModel::single([
        "Nothing needs to change.\n".to_string(),
        frame("1", "done", serde_json::json!({"no_changes": true})),
    ]);
    let task = task_loop(dir.path(), pipeline(dir.path(), None, bus.clone()), bus)
        .run(&mut model)
        .await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.reason.as_deref(), Some("Completed with no changes"));
}

#[tokio::test]
async fn e2e_unlisted_command_waits_for_approval() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(EventBus::default());
    let approval = Arc::new(ApprovalGate::new().with_event_bus(bus.clone()));
    let mut events = bus.subscribe();

    // Deny whatever is asked
    let approver = {
        let approval = approval.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let DomainEvent::ApprovalRequested { task_id, .. } = event.as_ref() {
                    approval.resolve(&TaskId(task_id.clone()), false);
                    return true;
                }
            }
            false
        })
    };

    let mut model = ScriptedModel::single([
        frame("1", "run_terminal_cmd", serde_json::json!({"command": "rm -rf build"})),
        frame("2", "done", serde_json::json!({"no_changes": true})),
    ]);
    let task = task_loop(dir.path(), pipeline(dir.path(), None, bus.clone()), bus)
        .with_approval(approval)
        .run(&mut model)
        .await;

    assert!(approver.await.unwrap());
    assert_eq!(task.steps[0].step_type, StepType::Terminal);
    assert_eq!(task.steps[0].status, StepStatus::Failed);
    assert!(task.steps[0].error.as_deref().unwrap().contains("not approved"));
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn e2e_supervised_tasks_share_nothing() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    write(first.path(), "a.txt", "alpha version one\n");
    write(second.path(), "a.txt", "beta version one\n");

    let supervisor = TaskSupervisor::new();
    let mut ids = Vec::new();
    for (dir, content) in [
        (&first, "alpha version two\n"),
        (&second, "beta version two\n"),
    ] {
        let bus = Arc::new(EventBus::default());
        let model = ScriptedModel::single([
            frame("1", "write_file", serde_json::json!({"path": "a.txt", "content": content})),
            frame("2", "done", serde_json::json!({})),
        ]);
        let task_loop = task_loop(dir.path(), pipeline(dir.path(), None, bus.clone()), bus);
        ids.push(supervisor.spawn(task_loop, Box::new(model)));
    }

    for id in &ids {
        let task = supervisor.wait(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.reason);
    }
    assert_eq!(read(first.path(), "a.txt"), "alpha version two\n");
    assert_eq!(read(second.path(), "a.txt"), "beta version two\n");
    assert!(supervisor.active().is_empty());
}
