//! CLI subcommands and the wiring they share.

pub mod config_cmd;
pub mod plan;
pub mod run;
pub mod verify;

use patchwright_agent::{ActionExecutor, ApplyProgress, EditPipeline, EditVerdict, PipelineOutcome};
use patchwright_config::AppConfig;
use patchwright_core::event::EventBus;
use patchwright_safety::DiffClassifier;
use patchwright_shadow::ShadowVerifier;
use patchwright_tools::ShellExecutor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

pub type CmdResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Load the config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> CmdResult<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    Ok(config)
}

/// Canonical project root, so every crate sees the same path.
pub fn project_root(root: &Path) -> CmdResult<PathBuf> {
    std::fs::canonicalize(root)
        .map_err(|e| format!("cannot open project root {}: {e}", root.display()).into())
}

/// Classifier, optional shadow verifier and executor for `root`.
pub fn build_pipeline(
    root: &Path,
    config: &AppConfig,
    verify: bool,
    event_bus: Arc<EventBus>,
) -> EditPipeline {
    let executor = ActionExecutor::new(root, config.autonomy.forbidden_paths.clone())
        .with_event_bus(event_bus.clone());
    let mut pipeline = EditPipeline::new(DiffClassifier::new(config.safety.clone()), executor)
        .with_event_bus(event_bus.clone());

    if verify && config.shadow.enabled {
        let verifier = ShadowVerifier::new(config.shadow.clone(), ShellExecutor::factory())
            .with_event_bus(event_bus);
        pipeline = pipeline.with_verifier(Arc::new(verifier));
    }
    pipeline
}

/// Print apply progress as it arrives. Returns when the sender is dropped.
pub fn spawn_progress_printer() -> (
    mpsc::UnboundedSender<ApplyProgress>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            match progress {
                ApplyProgress::Started { total } => println!("  Applying {total} edit(s)"),
                ApplyProgress::Written { path, index, total } => {
                    println!("  [{}/{total}] {}", index + 1, path.display())
                }
                ApplyProgress::Failed { path, reason } => {
                    println!("  ❌ {}: {reason}", path.display())
                }
                ApplyProgress::Finished { applied, failed } => {
                    println!("  Done: {applied} written, {failed} failed")
                }
            }
        }
    });
    (tx, handle)
}

/// Print one line per edit verdict plus the verification summary.
pub fn print_outcome(outcome: &PipelineOutcome) {
    if let Some(report) = &outcome.verification {
        let build = report.build_system.as_deref().unwrap_or("none");
        let mark = if report.passed { "✅" } else { "❌" };
        println!(
            "{mark} Shadow build ({build}, {:.1}s): {}",
            report.duration.as_secs_f64(),
            first_line(&report.message)
        );
    }

    for result in &outcome.results {
        let path = result.edit.display_path();
        match &result.verdict {
            EditVerdict::Applied => println!(
                "  ✅ {path} (+{} -{})",
                result.edit.added_lines, result.edit.removed_lines
            ),
            EditVerdict::Rejected { reason } => println!("  ⚠️  {path} rejected: {reason}"),
            EditVerdict::Withheld { reason } => {
                println!("  ⚠️  {path} withheld: {}", first_line(reason))
            }
            EditVerdict::Failed { reason } => println!("  ❌ {path} failed: {reason}"),
        }
    }

    for issue in &outcome.lint_issues {
        match issue.line {
            Some(line) => println!("  lint {}:{line} {}", issue.path.display(), issue.message),
            None => println!("  lint {} {}", issue.path.display(), issue.message),
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
