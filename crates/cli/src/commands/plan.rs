//! `patchwright plan`: deterministic edits without a model.
//!
//! Builds an execution plan from a literal instruction, generates the
//! edits it implies and, with `--apply`, sends them through the edit
//! pipeline.

use super::{CmdResult, build_pipeline, print_outcome, project_root, spawn_progress_printer};
use clap::Args;
use patchwright_config::AppConfig;
use patchwright_core::edit::IntentCategory;
use patchwright_core::event::EventBus;
use patchwright_core::plan::{ExecutionPlan, PlanningContext};
use patchwright_planner::{EditGenerator, PlanBuilder, WorkspaceScanner};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// The instruction, e.g. "replace foo with bar"
    pub instruction: String,

    /// Project root
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// The file open in the editor, relative to the root
    #[arg(long)]
    pub current_file: Option<PathBuf>,

    /// The selected text in the current file
    #[arg(long)]
    pub selection: Option<String>,

    /// Restrict the plan to the current file
    #[arg(long)]
    pub current_only: bool,

    /// Write the edits after they pass the safety checks
    #[arg(long)]
    pub apply: bool,

    /// Skip the shadow build
    #[arg(long)]
    pub no_verify: bool,

    /// Confirm plans that need confirmation (deletions, whole-project edits)
    #[arg(short, long)]
    pub yes: bool,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: PlanArgs, config: &AppConfig) -> CmdResult {
    let root = project_root(&args.root)?;
    let scanner = WorkspaceScanner::new(config.scanner.clone());

    let ctx = PlanningContext {
        selection: args.selection.clone(),
        current_file: args.current_file.clone(),
        all_files: scanner.list_files(&root),
        current_file_only: args.current_only,
    };
    let plan = PlanBuilder::new(config.planner.clone()).build(&args.instruction, &ctx);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print_plan(&plan, &root);
    }

    if plan.needs_model() {
        println!("No literal target in the instruction; this needs a model.");
        return Ok(());
    }

    let generator = EditGenerator::new(scanner);
    let generated = generator.generate_replacement_edits(&plan, &root)?;
    if generated.edits.is_empty() {
        println!("No matches for '{}'.", generated.pattern);
        return Ok(());
    }

    println!("{}", generated.summarize());
    for edit in &generated.edits {
        println!(
            "  {} ({} occurrence(s), +{} -{})",
            edit.edit.display_path(),
            edit.occurrences,
            edit.edit.added_lines,
            edit.edit.removed_lines
        );
    }

    if !args.apply {
        println!("Dry run. Pass --apply to write these edits.");
        return Ok(());
    }
    if plan.constraints.require_confirmation && !args.yes {
        return Err(format!(
            "'{}' needs confirmation; re-run with --yes to apply",
            plan.description
        )
        .into());
    }

    let pipeline = build_pipeline(&root, config, !args.no_verify, Arc::new(EventBus::default()));
    let (progress, printer) = spawn_progress_printer();
    let outcome = pipeline
        .run(
            generated.proposed(),
            IntentCategory::TextReplacement,
            Some(&progress),
        )
        .await;
    drop(progress);
    let _ = printer.await;

    print_outcome(&outcome);
    let errors = outcome.errors();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!("{} edit(s) not applied", errors.len()).into())
    }
}

fn print_plan(plan: &ExecutionPlan, root: &Path) {
    println!("🔍 {}", plan.description);
    println!("  Operation: {}", plan.operation);
    println!("  Scope:     {}", plan.scope);
    if let Some(target) = plan.primary_target() {
        println!(
            "  Target:    '{}'{}{}",
            target.pattern,
            if target.case_sensitive { " (case-sensitive)" } else { "" },
            if target.whole_word { " (whole word)" } else { "" }
        );
    }
    if let Some(replacement) = &plan.replacement {
        println!("  With:      '{replacement}'");
    }
    for file in &plan.files {
        println!("  File:      {}", root.join(file).display());
    }
    println!(
        "  Limits:    {} file(s), {} line(s){}",
        plan.constraints.max_files,
        plan.constraints.max_lines,
        if plan.constraints.require_confirmation {
            ", needs confirmation"
        } else {
            ""
        }
    );
}
