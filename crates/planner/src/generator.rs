//! Ready-to-apply edits for a deterministic plan.

use crate::scanner::{Matcher, WorkspaceScanner};
use patchwright_core::edit::ProposedEdit;
use patchwright_core::error::PlanError;
use patchwright_core::plan::{ExecutionPlan, FileMatch, Operation, Scope};
use std::path::{Path, PathBuf};
use tracing::info;

/// One generated edit and how many occurrences it rewrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedEdit {
    pub edit: ProposedEdit,
    pub occurrences: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedEdits {
    pub pattern: String,
    pub edits: Vec<GeneratedEdit>,
}

impl GeneratedEdits {
    pub fn total_occurrences(&self) -> usize {
        self.edits.iter().map(|e| e.occurrences).sum()
    }

    pub fn proposed(&self) -> Vec<ProposedEdit> {
        self.edits.iter().map(|e| e.edit.clone()).collect()
    }

    pub fn summarize(&self) -> String {
        format!(
            "Replaced {} occurrence(s) of '{}' in {} file(s)",
            self.total_occurrences(),
            self.pattern,
            self.edits.len()
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct EditGenerator {
    scanner: WorkspaceScanner,
}

impl EditGenerator {
    pub fn new(scanner: WorkspaceScanner) -> Self {
        Self { scanner }
    }

    pub fn scanner(&self) -> &WorkspaceScanner {
        &self.scanner
    }

    /// Rewrite every match the plan covers under `root`.
    ///
    /// Fails when the plan has no literal target, is an insert (no anchor
    /// to insert at), or would exceed its file or line limits.
    pub fn generate_replacement_edits(
        &self,
        plan: &ExecutionPlan,
        root: &Path,
    ) -> Result<GeneratedEdits, PlanError> {
        let target = plan.primary_target().ok_or(PlanError::NoTarget)?;
        let replacement = match plan.operation {
            Operation::Insert => return Err(PlanError::RequiresModel(plan.operation.to_string())),
            Operation::Delete => String::new(),
            Operation::Replace | Operation::Rename => {
                plan.replacement.clone().ok_or(PlanError::NoTarget)?
            }
        };
        let matcher = Matcher::new(target).ok_or(PlanError::NoTarget)?;

        let matches = match plan.scope {
            Scope::EntireProject => self.scanner.scan_target(target, root),
            Scope::SpecificFiles => self.scanner.scan_files(target, root, &plan.files),
            Scope::CurrentFile | Scope::SelectedText => {
                let current = current_file(plan)?;
                self.scanner.scan_files(target, root, &[current])
            }
        };

        if matches.len() > plan.constraints.max_files {
            return Err(PlanError::ConstraintExceeded(format!(
                "{} files match, limit is {}",
                matches.len(),
                plan.constraints.max_files
            )));
        }

        let mut edits = Vec::with_capacity(matches.len());
        for FileMatch { path, occurrences } in matches {
            let Some(original) = self.scanner.read_text(&root.join(&path)) else {
                continue;
            };
            let (content, occurrences) = match (plan.scope, plan.selection.as_deref()) {
                (Scope::SelectedText, Some(selection)) => {
                    match rewrite_in_selection(&original, selection, &matcher, &replacement) {
                        Some(rewritten) => rewritten,
                        None => continue,
                    }
                }
                _ => (matcher.replace_all(&original, &replacement), occurrences),
            };
            if content == original {
                continue;
            }
            edits.push(GeneratedEdit {
                edit: ProposedEdit::complete(path, &original, content),
                occurrences,
            });
        }

        let changed_lines: usize = edits
            .iter()
            .map(|e| e.edit.added_lines.max(e.edit.removed_lines))
            .sum();
        if changed_lines > plan.constraints.max_lines {
            return Err(PlanError::ConstraintExceeded(format!(
                "{changed_lines} lines change, limit is {}",
                plan.constraints.max_lines
            )));
        }

        let generated = GeneratedEdits {
            pattern: target.pattern.clone(),
            edits,
        };
        info!(
            plan = %plan.description,
            files = generated.edits.len(),
            occurrences = generated.total_occurrences(),
            "Generated deterministic edits"
        );
        Ok(generated)
    }
}

fn current_file(plan: &ExecutionPlan) -> Result<PathBuf, PlanError> {
    plan.files
        .first()
        .cloned()
        .ok_or_else(|| PlanError::MissingCurrentFile(plan.scope.to_string()))
}

/// Rewrite only inside the first occurrence of `selection` in `original`.
fn rewrite_in_selection(
    original: &str,
    selection: &str,
    matcher: &Matcher,
    replacement: &str,
) -> Option<(String, usize)> {
    let start = original.find(selection)?;
    let end = start + selection.len();
    let region = &original[start..end];
    let occurrences = matcher.count(region);
    if occurrences == 0 {
        return None;
    }
    let mut content = String::with_capacity(original.len());
    content.push_str(&original[..start]);
    content.push_str(&matcher.replace_all(region, replacement));
    content.push_str(&original[end..]);
    Some((content, occurrences))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PlanBuilder;
    use patchwright_config::PlannerConfig;
    use patchwright_core::plan::PlanningContext;
    use std::fs;

    fn project(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn rename_touches_only_matching_file() {
        let dir = project(&[
            ("a.swift", "func helper() {}\n"),
            ("b.swift", "func oldFunc() {}\nlet x = oldFunc()\n"),
            ("c.swift", "let y = 2\n"),
        ]);
        let plan = PlanBuilder::default().build("rename oldFunc to newFunc", &PlanningContext::default());
        assert_eq!(plan.operation, Operation::Rename);
        assert_eq!(plan.scope, Scope::EntireProject);

        let generator = EditGenerator::default();
        let matches = generator.scanner().scan_for_matches("oldFunc", dir.path(), false);
        assert_eq!(
            matches,
            vec![FileMatch {
                path: "b.swift".into(),
                occurrences: 2
            }]
        );

        let generated = generator.generate_replacement_edits(&plan, dir.path()).unwrap();
        assert_eq!(generated.edits.len(), 1);
        let edit = &generated.edits[0];
        assert_eq!(edit.edit.path, PathBuf::from("b.swift"));
        assert_eq!(edit.edit.content, "func newFunc() {}\nlet x = newFunc()\n");
        assert_eq!(edit.occurrences, 2);
        assert!(!edit.edit.is_streaming);
        assert_eq!(generated.summarize(), "Replaced 2 occurrence(s) of 'oldFunc' in 1 file(s)");
    }

    #[test]
    fn delete_removes_pattern() {
        let dir = project(&[("app.js", "console.log(x);\nrun();\n")]);
        let ctx = PlanningContext {
            current_file: Some("app.js".into()),
            current_file_only: true,
            ..Default::default()
        };
        let plan = PlanBuilder::default().build("delete 'console.log(x);'", &ctx);
        let generated = EditGenerator::default()
            .generate_replacement_edits(&plan, dir.path())
            .unwrap();
        assert_eq!(generated.edits[0].edit.content, "\nrun();\n");
    }

    #[test]
    fn insert_needs_model() {
        let dir = project(&[("a.rs", "fn a() {}\n")]);
        let plan = PlanBuilder::default().build("add a doc comment", &PlanningContext::default());
        let err = EditGenerator::default()
            .generate_replacement_edits(&plan, dir.path())
            .unwrap_err();
        assert_eq!(err, PlanError::RequiresModel("insert".into()));
    }

    #[test]
    fn empty_plan_has_no_target() {
        let dir = project(&[]);
        let plan = PlanBuilder::default().build("make it nicer", &PlanningContext::default());
        assert_eq!(
            EditGenerator::default().generate_replacement_edits(&plan, dir.path()),
            Err(PlanError::NoTarget)
        );
    }

    #[test]
    fn file_limit_is_enforced() {
        let dir = project(&[("a.txt", "foo"), ("b.txt", "foo"), ("c.txt", "foo")]);
        let plan = PlanBuilder::new(PlannerConfig {
            max_files: 2,
            max_lines: 100,
        })
        .build("change foo to bar", &PlanningContext::default());
        let err = EditGenerator::default()
            .generate_replacement_edits(&plan, dir.path())
            .unwrap_err();
        assert!(matches!(err, PlanError::ConstraintExceeded(_)));
    }

    #[test]
    fn line_limit_is_enforced() {
        let content = "foo\n".repeat(5);
        let dir = project(&[("a.txt", content.as_str())]);
        let plan = PlanBuilder::new(PlannerConfig {
            max_files: 10,
            max_lines: 3,
        })
        .build("change foo to bar", &PlanningContext::default());
        assert!(matches!(
            EditGenerator::default().generate_replacement_edits(&plan, dir.path()),
            Err(PlanError::ConstraintExceeded(_))
        ));
    }

    #[test]
    fn selection_confines_rewrite() {
        let dir = project(&[("a.rs", "let x = 1;\nlet x2 = x + 1;\n")]);
        let ctx = PlanningContext {
            selection: Some("let x2 = x + 1;".into()),
            current_file: Some("a.rs".into()),
            ..Default::default()
        };
        let plan = PlanBuilder::default().build("change x to y", &ctx);
        assert_eq!(plan.scope, Scope::SelectedText);
        let generated = EditGenerator::default()
            .generate_replacement_edits(&plan, dir.path())
            .unwrap();
        assert_eq!(generated.edits[0].edit.content, "let x = 1;\nlet x2 = y + 1;\n");
        assert_eq!(generated.edits[0].occurrences, 1);
    }

    #[test]
    fn current_scope_without_file_fails() {
        let dir = project(&[]);
        let ctx = PlanningContext {
            current_file_only: true,
            ..Default::default()
        };
        let plan = PlanBuilder::default().build("change x to y", &ctx);
        assert!(matches!(
            EditGenerator::default().generate_replacement_edits(&plan, dir.path()),
            Err(PlanError::MissingCurrentFile(_))
        ));
    }

    #[test]
    fn specific_files_limit_the_scan() {
        let dir = project(&[("main.rs", "foo"), ("lib.rs", "foo")]);
        let ctx = PlanningContext {
            all_files: vec!["main.rs".into(), "lib.rs".into()],
            ..Default::default()
        };
        let plan = PlanBuilder::default().build("change foo to bar in main.rs", &ctx);
        let generated = EditGenerator::default()
            .generate_replacement_edits(&plan, dir.path())
            .unwrap();
        assert_eq!(generated.edits.len(), 1);
        assert_eq!(generated.edits[0].edit.path, PathBuf::from("main.rs"));
    }
}
