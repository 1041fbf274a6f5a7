//! Deterministic execution plans and scan results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Replace,
    Rename,
    Insert,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Replace => "replace",
            Self::Rename => "rename",
            Self::Insert => "insert",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    EntireProject,
    CurrentFile,
    SelectedText,
    SpecificFiles,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::EntireProject => "entire project",
            Self::CurrentFile => "current file",
            Self::SelectedText => "selected text",
            Self::SpecificFiles => "specific files",
        };
        f.write_str(s)
    }
}

/// A literal pattern to look for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTarget {
    pub pattern: String,
    pub case_sensitive: bool,
    pub whole_word: bool,
}

impl SearchTarget {
    pub fn literal(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            case_sensitive: false,
            whole_word: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyConstraints {
    pub max_files: usize,
    pub max_lines: usize,
    pub require_confirmation: bool,
}

/// An explicit edit plan built without model inference. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub operation: Operation,
    pub targets: Vec<SearchTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    pub scope: Scope,
    /// Explicit files for `specific_files` and `current_file` scopes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PathBuf>,
    /// The selection a `selected_text` plan is confined to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,
    pub constraints: SafetyConstraints,
    pub description: String,
}

impl ExecutionPlan {
    /// An empty pattern means "no literal target; fall back to the model".
    pub fn needs_model(&self) -> bool {
        self.targets.iter().all(|t| t.pattern.is_empty())
    }

    pub fn primary_target(&self) -> Option<&SearchTarget> {
        self.targets.first().filter(|t| !t.pattern.is_empty())
    }
}

/// What the editor knows when an instruction is given.
#[derive(Debug, Clone, Default)]
pub struct PlanningContext {
    pub selection: Option<String>,
    pub current_file: Option<PathBuf>,
    pub all_files: Vec<PathBuf>,
    pub current_file_only: bool,
}

/// A file containing at least one match. Rebuilt on every scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMatch {
    /// Path relative to the scanned root
    pub path: PathBuf,
    pub occurrences: usize,
}
