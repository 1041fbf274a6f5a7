//! Proposed edits and the verdicts attached to them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A full-content rewrite of one file, relative to the project root.
///
/// Edits arrive while the model is still streaming (`is_streaming`) and
/// become complete once the call that carries them is fully decoded.
/// A later revision for the same path supersedes an earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedEdit {
    pub path: PathBuf,
    pub content: String,
    pub is_streaming: bool,
    pub added_lines: usize,
    pub removed_lines: usize,
}

impl ProposedEdit {
    /// A complete edit with line deltas computed against `original`.
    pub fn complete(path: impl Into<PathBuf>, original: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        let (added_lines, removed_lines) = line_delta(original, &content);
        Self {
            path: path.into(),
            content,
            is_streaming: false,
            added_lines,
            removed_lines,
        }
    }

    /// A partial edit seen mid-stream; deltas are unknown until it completes.
    pub fn streaming(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            is_streaming: true,
            added_lines: 0,
            removed_lines: 0,
        }
    }

    /// Same path and content, deltas recomputed against `original`.
    pub fn with_original(mut self, original: &str) -> Self {
        let (added, removed) = line_delta(original, &self.content);
        self.added_lines = added;
        self.removed_lines = removed;
        self
    }

    pub fn display_path(&self) -> String {
        self.path.display().to_string()
    }
}

/// Lines added and removed, counted as a multiset difference of lines.
pub fn line_delta(original: &str, updated: &str) -> (usize, usize) {
    use std::collections::HashMap;

    let mut counts: HashMap<&str, isize> = HashMap::new();
    for line in original.lines() {
        *counts.entry(line).or_default() += 1;
    }
    for line in updated.lines() {
        *counts.entry(line).or_default() -= 1;
    }
    let mut added = 0;
    let mut removed = 0;
    for delta in counts.values() {
        if *delta > 0 {
            removed += *delta as usize;
        } else {
            added += (-*delta) as usize;
        }
    }
    (added, removed)
}

/// Coarse classification of expected edit size, used to size thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    TextReplacement,
    BoundedEdit,
    FullRewrite,
    #[default]
    Complex,
}

impl IntentCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::TextReplacement => "text replacement",
            Self::BoundedEdit => "bounded edit",
            Self::FullRewrite => "full rewrite",
            Self::Complex => "complex",
        }
    }
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of the diff safety classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ValidationResult {
    Safe,
    Unsafe { reason: String },
}

impl ValidationResult {
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Safe)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Safe => None,
            Self::Unsafe { reason } => Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_delta_counts_changes() {
        let (added, removed) = line_delta("a\nb\nc\n", "a\nB\nc\nd\n");
        assert_eq!(added, 2);
        assert_eq!(removed, 1);
    }

    #[test]
    fn complete_edit_records_delta() {
        let edit = ProposedEdit::complete("src/lib.rs", "one\ntwo\n", "one\n");
        assert!(!edit.is_streaming);
        assert_eq!(edit.removed_lines, 1);
        assert_eq!(edit.added_lines, 0);
    }

    #[test]
    fn validation_result_reason() {
        assert!(ValidationResult::Safe.is_safe());
        let verdict = ValidationResult::Unsafe {
            reason: "too many deletions".into(),
        };
        assert_eq!(verdict.reason(), Some("too many deletions"));
    }
}
