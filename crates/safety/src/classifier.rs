//! Diff safety classifier.
//!
//! Judges whether a before/after pair is a plausible bounded edit or a
//! runaway rewrite. Rules are checked in a fixed order (deleted lines,
//! deletion ratio, full rewrite) and the first violation's reason is
//! returned; callers show that reason to the user verbatim.

use patchwright_config::SafetyConfig;
use patchwright_core::edit::{IntentCategory, ProposedEdit, ValidationResult};
use patchwright_core::error::SafetyViolation;
use std::collections::HashSet;
use tracing::debug;

/// Size measurements of one before/after pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditMetrics {
    pub original_lines: usize,
    pub new_lines: usize,
    pub deleted_lines: usize,
    /// `deleted_lines / original_lines`, 0.0 for an empty original
    pub deletion_ratio: f64,
    /// Share of the original's distinct words still present, 1.0 for an
    /// empty original
    pub word_overlap: f64,
}

impl EditMetrics {
    pub fn measure(original: &str, new: &str) -> Self {
        let original_lines = original.lines().count();
        let new_lines = new.lines().count();
        let deleted_lines = original_lines.saturating_sub(new_lines);
        let deletion_ratio = if original_lines == 0 {
            0.0
        } else {
            deleted_lines as f64 / original_lines as f64
        };

        let before: HashSet<&str> = original.split_whitespace().collect();
        let after: HashSet<&str> = new.split_whitespace().collect();
        let word_overlap = if before.is_empty() {
            1.0
        } else {
            before.intersection(&after).count() as f64 / before.len() as f64
        };

        Self {
            original_lines,
            new_lines,
            deleted_lines,
            deletion_ratio,
            word_overlap,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiffClassifier {
    config: SafetyConfig,
}

impl DiffClassifier {
    pub fn new(config: SafetyConfig) -> Self {
        Self { config }
    }

    /// Pure function of its inputs; identical inputs give identical verdicts.
    pub fn validate_edit(&self, original: &str, new: &str, category: IntentCategory) -> ValidationResult {
        let metrics = EditMetrics::measure(original, new);
        let limits = self.config.thresholds(category);
        let label = category.label();

        if let Some(max) = limits.max_deleted_lines
            && metrics.deleted_lines > max
        {
            return unsafe_edit(format!(
                "Deletes {} lines, exceeding the {max}-line limit for {label} edits",
                metrics.deleted_lines
            ));
        }

        if let Some(max) = limits.max_deletion_ratio
            && metrics.deletion_ratio > max
        {
            return unsafe_edit(format!(
                "Deletes {:.0}% of the file, exceeding the {:.0}% limit for {label} edits",
                metrics.deletion_ratio * 100.0,
                max * 100.0
            ));
        }

        if limits.block_full_rewrite && metrics.word_overlap < self.config.rewrite_similarity {
            return unsafe_edit(format!(
                "Looks like a full rewrite: only {:.0}% of the original words remain \
                 (minimum {:.0}%), which {label} edits do not allow",
                metrics.word_overlap * 100.0,
                self.config.rewrite_similarity * 100.0
            ));
        }

        debug!(
            category = label,
            deleted = metrics.deleted_lines,
            overlap = metrics.word_overlap,
            "Edit classified safe"
        );
        ValidationResult::Safe
    }

    /// [`validate_edit`](Self::validate_edit) for a proposed edit, as a `Result`.
    pub fn check(
        &self,
        edit: &ProposedEdit,
        original: &str,
        category: IntentCategory,
    ) -> Result<(), SafetyViolation> {
        match self.validate_edit(original, &edit.content, category) {
            ValidationResult::Safe => Ok(()),
            ValidationResult::Unsafe { reason } => Err(SafetyViolation {
                path: edit.display_path(),
                reason,
            }),
        }
    }
}

fn unsafe_edit(reason: String) -> ValidationResult {
    debug!(%reason, "Edit classified unsafe");
    ValidationResult::Unsafe { reason }
}
