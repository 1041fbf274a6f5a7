//! Parser robustness guard.
//!
//! Streaming output produces many revisions of the same file. Taking the
//! last fragment naively would transiently apply truncated content, so
//! revisions are validated and reconciled here before anything downstream
//! sees them.

use patchwright_config::GuardConfig;
use patchwright_core::edit::ProposedEdit;
use patchwright_core::error::TruncationError;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// Result of reconciling two edit sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Surviving edits, one per path, in first-seen order
    pub edits: Vec<ProposedEdit>,
    pub rejected: Vec<TruncationError>,
}

#[derive(Debug, Clone, Default)]
pub struct RobustnessGuard {
    config: GuardConfig,
}

impl RobustnessGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    /// Empty and too-short content is always rejected. The brace heuristic
    /// only applies to a final parse, once streaming and loading are over.
    pub fn validate_file_content(
        &self,
        edit: &ProposedEdit,
        is_streaming: bool,
        is_loading: bool,
    ) -> Result<(), TruncationError> {
        let path = edit.display_path();
        let content = &edit.content;

        if content.trim().is_empty() {
            return Err(TruncationError::Empty { path });
        }

        let len = content.chars().count();
        if len < self.config.min_content_chars {
            return Err(TruncationError::TooShort {
                path,
                len,
                min: self.config.min_content_chars,
            });
        }

        if !is_streaming && !is_loading && len < self.config.truncation_window {
            let open = content.matches('{').count();
            let close = content.matches('}').count();
            if open != close {
                return Err(TruncationError::UnbalancedBraces { path, open, close });
            }
        }

        Ok(())
    }

    /// Reconcile `incoming` revisions with already accepted `existing` edits.
    ///
    /// While loading, accepted edits stay until a valid revision supersedes
    /// them, a complete revision beats a streaming one, and a streaming edit
    /// only surfaces when no complete version exists. Once loading has
    /// finished only complete edits that pass the final checks survive.
    pub fn merge_files(
        &self,
        existing: &[ProposedEdit],
        incoming: &[ProposedEdit],
        is_loading: bool,
    ) -> MergeOutcome {
        let mut order: Vec<PathBuf> = Vec::new();
        let mut by_path: HashMap<PathBuf, ProposedEdit> = HashMap::new();
        let mut rejected = Vec::new();

        for edit in existing {
            if by_path.insert(edit.path.clone(), edit.clone()).is_none() {
                order.push(edit.path.clone());
            }
        }

        for edit in incoming {
            if let Err(e) = self.validate_file_content(edit, edit.is_streaming, is_loading) {
                debug!(path = %edit.display_path(), error = %e, "Withholding edit");
                rejected.push(e);
                continue;
            }
            match by_path.get(&edit.path) {
                Some(current) if !current.is_streaming && edit.is_streaming => {
                    debug!(path = %edit.display_path(), "Keeping complete edit over streaming revision");
                }
                Some(_) => {
                    by_path.insert(edit.path.clone(), edit.clone());
                }
                None => {
                    order.push(edit.path.clone());
                    by_path.insert(edit.path.clone(), edit.clone());
                }
            }
        }

        let mut edits = Vec::with_capacity(order.len());
        for path in order {
            let Some(edit) = by_path.remove(&path) else {
                continue;
            };
            if !is_loading {
                if edit.is_streaming {
                    debug!(path = %edit.display_path(), "Dropping edit that never completed");
                    continue;
                }
                if let Err(e) = self.validate_file_content(&edit, false, false) {
                    rejected.push(e);
                    continue;
                }
            }
            edits.push(edit);
        }

        MergeOutcome { edits, rejected }
    }
}
