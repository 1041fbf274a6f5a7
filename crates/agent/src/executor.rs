//! Applies accepted edits to the real project.
//!
//! Each edit is written independently. A failure on one file does not stop
//! the others, and files already written are never reverted.

use chrono::Utc;
use patchwright_core::edit::ProposedEdit;
use patchwright_core::error::PartialExecutionFailure;
use patchwright_core::event::{DomainEvent, EventBus};
use patchwright_security::resolve_in_root;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Per-file progress while a batch is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApplyProgress {
    Started { total: usize },
    Written { path: PathBuf, index: usize, total: usize },
    Failed { path: PathBuf, reason: String },
    Finished { applied: usize, failed: usize },
}

/// What happened to each edit of a batch. Paths are as given in the edits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl ApplyReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn into_result(self) -> Result<Vec<PathBuf>, PartialExecutionFailure> {
        if self.failed.is_empty() {
            return Ok(self.applied);
        }
        Err(PartialExecutionFailure {
            applied: self.applied.iter().map(|p| p.display().to_string()).collect(),
            failed: self
                .failed
                .into_iter()
                .map(|(p, reason)| (p.display().to_string(), reason))
                .collect(),
        })
    }
}

/// Writes edits under one project root.
pub struct ActionExecutor {
    root: PathBuf,
    forbidden_paths: Vec<String>,
    event_bus: Option<Arc<EventBus>>,
}

impl ActionExecutor {
    pub fn new(root: impl Into<PathBuf>, forbidden_paths: Vec<String>) -> Self {
        Self {
            root: root.into(),
            forbidden_paths,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of an edit target, or why it may not be written.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, String> {
        resolve_in_root(&self.root, &path.to_string_lossy(), &self.forbidden_paths)
            .map(|(absolute, _)| absolute)
            .map_err(|e| e.to_string())
    }

    /// Current content of an edit target; empty for a file that does not
    /// exist yet.
    pub async fn read_original(&self, path: &Path) -> Result<String, String> {
        let absolute = self.resolve(path)?;
        match tokio::fs::read_to_string(&absolute).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(format!("Failed to read {}: {e}", path.display())),
        }
    }

    /// Write every edit, creating parent directories as needed.
    pub async fn apply(
        &self,
        edits: &[ProposedEdit],
        progress: Option<&mpsc::UnboundedSender<ApplyProgress>>,
    ) -> ApplyReport {
        let total = edits.len();
        let emit = |event: ApplyProgress| {
            if let Some(tx) = progress {
                let _ = tx.send(event);
            }
        };
        emit(ApplyProgress::Started { total });

        let mut report = ApplyReport::default();
        for (index, edit) in edits.iter().enumerate() {
            match self.write(edit).await {
                Ok(()) => {
                    debug!(path = %edit.display_path(), "Edit applied");
                    self.publish(edit);
                    report.applied.push(edit.path.clone());
                    emit(ApplyProgress::Written {
                        path: edit.path.clone(),
                        index: index + 1,
                        total,
                    });
                }
                Err(reason) => {
                    warn!(path = %edit.display_path(), %reason, "Failed to apply edit");
                    emit(ApplyProgress::Failed {
                        path: edit.path.clone(),
                        reason: reason.clone(),
                    });
                    report.failed.push((edit.path.clone(), reason));
                }
            }
        }

        emit(ApplyProgress::Finished {
            applied: report.applied.len(),
            failed: report.failed.len(),
        });
        info!(
            root = %self.root.display(),
            applied = report.applied.len(),
            failed = report.failed.len(),
            "Applied edits"
        );
        report
    }

    async fn write(&self, edit: &ProposedEdit) -> Result<(), String> {
        let target = self.resolve(&edit.path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
        }
        tokio::fs::write(&target, &edit.content)
            .await
            .map_err(|e| format!("Failed to write {}: {e}", edit.display_path()))
    }

    fn publish(&self, edit: &ProposedEdit) {
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::EditApplied {
                path: edit.display_path(),
                added_lines: edit.added_lines,
                removed_lines: edit.removed_lines,
                timestamp: Utc::now(),
            });
        }
    }
}
