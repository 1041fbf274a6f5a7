//! The edit pipeline: classify, verify in a shadow copy, apply, lint.
//!
//! Nothing reaches the real project without passing the diff safety
//! classifier and, when one is configured, the shadow verifier. Lint runs
//! afterwards and only reports.

use crate::executor::{ActionExecutor, ApplyProgress};
use chrono::Utc;
use patchwright_core::edit::{IntentCategory, ProposedEdit};
use patchwright_core::event::{DomainEvent, EventBus};
use patchwright_core::process::{LintIssue, Linter};
use patchwright_safety::DiffClassifier;
use patchwright_shadow::{ShadowVerifier, VerificationReport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What the pipeline decided for one edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditVerdict {
    Applied,
    /// Refused by the safety classifier or path confinement
    Rejected { reason: String },
    /// Held back because shadow verification did not pass
    Withheld { reason: String },
    /// Passed every check but could not be written
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct EditResult {
    /// The edit with line deltas computed against the file on disk
    pub edit: ProposedEdit,
    pub verdict: EditVerdict,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOutcome {
    /// One entry per input edit, in input order
    pub results: Vec<EditResult>,
    pub verification: Option<VerificationReport>,
    pub lint_issues: Vec<LintIssue>,
}

impl PipelineOutcome {
    pub fn applied(&self) -> impl Iterator<Item = &ProposedEdit> {
        self.results
            .iter()
            .filter(|r| r.verdict == EditVerdict::Applied)
            .map(|r| &r.edit)
    }

    /// Human-readable reason for every edit that was not applied.
    pub fn errors(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|r| match &r.verdict {
                EditVerdict::Applied => None,
                EditVerdict::Rejected { reason }
                | EditVerdict::Withheld { reason }
                | EditVerdict::Failed { reason } => {
                    Some(format!("{}: {reason}", r.edit.display_path()))
                }
            })
            .collect()
    }
}

pub struct EditPipeline {
    classifier: DiffClassifier,
    verifier: Option<Arc<ShadowVerifier>>,
    executor: ActionExecutor,
    linter: Option<Arc<dyn Linter>>,
    event_bus: Option<Arc<EventBus>>,
}

impl EditPipeline {
    pub fn new(classifier: DiffClassifier, executor: ActionExecutor) -> Self {
        Self {
            classifier,
            verifier: None,
            executor,
            linter: None,
            event_bus: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<ShadowVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_linter(mut self, linter: Arc<dyn Linter>) -> Self {
        self.linter = Some(linter);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    /// Run a batch of edits through every stage.
    pub async fn run(
        &self,
        edits: Vec<ProposedEdit>,
        category: IntentCategory,
        progress: Option<&mpsc::UnboundedSender<ApplyProgress>>,
    ) -> PipelineOutcome {
        let mut results = Vec::with_capacity(edits.len());
        for edit in edits {
            results.push(self.classify(edit, category).await);
        }

        let accepted: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.verdict == EditVerdict::Applied)
            .map(|(i, _)| i)
            .collect();
        let mut outcome = PipelineOutcome {
            results,
            ..Default::default()
        };
        if accepted.is_empty() {
            debug!("No edit passed the safety classifier");
            return outcome;
        }

        let batch: Vec<ProposedEdit> = accepted
            .iter()
            .map(|&i| outcome.results[i].edit.clone())
            .collect();

        if let Some(verifier) = &self.verifier {
            let held_back = match verifier.verify(&batch, self.executor.root()).await {
                Ok(report) => {
                    let reason = (!report.passed)
                        .then(|| format!("shadow build failed: {}", report.message));
                    outcome.verification = Some(report);
                    reason
                }
                Err(e) => Some(e.to_string()),
            };
            if let Some(reason) = held_back {
                warn!(edits = batch.len(), %reason, "Edits withheld");
                for &i in &accepted {
                    outcome.results[i].verdict = EditVerdict::Withheld {
                        reason: reason.clone(),
                    };
                }
                return outcome;
            }
        }

        let report = self.executor.apply(&batch, progress).await;
        for (path, reason) in report.failed {
            if let Some(&i) = accepted
                .iter()
                .find(|&&i| outcome.results[i].edit.path == path)
            {
                outcome.results[i].verdict = EditVerdict::Failed { reason };
            }
        }

        if let Some(linter) = &self.linter {
            let files: Vec<PathBuf> = outcome.applied().map(|e| e.path.clone()).collect();
            if !files.is_empty() {
                match linter.validate(&files, self.executor.root()).await {
                    Some(issues) => {
                        if !issues.is_empty() {
                            info!(issues = issues.len(), "Linter reported issues");
                        }
                        outcome.lint_issues = issues;
                    }
                    None => debug!("No linter available for this workspace"),
                }
            }
        }

        outcome
    }

    async fn classify(&self, edit: ProposedEdit, category: IntentCategory) -> EditResult {
        let original = match self.executor.read_original(&edit.path).await {
            Ok(original) => original,
            Err(reason) => return self.reject(edit, reason),
        };
        let edit = edit.with_original(&original);
        match self.classifier.check(&edit, &original, category) {
            Ok(()) => EditResult {
                edit,
                verdict: EditVerdict::Applied,
            },
            Err(violation) => self.reject(edit, violation.reason),
        }
    }

    fn reject(&self, edit: ProposedEdit, reason: String) -> EditResult {
        warn!(path = %edit.display_path(), %reason, "Edit rejected");
        if let Some(bus) = &self.event_bus {
            bus.publish(DomainEvent::EditRejected {
                path: edit.display_path(),
                reason: reason.clone(),
                timestamp: Utc::now(),
            });
        }
        EditResult {
            edit,
            verdict: EditVerdict::Rejected { reason },
        }
    }
}
