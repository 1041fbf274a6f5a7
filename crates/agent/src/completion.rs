//! The completion gate: the last word on whether a task may report success.

use patchwright_core::error::CompletionGateFailure;
use serde::Serialize;

/// Everything the gate looks at for one model turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionInput {
    pub http_status: u16,
    pub body_len: usize,
    /// Distinct files the response asked to write
    pub parsed_files: usize,
    /// Edits that survived the robustness guard
    pub proposed_edits: usize,
    pub validation_errors: Vec<String>,
    /// The model sent the dedicated "nothing to change" signal
    pub explicit_no_op: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionGateResult {
    pub can_complete: bool,
    pub reason: String,
}

impl CompletionGateResult {
    fn pass(reason: impl Into<String>) -> Self {
        Self {
            can_complete: true,
            reason: reason.into(),
        }
    }

    fn block(reason: impl Into<String>) -> Self {
        Self {
            can_complete: false,
            reason: reason.into(),
        }
    }
}

/// Stateless; checks run in a fixed order and the first failure wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompletionGate;

impl CompletionGate {
    pub fn evaluate(&self, input: &CompletionInput) -> CompletionGateResult {
        if !(200..300).contains(&input.http_status) {
            return CompletionGateResult::block(format!(
                "Model response failed with HTTP status {}",
                input.http_status
            ));
        }
        if input.body_len == 0 {
            return CompletionGateResult::block("Model response body was empty");
        }

        match (input.parsed_files, input.proposed_edits) {
            (0, 0) if input.explicit_no_op => {}
            (0, 0) => {
                return CompletionGateResult::block(
                    "No files were parsed and no edits were proposed; \
                     a task with nothing to change must say so explicitly",
                );
            }
            (0, edits) => {
                return CompletionGateResult::block(format!(
                    "{edits} edit(s) proposed but no files were parsed from the response"
                ));
            }
            (files, 0) => {
                return CompletionGateResult::block(format!(
                    "{files} file(s) parsed but every edit was withheld"
                ));
            }
            _ => {}
        }

        if let Some(first) = input.validation_errors.first() {
            return CompletionGateResult::block(format!(
                "{} validation error(s), first: {first}",
                input.validation_errors.len()
            ));
        }

        if input.proposed_edits == 0 {
            CompletionGateResult::pass("Completed with no changes")
        } else {
            CompletionGateResult::pass(format!(
                "Completed with {} edit(s)",
                input.proposed_edits
            ))
        }
    }

    pub fn check(&self, input: &CompletionInput) -> Result<String, CompletionGateFailure> {
        let result = self.evaluate(input);
        if result.can_complete {
            Ok(result.reason)
        } else {
            Err(CompletionGateFailure {
                reason: result.reason,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passing() -> CompletionInput {
        CompletionInput {
            http_status: 200,
            body_len: 120,
            parsed_files: 2,
            proposed_edits: 2,
            ..Default::default()
        }
    }

    #[test]
    fn all_checks_pass() {
        let result = CompletionGate.evaluate(&passing());
        assert!(result.can_complete);
        assert_eq!(result.reason, "Completed with 2 edit(s)");
    }

    #[test]
    fn non_success_status_blocks_first() {
        let input = CompletionInput {
            http_status: 503,
            body_len: 0,
            ..passing()
        };
        let result = CompletionGate.evaluate(&input);
        assert!(!result.can_complete);
        assert!(result.reason.contains("503"));

        let redirect = CompletionInput {
            http_status: 300,
            ..passing()
        };
        assert!(!CompletionGate.evaluate(&redirect).can_complete);
    }

    #[test]
    fn empty_body_blocks() {
        let input = CompletionInput {
            body_len: 0,
            ..passing()
        };
        assert_eq!(
            CompletionGate.evaluate(&input).reason,
            "Model response body was empty"
        );
    }

    #[test]
    fn zero_effect_is_never_inferred() {
        let input = CompletionInput {
            parsed_files: 0,
            proposed_edits: 0,
            ..passing()
        };
        let result = CompletionGate.evaluate(&input);
        assert!(!result.can_complete);
        assert!(result.reason.contains("explicitly"));
    }

    #[test]
    fn explicit_no_op_passes() {
        let input = CompletionInput {
            parsed_files: 0,
            proposed_edits: 0,
            explicit_no_op: true,
            ..passing()
        };
        let result = CompletionGate.evaluate(&input);
        assert!(result.can_complete);
        assert_eq!(result.reason, "Completed with no changes");
    }

    #[test]
    fn explicit_no_op_still_needs_a_healthy_response() {
        let input = CompletionInput {
            http_status: 500,
            parsed_files: 0,
            proposed_edits: 0,
            explicit_no_op: true,
            ..passing()
        };
        assert!(!CompletionGate.evaluate(&input).can_complete);
    }

    #[test]
    fn edits_without_parsed_files_block_with_reason() {
        for edits in 1..5 {
            let input = CompletionInput {
                parsed_files: 0,
                proposed_edits: edits,
                ..passing()
            };
            let result = CompletionGate.evaluate(&input);
            assert!(!result.can_complete);
            assert!(!result.reason.is_empty());
        }
    }

    #[test]
    fn parsed_files_without_edits_block() {
        let input = CompletionInput {
            proposed_edits: 0,
            ..passing()
        };
        let result = CompletionGate.evaluate(&input);
        assert!(result.reason.contains("withheld"));
    }

    #[test]
    fn validation_errors_block_last() {
        let input = CompletionInput {
            validation_errors: vec!["a.rs: too short".into(), "b.rs: unbalanced".into()],
            ..passing()
        };
        let err = CompletionGate.check(&input).unwrap_err();
        assert_eq!(err.reason, "2 validation error(s), first: a.rs: too short");
    }
}
