//! Error types for the patchwright domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant, and every variant
//! renders a human-readable reason. None of them is fatal to the host
//! process: they are all recoverable at the task level.

use thiserror::Error;

/// The top-level error type for all patchwright operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Stream parsing ---
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    // --- Edit safety ---
    #[error("Safety violation: {0}")]
    Safety(#[from] SafetyViolation),

    #[error("Content withheld: {0}")]
    Truncation(#[from] TruncationError),

    // --- Shadow verification ---
    #[error("Verification error: {0}")]
    Verification(#[from] VerificationError),

    // --- Applying edits ---
    #[error("Execution error: {0}")]
    Execution(#[from] PartialExecutionFailure),

    // --- Task lifecycle ---
    #[error("Completion blocked: {0}")]
    Completion(#[from] CompletionGateFailure),

    #[error("Invalid state transition: {0}")]
    Transition(#[from] TransitionError),

    // --- Deterministic planning ---
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A malformed tool-call frame. The frame is dropped, the stream continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("frame has {found} field(s), expected id, name and payload")]
    MissingFields { found: usize },

    #[error("frame has an empty call id")]
    EmptyId,

    #[error("frame {id} has an empty tool name")]
    EmptyName { id: String },

    #[error("payload of call {id} is not valid base64: {reason}")]
    InvalidBase64 { id: String, reason: String },

    #[error("payload of call {id} is not valid UTF-8 JSON: {reason}")]
    InvalidJson { id: String, reason: String },

    #[error("payload of call {id} is not a JSON object")]
    NotAnObject { id: String },
}

/// An edit rejected by the diff safety classifier. Never applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: {reason}")]
pub struct SafetyViolation {
    pub path: String,
    pub reason: String,
}

/// Content held back by the robustness guard.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TruncationError {
    #[error("{path}: content is empty or whitespace only")]
    Empty { path: String },

    #[error("{path}: content is {len} characters, below the minimum of {min}")]
    TooShort { path: String, len: usize, min: usize },

    #[error("{path}: content looks truncated ({open} '{{' vs {close} '}}')")]
    UnbalancedBraces {
        path: String,
        open: usize,
        close: usize,
    },
}

impl TruncationError {
    pub fn path(&self) -> &str {
        match self {
            Self::Empty { path } | Self::TooShort { path, .. } | Self::UnbalancedBraces { path, .. } => {
                path
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Failed to create shadow workspace for {root}: {reason}")]
    Snapshot { root: String, reason: String },

    #[error("Refusing to write outside the shadow workspace: {0}")]
    EscapingPath(String),

    #[error("Failed to write {path} into shadow workspace: {reason}")]
    Write { path: String, reason: String },

    #[error("Build command could not be started: {0}")]
    Spawn(String),
}

/// Mixed success and failure when applying a batch of edits.
/// Files already written are not reverted.
#[derive(Debug, Clone, Error)]
#[error("{} of {} file(s) failed to apply: {}", .failed.len(), .failed.len() + .applied.len(), describe_failures(.failed))]
pub struct PartialExecutionFailure {
    pub applied: Vec<String>,
    pub failed: Vec<(String, String)>,
}

fn describe_failures(failed: &[(String, String)]) -> String {
    failed
        .iter()
        .map(|(path, reason)| format!("{path} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A task cannot be declared done.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct CompletionGateFailure {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{entity} {id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub entity: &'static str,
    pub id: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("No literal target found in instruction; a model is required")]
    NoTarget,

    #[error("{0} operations cannot be generated deterministically; a model is required")]
    RequiresModel(String),

    #[error("Plan exceeds its safety constraints: {0}")]
    ConstraintExceeded(String),

    #[error("Scope {0} needs a current file")]
    MissingCurrentFile(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Executor is already running a command")]
    Busy,

    #[error("Failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("Command '{command}' timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("I/O error while running '{command}': {reason}")]
    Io { command: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_displays_call_id() {
        let err = Error::Parse(ParseError::InvalidBase64 {
            id: "42".into(),
            reason: "invalid length".into(),
        });
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("base64"));
    }

    #[test]
    fn partial_failure_lists_failed_paths() {
        let err = PartialExecutionFailure {
            applied: vec!["a.rs".into()],
            failed: vec![("b.rs".into(), "permission denied".into())],
        };
        let text = err.to_string();
        assert!(text.starts_with("1 of 2 file(s)"));
        assert!(text.contains("b.rs (permission denied)"));
    }

    #[test]
    fn truncation_error_mentions_brace_counts() {
        let err = TruncationError::UnbalancedBraces {
            path: "main.rs".into(),
            open: 3,
            close: 1,
        };
        let text = err.to_string();
        assert!(text.contains("3 '{'"));
        assert!(text.contains("1 '}'"));
    }
}
