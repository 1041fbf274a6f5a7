//! # patchwright core
//!
//! Domain types, traits, and error definitions for the patchwright coding
//! agent backend. This crate has no framework dependencies beyond the
//! async plumbing its traits need; every other crate depends inward on it.
//!
//! ## Design Philosophy
//!
//! Collaborators (process execution, linting, tools) are traits here.
//! Implementations live in their respective crates, so task loops can be
//! wired with real executors in the CLI and scripted ones in tests.

pub mod edit;
pub mod error;
pub mod event;
pub mod plan;
pub mod process;
pub mod task;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use edit::{IntentCategory, ProposedEdit, ValidationResult};
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use plan::{ExecutionPlan, FileMatch, Operation, PlanningContext, Scope, SearchTarget};
pub use process::{CommandOutput, CommandSpec, ExecutorFactory, LintIssue, Linter, ProcessExecutor};
pub use task::{AbortedStep, AgentStep, AgentTask, StepStatus, StepType, TaskId, TaskStatus};
pub use tool::{Tool, ToolCallRequest, ToolInput, ToolRegistry, ToolResult};
