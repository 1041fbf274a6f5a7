//! Deterministic planning for literal edit instructions.
//!
//! Instructions like "rename oldFunc to newFunc" never need a model round
//! trip: [`PlanBuilder`] turns them into an [`ExecutionPlan`],
//! [`WorkspaceScanner`] finds the literal matches and [`EditGenerator`]
//! produces ready-to-verify [`ProposedEdit`]s. An instruction the builder
//! cannot parse yields a plan with an empty pattern, meaning "ask the model".
//!
//! [`ExecutionPlan`]: patchwright_core::ExecutionPlan
//! [`ProposedEdit`]: patchwright_core::ProposedEdit

pub mod builder;
pub mod generator;
pub mod scanner;

pub use builder::PlanBuilder;
pub use generator::{EditGenerator, GeneratedEdit, GeneratedEdits};
pub use scanner::{Matcher, WorkspaceScanner};
