//! Edit safety checks.
//!
//! - [`DiffClassifier`]: is a before/after pair a plausible edit for its intent?
//! - [`RobustnessGuard`]: is streamed content complete enough to act on?

pub mod classifier;
pub mod guard;

pub use classifier::{DiffClassifier, EditMetrics};
pub use guard::{MergeOutcome, RobustnessGuard};
