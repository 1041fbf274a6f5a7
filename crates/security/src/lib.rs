//! Path confinement and command policy.
//!
//! Provides:
//! - **Path validation**: every edit and file tool stays inside the project root
//! - **Command policy**: which terminal commands run without human approval

pub mod allowlist;
pub mod path;

pub use allowlist::{CommandCheck, CommandPolicy};
pub use path::{resolve_in_root, PathValidationError};
