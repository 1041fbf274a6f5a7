//! Shadow workspace verification.
//!
//! Proposed edits are written into a disposable copy of the project and
//! built there with the project's own build tool before anything touches
//! the real tree.

pub mod build;
mod snapshot;
pub mod verifier;

pub use build::{BUILD_SYSTEMS, BuildSystem, detect_build_system};
pub use verifier::{ShadowVerifier, VerificationReport};
