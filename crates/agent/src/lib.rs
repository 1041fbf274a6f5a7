//! The agent side of patchwright: turning model turns into verified edits.
//!
//! A [`TaskLoop`] consumes model turns for one task:
//!
//! 1. **Parse** each fragment into narration and tool calls
//! 2. **Dispatch** calls as steps (terminal, read, search, write, done)
//! 3. **Stage** file writes behind the robustness guard while the turn streams
//! 4. **Apply** staged writes through the [`EditPipeline`]: diff safety
//!    classifier, shadow build, [`ActionExecutor`]
//! 5. **Gate** completion on `done` with the [`CompletionGate`]
//!
//! [`TaskSupervisor`] runs many loops concurrently; the only state they
//! share is the single-slot [`ApprovalGate`].

pub mod approval;
pub mod completion;
pub mod executor;
pub mod loop_runner;
pub mod model;
pub mod pipeline;
pub mod supervisor;

pub use approval::{ApprovalGate, PendingApproval};
pub use completion::{CompletionGate, CompletionGateResult, CompletionInput};
pub use executor::{ActionExecutor, ApplyProgress, ApplyReport};
pub use loop_runner::{TaskLoop, TurnReport, step_type_for};
pub use model::{ModelSource, ModelTurn, RecordedTurn, ScriptedModel};
pub use pipeline::{EditPipeline, EditResult, EditVerdict, PipelineOutcome};
pub use supervisor::TaskSupervisor;
