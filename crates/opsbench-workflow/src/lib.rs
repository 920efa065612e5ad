//! OpsBench Workflow
//!
//! A single-pass, gated alternative to the repair loop. Six stages run in
//! order: analyze, synthesize, extract, persist, execute and summarize. A
//! stage runs only if its predecessor succeeded; summarize always runs and
//! produces the [`WorkflowReport`].

pub mod error;
pub mod gate;
pub mod pipeline;
pub mod prune;
pub mod stage;

pub use error::{Result, WorkflowError};
pub use gate::{WorkflowGate, WorkflowOutcome, WorkflowVerdict};
pub use pipeline::{WorkflowConfig, WorkflowController, WorkflowReport};
pub use prune::prune_artifacts;
pub use stage::{StageRecord, StageStatus, WorkflowStage};
