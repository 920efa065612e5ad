//! Domain models for OpsBench.
//!
//! Canonical definitions for the core entities:
//! - `Task`: immutable input (model description + instruction)
//! - `Artifact`: generated source persisted to a file
//! - `ExecutionOutcome`: captured result of running an artifact
//! - `Verdict`: classification of an outcome
//! - `IterationRecord`: one pass of the repair loop

pub mod artifact;
pub mod error;
pub mod outcome;
pub mod record;
pub mod task;
pub mod verdict;

pub use artifact::Artifact;
pub use error::{panic_message, BenchError, Result};
pub use outcome::{ExecutionOutcome, ExitStatus};
pub use record::{IterationRecord, LoopState};
pub use task::Task;
pub use verdict::{parse_confirmation, ClassificationSource, Confirmation, Verdict};
