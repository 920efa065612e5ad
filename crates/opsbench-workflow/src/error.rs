//! Workflow error types.

use opsbench_core::BenchError;
use opsbench_oracle::GenerationFailure;
use thiserror::Error;

/// Why a workflow stage (or the workflow as a whole) failed.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("oracle call failed: {0}")]
    Generation(#[from] GenerationFailure),

    #[error("analysis returned no usable rationale")]
    EmptyRationale,

    #[error("no code body found in the synthesis response")]
    NoCode,

    #[error("execution {0}")]
    Execution(String),

    #[error("stage panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Bench(#[from] BenchError),
}

/// Result type for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;
