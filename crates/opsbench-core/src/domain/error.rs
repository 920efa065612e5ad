//! Error taxonomy for OpsBench core operations.

use std::path::PathBuf;

use opsbench_oracle::GenerationFailure;

/// OpsBench core errors.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist artifact {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationFailure),

    #[error("environment error: {0}")]
    Environment(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for OpsBench core operations.
pub type Result<T> = std::result::Result<T, BenchError>;

/// Render a caught panic payload as text.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
