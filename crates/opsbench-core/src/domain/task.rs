//! Task: the immutable input to a run.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{BenchError, Result};

/// Structural-model text plus a natural-language instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Unique per task; keys artifact directories and log spans.
    pub id: Uuid,
    /// Structural model description (TCL).
    pub model_description: String,
    /// What the user wants computed.
    pub instruction: String,
    /// Optional grouping label for batch statistics (e.g. intention).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Task {
    pub fn new(model_description: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_description: model_description.into(),
            instruction: instruction.into(),
            label: None,
        }
    }

    /// Load the model description from a file.
    pub fn from_file(path: &Path, instruction: impl Into<String>) -> Result<Self> {
        let model = std::fs::read_to_string(path).map_err(|source| BenchError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(model, instruction))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// First 8 hex chars of the id.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    /// Reject tasks that cannot produce a meaningful prompt.
    pub fn validate(&self) -> Result<()> {
        if self.model_description.trim().is_empty() {
            return Err(BenchError::InvalidTask(
                "model description is empty".to_string(),
            ));
        }
        if self.instruction.trim().is_empty() {
            return Err(BenchError::InvalidTask("instruction is empty".to_string()));
        }
        Ok(())
    }
}
