//! Workflow stage definitions.

use serde::{Deserialize, Serialize};

/// The six workflow stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    /// Oracle produces a plan; never contains code.
    Analyze,
    /// Oracle produces a candidate program from the plan.
    Synthesize,
    /// Code body is isolated from the response.
    Extract,
    /// Code is written to a fresh timestamped file.
    Persist,
    /// The file is run with the resolved runtime.
    Execute,
    /// Aggregates everything into a report. Always runs.
    Summarize,
}

impl WorkflowStage {
    pub const ALL: [WorkflowStage; 6] = [
        WorkflowStage::Analyze,
        WorkflowStage::Synthesize,
        WorkflowStage::Extract,
        WorkflowStage::Persist,
        WorkflowStage::Execute,
        WorkflowStage::Summarize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowStage::Analyze => "analyze",
            WorkflowStage::Synthesize => "synthesize",
            WorkflowStage::Extract => "extract",
            WorkflowStage::Persist => "persist",
            WorkflowStage::Execute => "execute",
            WorkflowStage::Summarize => "summarize",
        }
    }

    /// Stage that must have succeeded before this one may run.
    pub fn predecessor(&self) -> Option<WorkflowStage> {
        match self {
            WorkflowStage::Analyze | WorkflowStage::Summarize => None,
            WorkflowStage::Synthesize => Some(WorkflowStage::Analyze),
            WorkflowStage::Extract => Some(WorkflowStage::Synthesize),
            WorkflowStage::Persist => Some(WorkflowStage::Extract),
            WorkflowStage::Execute => Some(WorkflowStage::Persist),
        }
    }

    /// Whether the stage is subject to gating.
    pub fn is_gated(&self) -> bool {
        *self != WorkflowStage::Summarize
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    NotRun,
    Succeeded,
    Failed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::NotRun => write!(f, "not_run"),
            StageStatus::Succeeded => write!(f, "succeeded"),
            StageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of one stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageRecord {
    pub stage: WorkflowStage,
    pub status: StageStatus,

    /// Error text for failed stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Upstream stage that prevented this one from running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<WorkflowStage>,

    pub duration_ms: u64,
}

impl StageRecord {
    pub fn succeeded(stage: WorkflowStage, duration_ms: u64) -> Self {
        Self {
            stage,
            status: StageStatus::Succeeded,
            error: None,
            blocked_by: None,
            duration_ms,
        }
    }

    pub fn failed(stage: WorkflowStage, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            stage,
            status: StageStatus::Failed,
            error: Some(error.into()),
            blocked_by: None,
            duration_ms,
        }
    }

    pub fn not_run(stage: WorkflowStage, blocked_by: WorkflowStage) -> Self {
        Self {
            stage,
            status: StageStatus::NotRun,
            error: None,
            blocked_by: Some(blocked_by),
            duration_ms: 0,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == StageStatus::Succeeded
    }

    /// Whether the stage actually ran (succeeded or failed).
    pub fn ran(&self) -> bool {
        self.status != StageStatus::NotRun
    }
}
