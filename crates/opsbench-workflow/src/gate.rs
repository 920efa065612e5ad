//! Stage gating and aggregate success.

use opsbench_core::ExecutionOutcome;
use serde::{Deserialize, Serialize};

use crate::stage::{StageRecord, StageStatus, WorkflowStage};

/// How a workflow run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    /// Stages 1-4 succeeded and the program ran cleanly.
    Succeeded,
    /// The pipeline produced a runnable artifact that failed at execution.
    ExecutionFailed,
    /// An upstream stage failed; `stage` is the first one.
    PipelineBroken { stage: WorkflowStage },
}

/// Aggregate verdict over all stage records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowVerdict {
    pub outcome: WorkflowOutcome,
    pub success: bool,
    /// Gated stages that failed or never ran.
    pub failed_stages: Vec<WorkflowStage>,
    pub message: String,
}

/// Gating rules.
pub struct WorkflowGate;

impl WorkflowGate {
    /// `Ok(())` if `stage` may run given the records so far, otherwise the
    /// upstream stage that blocks it.
    pub fn may_run(stage: WorkflowStage, records: &[StageRecord]) -> Result<(), WorkflowStage> {
        let Some(pred) = stage.predecessor() else {
            return Ok(());
        };
        match records.iter().find(|r| r.stage == pred) {
            Some(r) if r.status == StageStatus::Succeeded => Ok(()),
            _ => Err(pred),
        }
    }

    /// Aggregate success: stages analyze..persist succeeded and execution
    /// exited with status Ok.
    pub fn evaluate(records: &[StageRecord], execution: Option<&ExecutionOutcome>) -> WorkflowVerdict {
        let status_of = |stage: WorkflowStage| {
            records
                .iter()
                .find(|r| r.stage == stage)
                .map(|r| r.status)
                .unwrap_or(StageStatus::NotRun)
        };

        let failed_stages: Vec<WorkflowStage> = WorkflowStage::ALL
            .iter()
            .copied()
            .filter(|s| s.is_gated() && status_of(*s) != StageStatus::Succeeded)
            .collect();

        let upstream = [
            WorkflowStage::Analyze,
            WorkflowStage::Synthesize,
            WorkflowStage::Extract,
            WorkflowStage::Persist,
        ];
        let broken = upstream
            .iter()
            .copied()
            .find(|s| status_of(*s) != StageStatus::Succeeded);

        let execution_ok = status_of(WorkflowStage::Execute) == StageStatus::Succeeded
            && execution.map(|o| o.is_ok()).unwrap_or(false);

        let (outcome, message) = match broken {
            Some(stage) => (
                WorkflowOutcome::PipelineBroken { stage },
                format!("pipeline broke at {stage}"),
            ),
            None if execution_ok => (WorkflowOutcome::Succeeded, "all stages succeeded".to_string()),
            None => (
                WorkflowOutcome::ExecutionFailed,
                match execution {
                    Some(o) => format!("artifact ran but {}", o.describe()),
                    None => "artifact was not executed".to_string(),
                },
            ),
        };

        WorkflowVerdict {
            success: outcome == WorkflowOutcome::Succeeded,
            outcome,
            failed_stages,
            message,
        }
    }
}
