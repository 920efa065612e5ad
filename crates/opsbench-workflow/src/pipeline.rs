//! Gated single-pass workflow controller.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use opsbench_core::domain::panic_message;
use opsbench_core::obs::{self, TaskSpan};
use opsbench_core::prompts;
use opsbench_core::reporting::{excerpt, Report, SUMMARY_EXCERPT_CHARS};
use opsbench_core::{
    extract_code, strip_code_blocks, Artifact, ArtifactExecutor, EnvironmentResolver,
    ExecutionOutcome, Task, TaskController, TaskOutcome,
};
use opsbench_oracle::{GenerationParams, Oracle};
use serde::{Deserialize, Serialize};
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::error::{Result, WorkflowError};
use crate::gate::{WorkflowGate, WorkflowOutcome};
use crate::prune::prune_artifacts;
use crate::stage::{StageRecord, WorkflowStage};

/// Workflow settings.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Directory for persisted artifacts.
    pub temp_dir: PathBuf,
    /// Artifact files are named `<component>_<unix-ts>.py`.
    pub component: String,
    pub execution_timeout: Duration,
    /// Artifacts kept after a run; 0 disables pruning.
    pub keep_latest: usize,
    pub analysis: GenerationParams,
    pub synthesis: GenerationParams,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from("./temp_opensees"),
            component: "opensees".to_string(),
            execution_timeout: Duration::from_secs(120),
            keep_latest: 5,
            analysis: GenerationParams::synthesis(),
            synthesis: GenerationParams::synthesis(),
        }
    }
}

impl WorkflowConfig {
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn with_keep_latest(mut self, keep: usize) -> Self {
        self.keep_latest = keep;
        self
    }
}

/// Structured result of one workflow run, produced by the summarize stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowReport {
    pub run_id: String,
    pub task_id: Uuid,
    pub task_index: usize,
    pub instruction: String,
    pub success: bool,
    pub outcome: WorkflowOutcome,
    pub stages: Vec<StageRecord>,
    /// Gated stages that failed or never ran.
    pub failed_stages: Vec<WorkflowStage>,
    pub errors: Vec<String>,
    pub rationale: Option<String>,
    pub code: Option<String>,
    pub artifact_path: Option<PathBuf>,
    pub execution: Option<ExecutionOutcome>,
    pub runtime: Option<String>,
    pub runtime_degraded: bool,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Report for WorkflowReport {
    fn report_id(&self) -> String {
        self.run_id.clone()
    }
}

impl WorkflowReport {
    pub fn stage(&self, stage: WorkflowStage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    pub fn render_summary(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = vec![rule.clone(), "OpsBench workflow".to_string(), rule.clone()];

        out.push(format!("Run:         {}", self.run_id));
        out.push(format!("Instruction: {}", self.instruction));
        out.push(format!(
            "Status:      {} ({})",
            if self.success { "SUCCESS" } else { "FAILURE" },
            self.message
        ));
        if let Some(runtime) = &self.runtime {
            out.push(format!(
                "Runtime:     {}{}",
                runtime,
                if self.runtime_degraded { " (degraded)" } else { "" }
            ));
        }

        out.push(String::new());
        for record in &self.stages {
            out.push(format!("  {:<11} {}", record.stage.name(), record.status));
        }

        if !self.failed_stages.is_empty() {
            let names: Vec<&str> = self.failed_stages.iter().map(|s| s.name()).collect();
            out.push(format!("\nFailed stages: {}", names.join(", ")));
        }
        if !self.errors.is_empty() {
            out.push("\nErrors:".to_string());
            for err in &self.errors {
                out.push(format!("  - {}", excerpt(err, SUMMARY_EXCERPT_CHARS)));
            }
        }
        if let Some(rationale) = &self.rationale {
            out.push(format!("\nPlan:\n{}", excerpt(rationale, SUMMARY_EXCERPT_CHARS)));
        }
        if let Some(code) = &self.code {
            out.push(format!("\nCode:\n{}", excerpt(code, SUMMARY_EXCERPT_CHARS)));
        }
        if let Some(execution) = &self.execution {
            out.push(format!("\nExecution: {}", execution.describe()));
            if !execution.stdout.trim().is_empty() {
                out.push(format!(
                    "Output:\n{}",
                    excerpt(&execution.stdout, SUMMARY_EXCERPT_CHARS)
                ));
            }
        }

        out.push(rule);
        out.join("\n")
    }
}

/// Intermediate values handed from stage to stage.
#[derive(Default)]
struct Scratch {
    rationale: Option<String>,
    response: Option<String>,
    code: Option<String>,
    artifact: Option<Artifact>,
    execution: Option<ExecutionOutcome>,
    runtime: Option<String>,
    runtime_degraded: bool,
}

/// The gated workflow controller.
pub struct WorkflowController {
    oracle: Arc<dyn Oracle>,
    executor: Arc<dyn ArtifactExecutor>,
    resolver: Arc<EnvironmentResolver>,
    config: WorkflowConfig,
}

impl WorkflowController {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        executor: Arc<dyn ArtifactExecutor>,
        resolver: Arc<EnvironmentResolver>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            oracle,
            executor,
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub async fn run(&self, task: &Task) -> Result<WorkflowReport> {
        self.run_indexed(1, task).await
    }

    /// Run all six stages once. Errors only on an invalid task; stage
    /// failures are recorded in the report.
    pub async fn run_indexed(&self, task_index: usize, task: &Task) -> Result<WorkflowReport> {
        task.validate()?;
        let run_id = format!("workflow_{}-{}", task_index, task.short_id());
        let span = TaskSpan::span(&run_id, "workflow");
        Ok(self.drive(run_id, task_index, task).instrument(span).await)
    }

    async fn drive(&self, run_id: String, task_index: usize, task: &Task) -> WorkflowReport {
        let started_at = Utc::now();
        obs::emit_task_started(&run_id, "workflow", task_index);

        let mut scratch = Scratch::default();
        let mut records: Vec<StageRecord> = Vec::new();

        for stage in WorkflowStage::ALL.iter().copied().filter(|s| s.is_gated()) {
            if let Err(blocked_by) = WorkflowGate::may_run(stage, &records) {
                info!(stage = %stage, blocked_by = %blocked_by, "Skipping stage");
                obs::emit_stage_finished(&run_id, stage.name(), "not_run", 0);
                records.push(StageRecord::not_run(stage, blocked_by));
                continue;
            }

            let start = Instant::now();
            let result = AssertUnwindSafe(self.run_stage(stage, task, &mut scratch))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(WorkflowError::Panicked(panic_message(payload.as_ref())))
                });
            let duration_ms = start.elapsed().as_millis() as u64;

            let record = match result {
                Ok(()) => StageRecord::succeeded(stage, duration_ms),
                Err(e) => StageRecord::failed(stage, e.to_string(), duration_ms),
            };
            obs::emit_stage_finished(
                &run_id,
                stage.name(),
                &record.status.to_string(),
                duration_ms,
            );
            records.push(record);
        }

        // Summarize always runs.
        let report = self.summarize(run_id, task_index, task, records, scratch, started_at);
        obs::emit_task_finished(
            &report.run_id,
            report.duration_ms,
            report.stages.iter().filter(|r| r.ran()).count(),
            report.success,
        );

        if self.config.keep_latest > 0 {
            prune_artifacts(
                &self.config.temp_dir,
                &self.config.component,
                self.config.keep_latest,
            );
        }
        report
    }

    async fn run_stage(
        &self,
        stage: WorkflowStage,
        task: &Task,
        scratch: &mut Scratch,
    ) -> Result<()> {
        match stage {
            WorkflowStage::Analyze => {
                let prompt = prompts::analysis_prompt(task);
                let text = self.oracle.generate(&prompt, &self.config.analysis).await?;
                let rationale = strip_code_blocks(&text);
                if rationale.is_empty() {
                    return Err(WorkflowError::EmptyRationale);
                }
                scratch.rationale = Some(rationale);
            }
            WorkflowStage::Synthesize => {
                let prompt =
                    prompts::synthesis_prompt(task, scratch.rationale.as_deref(), None);
                let text = self.oracle.generate(&prompt, &self.config.synthesis).await?;
                scratch.response = Some(text);
            }
            WorkflowStage::Extract => {
                let code = extract_code(scratch.response.as_deref().unwrap_or(""));
                if code.is_empty() {
                    return Err(WorkflowError::NoCode);
                }
                scratch.code = Some(code);
            }
            WorkflowStage::Persist => {
                let code = scratch.code.as_deref().unwrap_or("");
                let path = fresh_artifact_path(&self.config.temp_dir, &self.config.component);
                let artifact = Artifact::persist(code, &path)?;
                info!(path = %path.display(), "Artifact persisted");
                scratch.artifact = Some(artifact);
            }
            WorkflowStage::Execute => {
                let Some(artifact) = scratch.artifact.as_ref() else {
                    return Err(WorkflowError::Execution("had no artifact".to_string()));
                };
                let runtime = self.resolver.resolve().await;
                scratch.runtime = Some(runtime.identifier.clone());
                scratch.runtime_degraded = runtime.degraded;

                let outcome = self
                    .executor
                    .run(&runtime, artifact.path(), self.config.execution_timeout)
                    .await;
                let failed = !outcome.is_ok();
                let detail = if failed {
                    let stderr = outcome.stderr_tail(prompts::STDERR_TAIL_CHARS);
                    let stderr = stderr.trim();
                    Some(if stderr.is_empty() {
                        outcome.describe()
                    } else {
                        format!("{}: {}", outcome.describe(), stderr)
                    })
                } else {
                    None
                };
                scratch.execution = Some(outcome);
                if let Some(detail) = detail {
                    return Err(WorkflowError::Execution(detail));
                }
            }
            WorkflowStage::Summarize => {}
        }
        Ok(())
    }

    fn summarize(
        &self,
        run_id: String,
        task_index: usize,
        task: &Task,
        mut records: Vec<StageRecord>,
        scratch: Scratch,
        started_at: DateTime<Utc>,
    ) -> WorkflowReport {
        let start = Instant::now();
        let verdict = WorkflowGate::evaluate(&records, scratch.execution.as_ref());
        let errors: Vec<String> = records
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {}", r.stage, e)))
            .collect();
        let summarize_ms = start.elapsed().as_millis() as u64;
        obs::emit_stage_finished(
            &run_id,
            WorkflowStage::Summarize.name(),
            "succeeded",
            summarize_ms,
        );
        records.push(StageRecord::succeeded(WorkflowStage::Summarize, summarize_ms));

        let finished_at = Utc::now();
        WorkflowReport {
            run_id,
            task_id: task.id,
            task_index,
            instruction: task.instruction.clone(),
            success: verdict.success,
            outcome: verdict.outcome,
            stages: records,
            failed_stages: verdict.failed_stages,
            errors,
            rationale: scratch.rationale,
            code: scratch.code,
            artifact_path: scratch.artifact.map(|a| a.path().to_path_buf()),
            execution: scratch.execution,
            runtime: scratch.runtime,
            runtime_degraded: scratch.runtime_degraded,
            message: verdict.message,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        }
    }
}

/// `<dir>/<component>_<unix-ts>.py`, with a numeric suffix if that name is
/// already taken.
fn fresh_artifact_path(dir: &Path, component: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let base = dir.join(format!("{component}_{ts}.py"));
    if !base.exists() {
        return base;
    }
    (1..)
        .map(|n| dir.join(format!("{component}_{ts}_{n}.py")))
        .find(|p| !p.exists())
        .unwrap_or(base)
}

#[async_trait]
impl TaskController for WorkflowController {
    fn name(&self) -> &'static str {
        "workflow"
    }

    async fn run_task(
        &self,
        task_index: usize,
        task: &Task,
    ) -> opsbench_core::Result<TaskOutcome> {
        let report = self.run_indexed(task_index, task).await.map_err(|e| match e {
            WorkflowError::Bench(inner) => inner,
            other => opsbench_core::BenchError::InvalidTask(other.to_string()),
        })?;
        Ok(TaskOutcome {
            success: report.success,
            steps: report.stages.iter().filter(|r| r.ran()).count(),
            error: (!report.success).then(|| report.message.clone()),
            summary: report.render_summary(),
            report: serde_json::to_value(&report)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fresh_artifact_path_avoids_collisions() {
        let dir = tempdir().unwrap();
        let first = fresh_artifact_path(dir.path(), "opensees");
        std::fs::write(&first, "x").unwrap();
        let second = fresh_artifact_path(dir.path(), "opensees");
        assert_ne!(first, second);
        let name = second.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("opensees_"));
        assert!(name.ends_with(".py"));
    }

    #[test]
    fn test_workflow_config_defaults() {
        let c = WorkflowConfig::default();
        assert_eq!(c.execution_timeout, Duration::from_secs(120));
        assert_eq!(c.keep_latest, 5);
        assert_eq!(c.temp_dir, PathBuf::from("./temp_opensees"));
    }
}
