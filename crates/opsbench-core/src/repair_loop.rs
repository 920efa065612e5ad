//! Repair loop controller: generate, persist, execute, classify, repeat.
//!
//! Each task gets up to `max_iterations` passes. Every pass appends exactly
//! one [`IterationRecord`]; the loop stops at the first successful verdict.
//! Failures inside a pass (oracle errors, write errors, panics) end only that
//! pass.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use opsbench_oracle::{GenerationParams, Oracle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::batch::{TaskController, TaskOutcome};
use crate::domain::{
    panic_message, parse_confirmation, Artifact, ClassificationSource, Confirmation,
    ExecutionOutcome, IterationRecord, LoopState, Result, Task, Verdict,
};
use crate::environment::{EnvironmentResolver, RuntimeHandle};
use crate::extract::extract_code;
use crate::obs::{self, TaskSpan};
use crate::prompts::{self, RepairContext, STDERR_TAIL_CHARS};
use crate::reporting::{excerpt, Report, SUMMARY_EXCERPT_CHARS};
use crate::runner::ArtifactExecutor;

/// Repair loop settings.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: u32,
    /// Per-run timeout for generated programs.
    pub execution_timeout: Duration,
    /// Root for per-task artifact directories.
    pub work_dir: PathBuf,
    /// Artifact files are named `<prefix>-<iteration>.py`.
    pub artifact_prefix: String,
    /// Index used in the task directory name.
    pub task_index: usize,
    pub synthesis: GenerationParams,
    pub classification: GenerationParams,
    /// Count a clean exit as success when the confirmation call fails.
    pub accept_unconfirmed_clean_exit: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            execution_timeout: Duration::from_secs(300),
            work_dir: PathBuf::from("./runs"),
            artifact_prefix: "opensees".to_string(),
            task_index: 1,
            synthesis: GenerationParams::synthesis(),
            classification: GenerationParams::classification(),
            accept_unconfirmed_clean_exit: false,
        }
    }
}

impl LoopConfig {
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }
}

/// Outcome of one task run through the repair loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopReport {
    /// Directory name under the work dir, `task_<index>-<short id>`.
    pub run_id: String,
    pub task_id: Uuid,
    pub task_index: usize,
    pub instruction: String,
    pub final_success: bool,
    pub iterations: Vec<IterationRecord>,
    /// Failure reason of the last iteration when the loop did not succeed.
    pub last_error: Option<String>,
    pub runtime: String,
    pub runtime_degraded: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Report for LoopReport {
    fn report_id(&self) -> String {
        self.run_id.clone()
    }
}

impl LoopReport {
    pub fn iteration_count(&self) -> usize {
        self.iterations.len()
    }

    /// Artifact of the last iteration that produced one.
    pub fn final_artifact(&self) -> Option<&Artifact> {
        self.iterations.iter().rev().find_map(|r| r.artifact.as_ref())
    }

    pub fn render_summary(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = vec![rule.clone(), "OpsBench repair loop".to_string(), rule.clone()];

        out.push(format!("Run:         {}", self.run_id));
        out.push(format!("Instruction: {}", self.instruction));
        out.push(format!(
            "Runtime:     {}{}",
            self.runtime,
            if self.runtime_degraded { " (degraded)" } else { "" }
        ));
        out.push(format!(
            "Status:      {} after {} iteration(s) in {} ms",
            if self.final_success { "SUCCESS" } else { "FAILURE" },
            self.iterations.len(),
            self.duration_ms
        ));

        out.push(String::new());
        for record in &self.iterations {
            let line = match (&record.outcome, record.failed_at) {
                _ if record.is_success() => "succeeded".to_string(),
                (_, Some(state)) => format!("failed at {state}"),
                (Some(outcome), None) => format!("{}", outcome.status),
                (None, None) => "interrupted".to_string(),
            };
            out.push(format!("  #{:<2} {}", record.index, line));
            if let Some(reason) = record.failure_reason() {
                out.push(format!("      {}", excerpt(&reason, 200).replace('\n', " ")));
            }
        }

        if let Some(err) = &self.last_error {
            out.push(format!("\nLast error: {}", excerpt(err, SUMMARY_EXCERPT_CHARS)));
        }
        if let Some(artifact) = self.final_artifact() {
            out.push(format!("\nFinal artifact: {}", artifact.path().display()));
            out.push(excerpt(artifact.source(), SUMMARY_EXCERPT_CHARS));
        }
        if let Some(outcome) = self.iterations.last().and_then(|r| r.outcome.as_ref()) {
            if !outcome.stdout.trim().is_empty() {
                out.push(format!(
                    "\nOutput:\n{}",
                    excerpt(&outcome.stdout, SUMMARY_EXCERPT_CHARS)
                ));
            }
        }

        out.push(rule);
        out.join("\n")
    }
}

/// The iterative controller.
pub struct RepairLoop {
    oracle: Arc<dyn Oracle>,
    executor: Arc<dyn ArtifactExecutor>,
    resolver: Arc<EnvironmentResolver>,
    config: LoopConfig,
}

impl RepairLoop {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        executor: Arc<dyn ArtifactExecutor>,
        resolver: Arc<EnvironmentResolver>,
        config: LoopConfig,
    ) -> Self {
        Self {
            oracle,
            executor,
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run `task` with the configured task index.
    pub async fn run(&self, task: &Task) -> Result<LoopReport> {
        self.run_indexed(self.config.task_index, task).await
    }

    /// Run `task`, naming its directory after `task_index`.
    ///
    /// Errors only on an invalid task; every other failure is recorded.
    pub async fn run_indexed(&self, task_index: usize, task: &Task) -> Result<LoopReport> {
        task.validate()?;
        let run_id = format!("task_{}-{}", task_index, task.short_id());
        let span = TaskSpan::span(&run_id, "repair");
        self.drive(run_id, task_index, task).instrument(span).await
    }

    async fn drive(&self, run_id: String, task_index: usize, task: &Task) -> Result<LoopReport> {
        let started_at = Utc::now();
        obs::emit_task_started(&run_id, "repair", task_index);

        let runtime = self.resolver.resolve().await;
        let task_dir = self.config.work_dir.join(&run_id);
        let budget = self.config.max_iterations.max(1);

        let mut records: Vec<IterationRecord> = Vec::new();
        let mut repair: Option<RepairContext> = None;

        for index in 1..=budget {
            let iteration_start = Utc::now();
            let pass = AssertUnwindSafe(self.iteration(
                task,
                index,
                &task_dir,
                &runtime,
                repair.as_ref(),
            ))
            .catch_unwind()
            .await;

            let record = match pass {
                Ok((record, next)) => {
                    if next.is_some() {
                        repair = next;
                    }
                    record
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    obs::emit_iteration_degraded(&run_id, index, &message);
                    IterationRecord::degraded(
                        index,
                        format!("iteration panicked: {message}"),
                        iteration_start,
                    )
                }
            };

            let success = record.is_success();
            obs::emit_iteration_finished(
                &run_id,
                index,
                success,
                record.failure_reason().as_deref(),
            );
            records.push(record);
            if success {
                break;
            }
        }

        let final_success = records.last().map(|r| r.is_success()).unwrap_or(false);
        let last_error = if final_success {
            None
        } else {
            records.last().and_then(|r| r.failure_reason())
        };
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        obs::emit_task_finished(&run_id, duration_ms, records.len(), final_success);

        Ok(LoopReport {
            run_id,
            task_id: task.id,
            task_index,
            instruction: task.instruction.clone(),
            final_success,
            iterations: records,
            last_error,
            runtime: runtime.identifier.clone(),
            runtime_degraded: runtime.degraded,
            started_at,
            finished_at,
            duration_ms,
        })
    }

    /// One pass. Returns the record and, when the pass produced a failed
    /// artifact, the repair context for the next pass.
    async fn iteration(
        &self,
        task: &Task,
        index: u32,
        task_dir: &Path,
        runtime: &RuntimeHandle,
        repair: Option<&RepairContext>,
    ) -> (IterationRecord, Option<RepairContext>) {
        let started_at = Utc::now();

        // Generate
        let prompt = prompts::synthesis_prompt(task, None, repair);
        let response = match self.oracle.generate(&prompt, &self.config.synthesis).await {
            Ok(text) => text,
            Err(e) => {
                return (
                    IterationRecord::failed(index, LoopState::Generate, e.to_string(), started_at),
                    None,
                )
            }
        };
        let code = extract_code(&response);
        if code.is_empty() {
            return (
                IterationRecord::failed(
                    index,
                    LoopState::Generate,
                    "oracle response contained no code",
                    started_at,
                ),
                None,
            );
        }

        // Persist
        let path = task_dir.join(format!("{}-{}.py", self.config.artifact_prefix, index));
        let artifact = match Artifact::persist(&code, &path) {
            Ok(artifact) => artifact,
            Err(e) => {
                return (
                    IterationRecord::failed(index, LoopState::Persist, e.to_string(), started_at),
                    None,
                )
            }
        };
        debug!(
            iteration = index,
            path = %path.display(),
            lines = artifact.line_count(),
            "Artifact persisted"
        );

        // Execute
        let outcome = self
            .executor
            .run(runtime, artifact.path(), self.config.execution_timeout)
            .await;
        info!(
            iteration = index,
            status = %outcome.status,
            wall_time_ms = outcome.wall_time_ms,
            "Artifact executed"
        );

        // Classify
        let verdict = self.classify(task, &artifact, &outcome, runtime).await;
        let next = if verdict.is_success {
            None
        } else {
            let reason = verdict
                .reason
                .clone()
                .unwrap_or_else(|| outcome.describe());
            Some(RepairContext::new(artifact.source(), reason, &outcome.stderr))
        };

        (
            IterationRecord::classified(index, artifact, outcome, verdict, started_at),
            next,
        )
    }

    async fn classify(
        &self,
        task: &Task,
        artifact: &Artifact,
        outcome: &ExecutionOutcome,
        runtime: &RuntimeHandle,
    ) -> Verdict {
        let params = &self.config.classification;

        if !outcome.is_ok() {
            let prompt = prompts::root_cause_prompt(artifact.source(), outcome);
            let verdict = match self.oracle.generate(&prompt, params).await {
                Ok(text) if !text.trim().is_empty() => {
                    Verdict::execution_failure(text.trim(), ClassificationSource::Oracle)
                }
                Ok(_) => Verdict::execution_failure(
                    heuristic_reason(outcome),
                    ClassificationSource::Heuristic,
                ),
                Err(e) => {
                    debug!(error = %e, "Root-cause call failed; using stderr");
                    Verdict::execution_failure(
                        heuristic_reason(outcome),
                        ClassificationSource::Heuristic,
                    )
                }
            };
            return verdict.with_environment_suspect(runtime.degraded);
        }

        let prompt = prompts::confirmation_prompt(task, artifact.source(), outcome);
        match self.oracle.generate(&prompt, params).await {
            Ok(answer) => match parse_confirmation(&answer) {
                Confirmation::Affirmed => Verdict::confirmed_success(),
                Confirmation::Denied(reason) => Verdict::rejected_clean_exit(reason),
            },
            Err(e) => Verdict::unconfirmed(
                self.config.accept_unconfirmed_clean_exit,
                format!("clean exit could not be confirmed: {e}"),
            ),
        }
    }
}

/// Reason used when the oracle cannot summarize a failed run.
fn heuristic_reason(outcome: &ExecutionOutcome) -> String {
    let stderr = outcome.stderr_tail(STDERR_TAIL_CHARS);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        outcome.describe()
    } else {
        format!("{}: {}", outcome.describe(), stderr)
    }
}

#[async_trait]
impl TaskController for RepairLoop {
    fn name(&self) -> &'static str {
        "repair"
    }

    async fn run_task(&self, task_index: usize, task: &Task) -> Result<TaskOutcome> {
        let report = self.run_indexed(task_index, task).await?;
        Ok(TaskOutcome {
            success: report.final_success,
            steps: report.iterations.len(),
            error: report.last_error.clone(),
            summary: report.render_summary(),
            report: serde_json::to_value(&report)?,
        })
    }
}
