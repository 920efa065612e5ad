use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use opsbench_core::{
    read_report, write_report, ArtifactExecutor, EnvironmentResolver, ExecutionOutcome,
    ExitStatus, RuntimeHandle, Task,
};
use opsbench_oracle::{GenerationFailure, GenerationParams, Oracle};
use opsbench_workflow::{
    StageStatus, WorkflowConfig, WorkflowController, WorkflowOutcome, WorkflowReport,
    WorkflowStage,
};
use tempfile::tempdir;

/// Oracle with one scripted answer for analysis and one for synthesis.
struct StagedOracle {
    analysis: Result<String, GenerationFailure>,
    synthesis: Result<String, GenerationFailure>,
    prompts: Mutex<Vec<String>>,
}

impl StagedOracle {
    fn new(analysis: &str, synthesis: &str) -> Self {
        Self {
            analysis: Ok(analysis.to_string()),
            synthesis: Ok(synthesis.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing_analysis() -> Self {
        Self {
            analysis: Err(GenerationFailure::Transient {
                attempts: 3,
                last_error: "connection reset".to_string(),
            }),
            synthesis: Ok("unused".to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl Oracle for StagedOracle {
    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, GenerationFailure> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.starts_with("Analyze this OpenSees task") {
            self.analysis.clone()
        } else {
            self.synthesis.clone()
        }
    }
}

struct FixedExecutor {
    status: ExitStatus,
    stdout: String,
    stderr: String,
    calls: AtomicUsize,
}

impl FixedExecutor {
    fn new(status: ExitStatus, stdout: &str, stderr: &str) -> Self {
        Self {
            status,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ArtifactExecutor for FixedExecutor {
    async fn run(
        &self,
        runtime: &RuntimeHandle,
        path: &Path,
        _timeout: Duration,
    ) -> ExecutionOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(path.exists(), "executor got a path that was never written");
        ExecutionOutcome {
            status: self.status,
            exit_code: match self.status {
                ExitStatus::Ok => Some(0),
                ExitStatus::NonZero => Some(1),
                _ => None,
            },
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            wall_time_ms: 5,
            runtime: runtime.identifier.clone(),
        }
    }
}

const PROGRAM: &str = "```python\nimport openseespy.opensees as ops\nops.wipe()\nprint('disp', 0.25)\n```";

fn controller(
    oracle: Arc<StagedOracle>,
    executor: Arc<FixedExecutor>,
    dir: &Path,
) -> WorkflowController {
    WorkflowController::new(
        oracle,
        executor,
        Arc::new(EnvironmentResolver::fixed(RuntimeHandle::unprobed("python3"))),
        WorkflowConfig::default().with_temp_dir(dir.join("temp_opensees")),
    )
}

fn task() -> Task {
    Task::new(
        "model BasicBuilder -ndm 2 -ndf 3\nnode 1 0.0 0.0",
        "Report the tip displacement",
    )
}

#[tokio::test]
async fn full_success_persists_and_runs_the_artifact() {
    let dir = tempdir().unwrap();
    let oracle = Arc::new(StagedOracle::new("1. build nodes\n2. run analysis", PROGRAM));
    let executor = Arc::new(FixedExecutor::new(ExitStatus::Ok, "disp 0.25\n", ""));

    let report = controller(oracle.clone(), executor.clone(), dir.path())
        .run(&task())
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.outcome, WorkflowOutcome::Succeeded);
    assert!(report.failed_stages.is_empty());
    assert_eq!(report.stages.len(), 6);
    assert!(report.stages.iter().all(|r| r.status == StageStatus::Succeeded));
    assert_eq!(oracle.calls(), 2);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);

    let path = report.artifact_path.clone().unwrap();
    let name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("opensees_") && name.ends_with(".py"), "{name}");
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("ops.wipe()"));
    assert!(!written.contains("```"));

    // The synthesis prompt carries the analysis plan.
    let prompts = oracle.prompts.lock().unwrap();
    assert!(prompts[1].contains("build nodes"));

    let text = report.render_summary();
    assert!(text.contains("SUCCESS"));
    assert!(text.contains("disp 0.25"));
}

#[tokio::test]
async fn analyze_failure_blocks_every_later_stage_but_summarize() {
    let dir = tempdir().unwrap();
    let oracle = Arc::new(StagedOracle::failing_analysis());
    let executor = Arc::new(FixedExecutor::new(ExitStatus::Ok, "", ""));

    let report = controller(oracle.clone(), executor.clone(), dir.path())
        .run(&task())
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(
        report.outcome,
        WorkflowOutcome::PipelineBroken {
            stage: WorkflowStage::Analyze
        }
    );
    assert_eq!(oracle.calls(), 1);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);

    let analyze = report.stage(WorkflowStage::Analyze).unwrap();
    assert_eq!(analyze.status, StageStatus::Failed);
    assert!(analyze.error.as_deref().unwrap().contains("connection reset"));

    for stage in [
        WorkflowStage::Synthesize,
        WorkflowStage::Extract,
        WorkflowStage::Persist,
        WorkflowStage::Execute,
    ] {
        let record = report.stage(stage).unwrap();
        assert_eq!(record.status, StageStatus::NotRun, "{stage}");
    }
    assert_eq!(
        report.stage(WorkflowStage::Summarize).unwrap().status,
        StageStatus::Succeeded
    );
    assert_eq!(report.failed_stages.len(), 5);
    assert!(report.artifact_path.is_none());
}

#[tokio::test]
async fn missing_code_fails_at_extract() {
    let dir = tempdir().unwrap();
    let oracle = Arc::new(StagedOracle::new("plan", "```python\n\n```"));
    let executor = Arc::new(FixedExecutor::new(ExitStatus::Ok, "", ""));

    let report = controller(oracle, executor.clone(), dir.path())
        .run(&task())
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        WorkflowOutcome::PipelineBroken {
            stage: WorkflowStage::Extract
        }
    );
    assert_eq!(
        report.stage(WorkflowStage::Persist).unwrap().blocked_by,
        Some(WorkflowStage::Extract)
    );
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn execution_failure_is_reported_separately_from_pipeline_breakage() {
    let dir = tempdir().unwrap();
    let oracle = Arc::new(StagedOracle::new("plan", PROGRAM));
    let executor = Arc::new(FixedExecutor::new(
        ExitStatus::NonZero,
        "",
        "NameError: name 'ops' is not defined",
    ));

    let report = controller(oracle, executor, dir.path())
        .run(&task())
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.outcome, WorkflowOutcome::ExecutionFailed);
    assert_eq!(report.failed_stages, vec![WorkflowStage::Execute]);
    let execute = report.stage(WorkflowStage::Execute).unwrap();
    assert_eq!(execute.status, StageStatus::Failed);
    assert!(execute.error.as_deref().unwrap().contains("NameError"));
    assert_eq!(report.execution.as_ref().unwrap().status, ExitStatus::NonZero);
    assert!(report.artifact_path.unwrap().exists());
}

#[tokio::test]
async fn workflow_report_persists_with_digest() {
    let dir = tempdir().unwrap();
    let oracle = Arc::new(StagedOracle::new("plan", PROGRAM));
    let executor = Arc::new(FixedExecutor::new(ExitStatus::Ok, "ok", ""));

    let report = controller(oracle, executor, dir.path())
        .run(&task())
        .await
        .unwrap();

    let reports = dir.path().join("reports");
    write_report(&report, &reports).unwrap();
    let back: WorkflowReport = read_report(&report.run_id, &reports).unwrap();
    assert_eq!(back, report);
}

#[tokio::test]
async fn empty_instruction_is_rejected_before_any_stage() {
    let dir = tempdir().unwrap();
    let oracle = Arc::new(StagedOracle::new("plan", PROGRAM));
    let executor = Arc::new(FixedExecutor::new(ExitStatus::Ok, "", ""));

    let result = controller(oracle.clone(), executor, dir.path())
        .run(&Task::new("wipe", "   "))
        .await;

    assert!(result.is_err());
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn synthesize_failure_blocks_extract_and_everything_after() {
    let dir = tempdir().unwrap();
    let oracle = Arc::new(StagedOracle {
        analysis: Ok("1. build nodes".to_string()),
        synthesis: Err(GenerationFailure::Rejected {
            status: Some(400),
            message: "request too large".to_string(),
        }),
        prompts: Mutex::new(Vec::new()),
    });
    let executor = Arc::new(FixedExecutor::new(ExitStatus::Ok, "", ""));

    let report = controller(oracle.clone(), executor.clone(), dir.path())
        .run(&task())
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        WorkflowOutcome::PipelineBroken {
            stage: WorkflowStage::Synthesize
        }
    );
    assert_eq!(oracle.calls(), 2);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    assert!(report
        .stage(WorkflowStage::Synthesize)
        .unwrap()
        .error
        .as_deref()
        .unwrap()
        .contains("HTTP 400"));
    for stage in [
        WorkflowStage::Extract,
        WorkflowStage::Persist,
        WorkflowStage::Execute,
    ] {
        assert_eq!(report.stage(stage).unwrap().status, StageStatus::NotRun, "{stage}");
    }
    assert_eq!(
        report.stage(WorkflowStage::Summarize).unwrap().status,
        StageStatus::Succeeded
    );
    assert!(report.rationale.is_some());
    assert!(report.code.is_none());
}

#[tokio::test]
async fn unwritable_temp_dir_fails_persist_and_skips_execution() {
    let dir = tempdir().unwrap();
    // A regular file where the temp directory's parent should be.
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, "x").unwrap();

    let oracle = Arc::new(StagedOracle::new("plan", PROGRAM));
    let executor = Arc::new(FixedExecutor::new(ExitStatus::Ok, "", ""));
    let report = WorkflowController::new(
        oracle,
        executor.clone(),
        Arc::new(EnvironmentResolver::fixed(RuntimeHandle::unprobed("python3"))),
        WorkflowConfig::default().with_temp_dir(blocker.join("temp_opensees")),
    )
    .run(&task())
    .await
    .unwrap();

    assert!(!report.success);
    assert_eq!(
        report.outcome,
        WorkflowOutcome::PipelineBroken {
            stage: WorkflowStage::Persist
        }
    );
    assert_eq!(report.stage(WorkflowStage::Persist).unwrap().status, StageStatus::Failed);
    let execute = report.stage(WorkflowStage::Execute).unwrap();
    assert_eq!(execute.status, StageStatus::NotRun);
    assert_eq!(execute.blocked_by, Some(WorkflowStage::Persist));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    assert!(report.code.is_some());
    assert!(report.artifact_path.is_none());
    assert!(report.execution.is_none());
}
