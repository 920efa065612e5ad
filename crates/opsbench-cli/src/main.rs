//! OpsBench CLI
//!
//! The `opsbench` command drives a code-generating oracle against OpenSees
//! structural-analysis tasks.
//!
//! ## Commands
//!
//! - `repair`: iterative generate/execute/classify loop for one task
//! - `workflow`: single-pass gated workflow for one task
//! - `batch`: run a manifest of tasks through either controller
//! - `resolve`: show which Python runtime would be used
//! - `verify`: compare program output against the native solver

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use opsbench_core::{
    write_report, BatchManifest, BatchRunner, EnvironmentResolver, LoopConfig, ProcessRunner,
    ReferenceVerifier, RepairLoop, ResolverConfig, Task, TaskController, VerificationStatus,
};
use opsbench_oracle::{OracleClient, OracleConfig};
use opsbench_workflow::{WorkflowConfig, WorkflowController};
use serde::Serialize;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "opsbench")]
#[command(author = "OpsBench Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Benchmark harness for LLM-generated OpenSees programs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Root directory for run artifacts and reports
    #[arg(long, global = true, default_value = "./runs")]
    output_dir: PathBuf,

    /// Oracle API key
    #[arg(long, global = true, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Oracle model name
    #[arg(id = "oracle_model", long = "model", global = true, env = "OPSBENCH_MODEL")]
    model: Option<String>,

    /// Proxy for oracle requests
    #[arg(long, global = true, env = "HTTPS_PROXY")]
    proxy: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate, run and repair a program until it succeeds
    Repair {
        /// Structural model file (TCL)
        model: PathBuf,

        /// What to compute
        #[arg(required = true, num_args = 1..)]
        instruction: Vec<String>,

        /// Iteration budget
        #[arg(long, default_value = "10")]
        max_iterations: u32,

        /// Per-execution timeout in seconds
        #[arg(long, default_value = "300")]
        timeout_secs: u64,

        /// Count a clean exit as success when the oracle cannot confirm it
        #[arg(long)]
        accept_unconfirmed: bool,
    },

    /// Run the six-stage gated workflow once
    Workflow {
        /// Structural model file (TCL)
        model: PathBuf,

        /// What to compute
        #[arg(required = true, num_args = 1..)]
        instruction: Vec<String>,

        /// Per-execution timeout in seconds
        #[arg(long, default_value = "120")]
        timeout_secs: u64,
    },

    /// Run every task in a JSON manifest
    Batch {
        /// Manifest path
        manifest: PathBuf,

        /// Controller used for each task
        #[arg(long, value_enum, default_value = "repair")]
        mode: Mode,

        /// Pause between tasks, in seconds
        #[arg(long, default_value = "2")]
        delay_secs: u64,
    },

    /// Resolve and print the Python runtime
    Resolve {
        /// Skip venv provisioning when no candidate is compatible
        #[arg(long)]
        no_provision: bool,
    },

    /// Compare a program's output against the native solver
    Verify {
        /// Structural model file (TCL)
        model: PathBuf,

        /// File holding the program's stdout
        stdout_file: PathBuf,

        /// Native solver executable
        #[arg(long, default_value = "OpenSees")]
        solver: PathBuf,

        /// Relative tolerance
        #[arg(long, default_value = "0.1")]
        tolerance: f64,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Repair,
    Workflow,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    opsbench_core::init_tracing(cli.json, level);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatch a command. `Ok(false)` means the command ran but did not succeed.
async fn run(cli: Cli) -> Result<bool> {
    match &cli.command {
        Commands::Repair {
            model,
            instruction,
            max_iterations,
            timeout_secs,
            accept_unconfirmed,
        } => {
            let task = load_task(model, instruction)?;
            let config = LoopConfig {
                accept_unconfirmed_clean_exit: *accept_unconfirmed,
                ..LoopConfig::default()
            }
            .with_work_dir(&cli.output_dir)
            .with_max_iterations(*max_iterations)
            .with_execution_timeout(Duration::from_secs(*timeout_secs));
            cmd_repair(&cli, config, &task).await
        }
        Commands::Workflow {
            model,
            instruction,
            timeout_secs,
        } => {
            let task = load_task(model, instruction)?;
            let config = WorkflowConfig::default()
                .with_temp_dir(cli.output_dir.join("temp_opensees"))
                .with_execution_timeout(Duration::from_secs(*timeout_secs));
            cmd_workflow(&cli, config, &task).await
        }
        Commands::Batch {
            manifest,
            mode,
            delay_secs,
        } => cmd_batch(&cli, manifest, *mode, Duration::from_secs(*delay_secs)).await,
        Commands::Resolve { no_provision } => cmd_resolve(&cli, *no_provision).await,
        Commands::Verify {
            model,
            stdout_file,
            solver,
            tolerance,
        } => cmd_verify(&cli, model, stdout_file, solver, *tolerance).await,
    }
}

fn load_task(model: &Path, instruction: &[String]) -> Result<Task> {
    let task = Task::from_file(model, instruction.join(" "))
        .with_context(|| format!("Failed to load model {}", model.display()))?;
    task.validate().context("Invalid task")?;
    Ok(task)
}

fn oracle_config(cli: &Cli) -> OracleConfig {
    let mut config = OracleConfig::from_env();
    if let Some(key) = &cli.api_key {
        config.api_key = key.clone();
    }
    if let Some(model) = &cli.model {
        config = config.with_model(model);
    }
    if let Some(proxy) = cli.proxy.as_deref().filter(|p| !p.is_empty()) {
        config = config.with_proxy(proxy);
    }
    config
}

fn build_oracle(cli: &Cli) -> Result<Arc<OracleClient>> {
    let client = OracleClient::new(oracle_config(cli)).context("Failed to initialise oracle")?;
    info!(model = %client.config().model, "Oracle ready");
    Ok(Arc::new(client))
}

fn resolver_config(cli: &Cli) -> ResolverConfig {
    ResolverConfig::default().with_managed_dir(cli.output_dir.join("opensees_venv"))
}

fn reports_dir(cli: &Cli) -> PathBuf {
    cli.output_dir.join("reports")
}

async fn cmd_repair(cli: &Cli, config: LoopConfig, task: &Task) -> Result<bool> {
    let controller = RepairLoop::new(
        build_oracle(cli)?,
        Arc::new(ProcessRunner::new()),
        Arc::new(EnvironmentResolver::new(resolver_config(cli))),
        config,
    );

    let report = controller.run(task).await.context("Repair loop failed")?;
    let path = write_report(&report, &reports_dir(cli)).context("Failed to write report")?;

    println!("{}", report.render_summary());
    println!("Report: {}", path.display());
    Ok(report.final_success)
}

async fn cmd_workflow(cli: &Cli, config: WorkflowConfig, task: &Task) -> Result<bool> {
    let controller = WorkflowController::new(
        build_oracle(cli)?,
        Arc::new(ProcessRunner::new()),
        Arc::new(EnvironmentResolver::new(resolver_config(cli))),
        config,
    );

    let report = controller.run(task).await.context("Workflow failed")?;
    let path = write_report(&report, &reports_dir(cli)).context("Failed to write report")?;

    println!("{}", report.render_summary());
    println!("Report: {}", path.display());
    Ok(report.success)
}

async fn cmd_batch(cli: &Cli, manifest: &Path, mode: Mode, delay: Duration) -> Result<bool> {
    let base = manifest.parent().unwrap_or_else(|| Path::new("."));
    let items = BatchManifest::load(manifest)
        .with_context(|| format!("Failed to load manifest {}", manifest.display()))?
        .into_items(base);
    anyhow::ensure!(!items.is_empty(), "Manifest {} has no tasks", manifest.display());

    let oracle = build_oracle(cli)?;
    let executor = Arc::new(ProcessRunner::new());
    let resolver = Arc::new(EnvironmentResolver::new(resolver_config(cli)));

    let controller: Arc<dyn TaskController> = match mode {
        Mode::Repair => Arc::new(RepairLoop::new(
            oracle,
            executor,
            resolver,
            LoopConfig::default().with_work_dir(&cli.output_dir),
        )),
        Mode::Workflow => Arc::new(WorkflowController::new(
            oracle,
            executor,
            resolver,
            WorkflowConfig::default().with_temp_dir(cli.output_dir.join("temp_opensees")),
        )),
    };

    let summary = BatchRunner::new(controller)
        .with_delay(delay)
        .run(items)
        .await;
    let path = write_report(&summary, &reports_dir(cli)).context("Failed to write summary")?;

    println!("{}", summary.render_summary());
    println!("Summary: {}", path.display());
    Ok(summary.total > 0 && summary.succeeded == summary.total)
}

async fn cmd_resolve(cli: &Cli, no_provision: bool) -> Result<bool> {
    let mut config = resolver_config(cli);
    if no_provision {
        config = config.without_provisioning();
    }
    let handle = EnvironmentResolver::new(config).resolve().await;

    if cli.json {
        print_json(&handle)?;
    } else {
        println!(
            "Runtime: {} ({:?}{})",
            handle.identifier,
            handle.source,
            if handle.degraded { ", degraded" } else { "" }
        );
        for candidate in &handle.candidates {
            let mark = if candidate.compatible { "✓" } else { "✗" };
            match candidate.probe.reason() {
                Some(reason) => println!("  {} {} - {}", mark, candidate.identifier, reason),
                None => println!("  {} {}", mark, candidate.identifier),
            }
        }
        if let Some(report) = &handle.provision {
            println!("Provisioning:");
            for step in &report.steps {
                let mark = if step.success { "✓" } else { "✗" };
                println!("  {} {} ({}ms)", mark, step.description, step.duration_ms);
            }
        }
    }
    Ok(!handle.degraded)
}

async fn cmd_verify(
    cli: &Cli,
    model: &Path,
    stdout_file: &Path,
    solver: &Path,
    tolerance: f64,
) -> Result<bool> {
    let model_text = std::fs::read_to_string(model)
        .with_context(|| format!("Failed to read model {}", model.display()))?;
    let stdout = std::fs::read_to_string(stdout_file)
        .with_context(|| format!("Failed to read {}", stdout_file.display()))?;

    let report = ReferenceVerifier::new(solver)
        .with_tolerance(tolerance)
        .verify(&model_text, &stdout)
        .await;

    if cli.json {
        print_json(&report)?;
    } else {
        println!("Status: {:?}", report.status);
        println!("Compared: {} value(s) at tolerance {}", report.compared, report.tolerance);
        for m in &report.mismatches {
            println!(
                "  #{}: reference {} vs program {}",
                m.index, m.reference, m.candidate
            );
        }
        if let Some(detail) = &report.detail {
            println!("Detail: {}", detail);
        }
    }
    Ok(report.status == VerificationStatus::Matched)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
