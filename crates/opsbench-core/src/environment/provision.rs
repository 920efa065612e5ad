//! Isolated runtime provisioning: the resolver's last resort.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use super::probe::{CompatibilityProbe, ProbeResult};
use super::ResolverConfig;

/// One way of installing the native binding into a managed runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStrategy {
    Plain,
    ForceReinstall,
    AlternateIndex,
}

impl InstallStrategy {
    /// Strategies in the order they are attempted.
    pub const ALL: [InstallStrategy; 3] = [
        InstallStrategy::Plain,
        InstallStrategy::ForceReinstall,
        InstallStrategy::AlternateIndex,
    ];

    /// `pip install` arguments for `package`.
    pub fn pip_args(&self, package: &str, alternate_index: &str) -> Vec<String> {
        let mut args = vec!["-m".to_string(), "pip".to_string(), "install".to_string()];
        match self {
            InstallStrategy::Plain => {}
            InstallStrategy::ForceReinstall => {
                args.push("--force-reinstall".to_string());
                args.push("--no-cache-dir".to_string());
            }
            InstallStrategy::AlternateIndex => {
                args.push("-i".to_string());
                args.push(alternate_index.to_string());
            }
        }
        args.push(package.to_string());
        args
    }
}

impl std::fmt::Display for InstallStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallStrategy::Plain => write!(f, "plain"),
            InstallStrategy::ForceReinstall => write!(f, "force_reinstall"),
            InstallStrategy::AlternateIndex => write!(f, "alternate_index"),
        }
    }
}

/// A single provisioning command and how it went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionStep {
    pub description: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub duration_ms: u64,
}

/// Result of a provisioning attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionReport {
    /// Runtime inside the provisioned environment, if one was created.
    pub python: Option<String>,
    /// Whether that runtime probed compatible after installation.
    pub compatible: bool,
    pub steps: Vec<ProvisionStep>,
}

impl ProvisionReport {
    pub fn failed(steps: Vec<ProvisionStep>) -> Self {
        Self {
            python: None,
            compatible: false,
            steps,
        }
    }
}

/// Builds an isolated runtime when no existing candidate is compatible.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, probe: &dyn CompatibilityProbe) -> ProvisionReport;
}

/// Python path inside a venv for the current platform.
pub fn venv_python(venv_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        venv_dir.join("Scripts").join("python.exe")
    } else {
        venv_dir.join("bin").join("python")
    }
}

/// Provisions a Python venv and installs the binding into it.
#[derive(Debug, Clone)]
pub struct VenvProvisioner {
    venv_dir: PathBuf,
    bootstrap: Vec<String>,
    baseline_packages: Vec<String>,
    binding_package: String,
    alternate_index: String,
    step_timeout: Duration,
}

impl VenvProvisioner {
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            venv_dir: config.managed_dir.clone(),
            bootstrap: vec!["python3".to_string(), "python".to_string()],
            baseline_packages: config.baseline_packages.clone(),
            binding_package: config.binding_package.clone(),
            alternate_index: config.alternate_index.clone(),
            step_timeout: config.install_timeout,
        }
    }

    async fn create_venv(&self, steps: &mut Vec<ProvisionStep>) -> bool {
        let dir = self.venv_dir.to_string_lossy().to_string();
        for python in &self.bootstrap {
            let step = run_step(
                format!("{python} -m venv {dir}"),
                python,
                &["-m".to_string(), "venv".to_string(), dir.clone()],
                self.step_timeout,
            )
            .await;
            let ok = step.success;
            steps.push(step);
            if ok {
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl Provisioner for VenvProvisioner {
    async fn provision(&self, probe: &dyn CompatibilityProbe) -> ProvisionReport {
        let mut steps = Vec::new();
        info!(venv = %self.venv_dir.display(), "Provisioning managed runtime");

        if !self.create_venv(&mut steps).await {
            warn!(venv = %self.venv_dir.display(), "Could not create managed runtime");
            return ProvisionReport::failed(steps);
        }

        let python = venv_python(&self.venv_dir).to_string_lossy().to_string();

        let upgrade_args: Vec<String> = ["-m", "pip", "install", "--upgrade", "pip"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let upgrade = run_step(
            "upgrade pip".to_string(),
            &python,
            &upgrade_args,
            self.step_timeout,
        )
        .await;
        if !upgrade.success {
            warn!(detail = ?upgrade.detail, "pip upgrade failed, continuing");
        }
        steps.push(upgrade);

        // Baseline packages are best-effort.
        for package in &self.baseline_packages {
            let step = run_step(
                format!("install {package}"),
                &python,
                &InstallStrategy::Plain.pip_args(package, &self.alternate_index),
                self.step_timeout,
            )
            .await;
            if !step.success {
                warn!(package = %package, detail = ?step.detail, "Baseline package install failed, continuing");
            }
            steps.push(step);
        }

        for strategy in InstallStrategy::ALL {
            let step = run_step(
                format!("install {} ({strategy})", self.binding_package),
                &python,
                &strategy.pip_args(&self.binding_package, &self.alternate_index),
                self.step_timeout,
            )
            .await;
            let installed = step.success;
            steps.push(step);
            if !installed {
                warn!(strategy = %strategy, "Binding install failed, trying next strategy");
                continue;
            }

            match probe.probe(&python).await {
                ProbeResult::Compatible => {
                    info!(strategy = %strategy, python = %python, "Managed runtime is compatible");
                    return ProvisionReport {
                        python: Some(python),
                        compatible: true,
                        steps,
                    };
                }
                other => {
                    warn!(strategy = %strategy, reason = ?other.reason(), "Installed binding failed the probe");
                }
            }
        }

        ProvisionReport {
            python: Some(python),
            compatible: false,
            steps,
        }
    }
}

async fn run_step(
    description: String,
    program: &str,
    args: &[String],
    timeout: Duration,
) -> ProvisionStep {
    let start = Instant::now();
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let (success, detail) = match child {
        Err(e) => (false, Some(format!("failed to launch {program}: {e}"))),
        Ok(child) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Err(_) => (false, Some(format!("timed out after {}s", timeout.as_secs()))),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Ok(Ok(output)) if output.status.success() => (true, None),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail = crate::domain::outcome::tail_chars(stderr.trim(), 500);
                (false, Some(tail))
            }
        },
    };

    ProvisionStep {
        description,
        success,
        detail,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}
