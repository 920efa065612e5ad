//! Compatibility probes for candidate runtimes.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Default script: import the native binding and make one no-op call.
pub const DEFAULT_PROBE_SCRIPT: &str =
    "import openseespy.opensees as ops; ops.wipe(); print(\"OK\")";

/// Marker the probe script prints on success.
pub const PROBE_MARKER: &str = "OK";

/// Typed result of probing one runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProbeResult {
    /// The binding imported and the no-op call succeeded.
    Compatible,
    /// The runtime ran but the binding is missing or broken.
    Incompatible { reason: String },
    /// The runtime could not be probed at all (missing executable, timeout).
    ProbeError { reason: String },
}

impl ProbeResult {
    pub fn is_compatible(&self) -> bool {
        matches!(self, ProbeResult::Compatible)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ProbeResult::Compatible => None,
            ProbeResult::Incompatible { reason } | ProbeResult::ProbeError { reason } => {
                Some(reason)
            }
        }
    }
}

/// Decides whether a runtime can execute artifacts.
#[async_trait]
pub trait CompatibilityProbe: Send + Sync {
    async fn probe(&self, runtime: &str) -> ProbeResult;
}

/// Runs `<runtime> -c <script>` and looks for [`PROBE_MARKER`] on stdout.
#[derive(Debug, Clone)]
pub struct BindingProbe {
    script: String,
    timeout: Duration,
}

impl BindingProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            script: DEFAULT_PROBE_SCRIPT.to_string(),
            timeout,
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = script.into();
        self
    }
}

impl Default for BindingProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl CompatibilityProbe for BindingProbe {
    async fn probe(&self, runtime: &str) -> ProbeResult {
        let child = Command::new(runtime)
            .arg("-c")
            .arg(&self.script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return ProbeResult::ProbeError {
                    reason: format!("failed to launch {runtime}: {e}"),
                }
            }
        };

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ProbeResult::ProbeError {
                    reason: format!("failed to wait for {runtime}: {e}"),
                }
            }
            Err(_) => {
                return ProbeResult::ProbeError {
                    reason: format!("probe timed out after {}s", self.timeout.as_secs()),
                }
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() && stdout.contains(PROBE_MARKER) {
            return ProbeResult::Compatible;
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let last_line = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_string();
        let reason = if last_line.is_empty() {
            format!(
                "probe exited with {:?} without printing {PROBE_MARKER}",
                output.status.code()
            )
        } else {
            last_line
        };
        ProbeResult::Incompatible { reason }
    }
}
