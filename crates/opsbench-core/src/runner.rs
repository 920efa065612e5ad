//! Artifact execution as an isolated subprocess.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::{ExecutionOutcome, ExitStatus};
use crate::environment::RuntimeHandle;

/// How long to wait for pipe readers after the child is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs a persisted artifact with a resolved runtime.
///
/// Implementations never interpret output content.
#[async_trait]
pub trait ArtifactExecutor: Send + Sync {
    async fn run(&self, runtime: &RuntimeHandle, path: &Path, timeout: Duration)
        -> ExecutionOutcome;
}

/// Subprocess-backed executor.
///
/// The child gets a null stdin and piped stdout/stderr. On unix it leads its
/// own process group. On timeout the whole group is killed and the child is
/// reaped before `run` returns.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Working directory for the child; inherits the parent's when `None`.
    working_dir: Option<std::path::PathBuf>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl ArtifactExecutor for ProcessRunner {
    async fn run(
        &self,
        runtime: &RuntimeHandle,
        path: &Path,
        timeout: Duration,
    ) -> ExecutionOutcome {
        let start = Instant::now();
        let program = runtime.program().to_string();

        let mut command = Command::new(&program);
        command
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let stderr = if e.kind() == std::io::ErrorKind::NotFound {
                    format!("runtime '{program}' not found: {e}")
                } else {
                    format!("failed to launch '{program}': {e}")
                };
                warn!(runtime = %program, error = %e, "Artifact launch failed");
                return ExecutionOutcome {
                    status: ExitStatus::LaunchFailure,
                    exit_code: None,
                    stdout: String::new(),
                    stderr,
                    wall_time_ms: start.elapsed().as_millis() as u64,
                    runtime: program,
                };
            }
        };

        let stdout_reader = child.stdout.take().map(|s| tokio::spawn(read_all(s)));
        let stderr_reader = child.stderr.take().map(|s| tokio::spawn(read_all(s)));

        let (status, exit_code) = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(exit)) if exit.success() => (ExitStatus::Ok, exit.code()),
            Ok(Ok(exit)) => (ExitStatus::NonZero, exit.code()),
            Ok(Err(e)) => {
                warn!(runtime = %program, error = %e, "Failed to wait for artifact");
                (ExitStatus::NonZero, None)
            }
            Err(_) => {
                // Grandchildren first; they would otherwise keep the pipes open.
                #[cfg(unix)]
                if let Some(pid) = child.id() {
                    kill_process_group(pid);
                }
                // kill() sends SIGKILL and waits, so the child is reaped here.
                if let Err(e) = child.kill().await {
                    warn!(runtime = %program, error = %e, "Failed to kill timed-out artifact");
                }
                (ExitStatus::Timeout, None)
            }
        };

        let stdout = collect(stdout_reader).await;
        let mut stderr = collect(stderr_reader).await;
        if status == ExitStatus::Timeout {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!(
                "execution timed out after {}s and was terminated",
                timeout.as_secs_f64()
            ));
        }

        let wall_time_ms = start.elapsed().as_millis() as u64;
        debug!(runtime = %program, status = %status, wall_time_ms, "Artifact finished");

        ExecutionOutcome {
            status,
            exit_code,
            stdout,
            stderr,
            wall_time_ms,
            runtime: program,
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg only sends a signal. The group is led by our unreaped
    // child, so the id cannot have been recycled.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "killpg failed");
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    buf
}

/// Join a pipe reader. Grandchildren may hold the pipe open after the child
/// is killed, so the wait is bounded.
async fn collect(reader: Option<tokio::task::JoinHandle<Vec<u8>>>) -> String {
    let Some(handle) = reader else {
        return String::new();
    };
    let abort = handle.abort_handle();
    match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).to_string(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_launch_failure() {
        let runtime = RuntimeHandle::unprobed("/definitely/not/python");
        let outcome = ProcessRunner::new()
            .run(&runtime, Path::new("a.py"), Duration::from_secs(5))
            .await;
        assert_eq!(outcome.status, ExitStatus::LaunchFailure);
        assert!(outcome.stderr.contains("not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ok_and_non_zero() {
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("ok.sh");
        std::fs::write(&ok, "echo done\n").unwrap();
        let bad = dir.path().join("bad.sh");
        std::fs::write(&bad, "echo \"NameError: name 'ops' is not defined\" >&2\nexit 3\n").unwrap();

        let runtime = RuntimeHandle::unprobed("sh");
        let runner = ProcessRunner::new();

        let outcome = runner.run(&runtime, &ok, Duration::from_secs(10)).await;
        assert_eq!(outcome.status, ExitStatus::Ok);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout.trim(), "done");

        let outcome = runner.run(&runtime, &bad, Duration::from_secs(10)).await;
        assert_eq!(outcome.status, ExitStatus::NonZero);
        assert_eq!(outcome.exit_code, Some(3));
        assert!(outcome.stderr.contains("NameError"));
    }
}
