//! Execution outcome of one artifact run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Ok,
    NonZero,
    Timeout,
    LaunchFailure,
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Ok => write!(f, "ok"),
            ExitStatus::NonZero => write!(f, "non_zero"),
            ExitStatus::Timeout => write!(f, "timeout"),
            ExitStatus::LaunchFailure => write!(f, "launch_failure"),
        }
    }
}

/// Captured result of running an artifact. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: ExitStatus,
    /// Process exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub wall_time_ms: u64,
    /// Runtime executable used.
    pub runtime: String,
}

impl ExecutionOutcome {
    pub fn is_ok(&self) -> bool {
        self.status == ExitStatus::Ok
    }

    pub fn wall_time(&self) -> Duration {
        Duration::from_millis(self.wall_time_ms)
    }

    /// Last `max_chars` characters of stderr.
    pub fn stderr_tail(&self, max_chars: usize) -> String {
        tail_chars(&self.stderr, max_chars)
    }

    /// One-line description of how the run ended.
    pub fn describe(&self) -> String {
        match self.status {
            ExitStatus::Ok => "exited with code 0".to_string(),
            ExitStatus::NonZero => match self.exit_code {
                Some(code) => format!("exited with code {code}"),
                None => "terminated by signal".to_string(),
            },
            ExitStatus::Timeout => format!("timed out after {} ms", self.wall_time_ms),
            ExitStatus::LaunchFailure => format!("runtime '{}' could not be launched", self.runtime),
        }
    }
}

pub(crate) fn tail_chars(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        text.to_string()
    } else {
        text.chars().skip(count - max_chars).collect()
    }
}
