//! Iteration records: the append-only history of a repair loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact::Artifact;
use super::outcome::ExecutionOutcome;
use super::verdict::Verdict;

/// Repair loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Generate,
    Persist,
    Execute,
    Classify,
    Done,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Generate => write!(f, "generate"),
            LoopState::Persist => write!(f, "persist"),
            LoopState::Execute => write!(f, "execute"),
            LoopState::Classify => write!(f, "classify"),
            LoopState::Done => write!(f, "done"),
        }
    }
}

/// One pass of the repair loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration index.
    pub index: u32,
    pub artifact: Option<Artifact>,
    pub outcome: Option<ExecutionOutcome>,
    pub verdict: Option<Verdict>,
    /// State in which the iteration stopped early, if it did.
    pub failed_at: Option<LoopState>,
    /// Error text for iterations that ended before classification.
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl IterationRecord {
    /// Record for an iteration that completed classification.
    pub fn classified(
        index: u32,
        artifact: Artifact,
        outcome: ExecutionOutcome,
        verdict: Verdict,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            index,
            artifact: Some(artifact),
            outcome: Some(outcome),
            verdict: Some(verdict),
            failed_at: None,
            error: None,
            started_at,
            duration_ms: elapsed_ms(started_at),
        }
    }

    /// Record for an iteration that stopped in `state` with `error`.
    pub fn failed(
        index: u32,
        state: LoopState,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            index,
            artifact: None,
            outcome: None,
            verdict: None,
            failed_at: Some(state),
            error: Some(error.into()),
            started_at,
            duration_ms: elapsed_ms(started_at),
        }
    }

    /// Record for an iteration interrupted by an unexpected failure.
    pub fn degraded(index: u32, error: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            index,
            artifact: None,
            outcome: None,
            verdict: None,
            failed_at: None,
            error: Some(error.into()),
            started_at,
            duration_ms: elapsed_ms(started_at),
        }
    }

    pub fn is_success(&self) -> bool {
        self.verdict.as_ref().map(|v| v.is_success).unwrap_or(false)
    }

    /// Why this iteration did not succeed.
    pub fn failure_reason(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        self.verdict
            .as_ref()
            .and_then(|v| v.reason.clone())
            .or_else(|| self.error.clone())
            .or_else(|| Some("unknown failure".to_string()))
    }
}

fn elapsed_ms(started_at: DateTime<Utc>) -> u64 {
    (Utc::now() - started_at).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::ExitStatus;
    use crate::domain::verdict::ClassificationSource;

    #[test]
    fn test_failed_record_has_no_artifact() {
        let r = IterationRecord::failed(1, LoopState::Generate, "oracle down", Utc::now());
        assert!(!r.is_success());
        assert!(r.artifact.is_none());
        assert_eq!(r.failed_at, Some(LoopState::Generate));
        assert_eq!(r.failure_reason().unwrap(), "oracle down");
    }

    #[test]
    fn test_classified_record_reason() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact::persist("x", &dir.path().join("a.py")).unwrap();
        let outcome = ExecutionOutcome {
            status: ExitStatus::NonZero,
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "boom".into(),
            wall_time_ms: 3,
            runtime: "python3".into(),
        };
        let verdict = Verdict::execution_failure("boom", ClassificationSource::Heuristic);
        let r = IterationRecord::classified(2, artifact, outcome, verdict, Utc::now());
        assert_eq!(r.index, 2);
        assert!(!r.is_success());
        assert_eq!(r.failure_reason().unwrap(), "boom");
    }

    #[test]
    fn test_loop_state_display() {
        assert_eq!(LoopState::Classify.to_string(), "classify");
    }
}
