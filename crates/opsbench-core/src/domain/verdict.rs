//! Verdict: classification of an execution outcome.
//!
//! A clean exit and a confirmed analysis are different signals; both are kept.

use serde::{Deserialize, Serialize};

/// Who produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// The oracle answered the classification prompt.
    Oracle,
    /// The oracle call failed; the verdict comes from local rules.
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_success: bool,
    /// Failure reason or root-cause summary (absent on confirmed success).
    pub reason: Option<String>,
    /// Whether the process exited with status Ok.
    pub exit_ok: bool,
    /// Oracle confirmation of semantic success; `None` if never asked or the
    /// call failed.
    pub oracle_confirmed: Option<bool>,
    pub source: ClassificationSource,
    /// Set when the run used a degraded runtime and failed, so the failure may
    /// be environmental rather than a code defect.
    #[serde(default)]
    pub environment_suspect: bool,
}

impl Verdict {
    /// Clean exit affirmed by the oracle.
    pub fn confirmed_success() -> Self {
        Self {
            is_success: true,
            reason: None,
            exit_ok: true,
            oracle_confirmed: Some(true),
            source: ClassificationSource::Oracle,
            environment_suspect: false,
        }
    }

    /// Clean exit that the oracle did not affirm.
    pub fn rejected_clean_exit(reason: impl Into<String>) -> Self {
        Self {
            is_success: false,
            reason: Some(reason.into()),
            exit_ok: true,
            oracle_confirmed: Some(false),
            source: ClassificationSource::Oracle,
            environment_suspect: false,
        }
    }

    /// Failed execution (non-Ok status).
    pub fn execution_failure(reason: impl Into<String>, source: ClassificationSource) -> Self {
        Self {
            is_success: false,
            reason: Some(reason.into()),
            exit_ok: false,
            oracle_confirmed: None,
            source,
            environment_suspect: false,
        }
    }

    /// Clean exit whose confirmation call failed.
    pub fn unconfirmed(is_success: bool, reason: impl Into<String>) -> Self {
        Self {
            is_success,
            reason: Some(reason.into()),
            exit_ok: true,
            oracle_confirmed: None,
            source: ClassificationSource::Heuristic,
            environment_suspect: false,
        }
    }

    pub fn with_environment_suspect(mut self, suspect: bool) -> Self {
        self.environment_suspect = suspect;
        self
    }
}

/// Parsed answer to the confirmation prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Affirmed,
    Denied(String),
}

/// Interpret the oracle's confirmation answer.
///
/// The first non-empty line decides: a leading `SUCCESS` or `YES` word
/// affirms (`SUCCESSFULLY ...` does not); anything else is a denial, with the text after `FAILURE:` (or the whole answer)
/// as the reason.
pub fn parse_confirmation(answer: &str) -> Confirmation {
    let first_line = answer
        .lines()
        .map(|l| l.trim().trim_matches(|c| c == '*' || c == '`' || c == '#').trim())
        .find(|l| !l.is_empty())
        .unwrap_or("");
    let upper = first_line.to_uppercase();
    let first_word = upper
        .split(|c: char| !c.is_alphabetic())
        .next()
        .unwrap_or("");

    if first_word == "SUCCESS" || first_word == "YES" {
        return Confirmation::Affirmed;
    }

    let reason = if upper.starts_with("FAILURE") {
        let after = first_line
            .split_once(':')
            .map(|(_, r)| r.trim())
            .unwrap_or("");
        if after.is_empty() {
            answer.trim().to_string()
        } else {
            after.to_string()
        }
    } else {
        answer.trim().to_string()
    };

    if reason.is_empty() {
        Confirmation::Denied("oracle gave an empty confirmation".to_string())
    } else {
        Confirmation::Denied(reason)
    }
}
