//! Numeric cross-check of artifact output against a native reference solver.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::outcome::tail_chars;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// The reference solver is not installed or could not be run.
    Unavailable,
    /// Every compared pair was within tolerance.
    Matched,
    /// At least one compared pair was out of tolerance.
    Mismatched,
    /// One side printed no numbers.
    NoData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericMismatch {
    /// Position in the extracted number lists.
    pub index: usize,
    pub reference: f64,
    pub candidate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub status: VerificationStatus,
    pub tolerance: f64,
    /// Number of pairs compared.
    pub compared: usize,
    pub mismatches: Vec<NumericMismatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl VerificationReport {
    fn unavailable(tolerance: f64, detail: String) -> Self {
        Self {
            status: VerificationStatus::Unavailable,
            tolerance,
            compared: 0,
            mismatches: Vec::new(),
            reference_exit_code: None,
            detail: Some(detail),
        }
    }
}

/// Runs the reference solver with the model text on stdin.
#[derive(Debug, Clone)]
pub struct ReferenceVerifier {
    executable: PathBuf,
    tolerance: f64,
    timeout: Duration,
}

impl Default for ReferenceVerifier {
    fn default() -> Self {
        Self::new("OpenSees")
    }
}

impl ReferenceVerifier {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            tolerance: 0.10,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the solver on `model_text` and compare its numbers with those in
    /// `artifact_stdout`.
    pub async fn verify(&self, model_text: &str, artifact_stdout: &str) -> VerificationReport {
        let mut child = match Command::new(&self.executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                debug!(solver = %self.executable.display(), error = %e, "Reference solver unavailable");
                return VerificationReport::unavailable(
                    self.tolerance,
                    format!("cannot launch {}: {e}", self.executable.display()),
                );
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let input = model_text.to_string();
            tokio::spawn(async move {
                let _ = stdin.write_all(input.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return VerificationReport::unavailable(self.tolerance, e.to_string());
            }
            Err(_) => {
                warn!(solver = %self.executable.display(), "Reference solver timed out");
                return VerificationReport::unavailable(
                    self.tolerance,
                    format!("reference solver timed out after {}s", self.timeout.as_secs()),
                );
            }
        };

        // The reference solver prints its results on either stream.
        let mut reference_text = String::from_utf8_lossy(&output.stdout).to_string();
        reference_text.push('\n');
        reference_text.push_str(&String::from_utf8_lossy(&output.stderr));

        let mut report = compare_outputs(&reference_text, artifact_stdout, self.tolerance);
        report.reference_exit_code = output.status.code();
        if !output.status.success() {
            report.detail = Some(tail_chars(
                String::from_utf8_lossy(&output.stderr).trim(),
                500,
            ));
        }
        report
    }
}

fn number_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?").ok())
        .as_ref()
}

/// Numeric tokens in order of appearance.
pub fn extract_numbers(text: &str) -> Vec<f64> {
    let Some(re) = number_pattern() else {
        return Vec::new();
    };
    re.find_iter(text)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .collect()
}

/// Relative comparison: `|a - b| <= tol * max(|a|, |b|)`; two near-zero
/// values always match.
pub fn within_tolerance(a: f64, b: f64, tolerance: f64) -> bool {
    const ZERO: f64 = 1e-12;
    let scale = a.abs().max(b.abs());
    if scale < ZERO {
        return true;
    }
    (a - b).abs() <= tolerance * scale
}

/// Compare the numbers of two outputs pairwise over the shorter list.
pub fn compare_outputs(reference: &str, candidate: &str, tolerance: f64) -> VerificationReport {
    let expected = extract_numbers(reference);
    let actual = extract_numbers(candidate);

    if expected.is_empty() || actual.is_empty() {
        return VerificationReport {
            status: VerificationStatus::NoData,
            tolerance,
            compared: 0,
            mismatches: Vec::new(),
            reference_exit_code: None,
            detail: None,
        };
    }

    let mismatches: Vec<NumericMismatch> = expected
        .iter()
        .zip(actual.iter())
        .enumerate()
        .filter(|(_, (r, c))| !within_tolerance(**r, **c, tolerance))
        .map(|(index, (r, c))| NumericMismatch {
            index,
            reference: *r,
            candidate: *c,
        })
        .collect();
    let compared = expected.len().min(actual.len());

    VerificationReport {
        status: if mismatches.is_empty() {
            VerificationStatus::Matched
        } else {
            VerificationStatus::Mismatched
        },
        tolerance,
        compared,
        mismatches,
        reference_exit_code: None,
        detail: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_numbers() {
        let nums = extract_numbers("Node 2: ux=-1.5e-3 uy=0.25, M=.5 kN");
        assert_eq!(nums, vec![2.0, -1.5e-3, 0.25, 0.5]);
    }

    #[test]
    fn test_within_tolerance() {
        assert!(within_tolerance(100.0, 109.0, 0.10));
        assert!(!within_tolerance(100.0, 120.0, 0.10));
        assert!(within_tolerance(0.0, 0.0, 0.10));
        assert!(within_tolerance(-5.0, -5.4, 0.10));
    }

    #[test]
    fn test_compare_outputs_statuses() {
        let r = compare_outputs("1 2 300", "1.0 2.05 301 999", 0.10);
        assert_eq!(r.status, VerificationStatus::Matched);
        assert_eq!(r.compared, 3);

        let r = compare_outputs("10 20", "10 40", 0.10);
        assert_eq!(r.status, VerificationStatus::Mismatched);
        assert_eq!(r.mismatches.len(), 1);
        assert_eq!(r.mismatches[0].index, 1);

        let r = compare_outputs("no numbers", "1 2", 0.10);
        assert_eq!(r.status, VerificationStatus::NoData);
    }

    #[tokio::test]
    async fn test_missing_solver_is_unavailable() {
        let verifier = ReferenceVerifier::new("/definitely/not/OpenSees");
        let report = verifier.verify("wipe", "1 2 3").await;
        assert_eq!(report.status, VerificationStatus::Unavailable);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_solver_reads_model_from_stdin() {
        // `cat` echoes the model back, so its numbers are the reference.
        let verifier = ReferenceVerifier::new("cat");
        let report = verifier.verify("node 1 0.0 5.0", "1 0 5.2").await;
        assert_eq!(report.status, VerificationStatus::Matched);
        assert_eq!(report.compared, 3);
        assert_eq!(report.reference_exit_code, Some(0));
    }
}
