//! Report persistence with integrity digests.
//!
//! Reports land at `<dir>/<id>/report.json` next to `report.digest`, the
//! SHA-256 hex of the JSON bytes. Reading verifies the digest.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::{BenchError, Result};

/// Characters of free text kept in rendered summaries.
pub const SUMMARY_EXCERPT_CHARS: usize = 500;

/// A serializable report with a stable directory name.
pub trait Report: Serialize + DeserializeOwned {
    fn report_id(&self) -> String;
}

fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Write `<dir>/<id>/report.json` and its digest. Returns the JSON path.
pub fn write_report<R: Report>(report: &R, dir: &Path) -> Result<PathBuf> {
    let report_dir = dir.join(report.report_id());
    std::fs::create_dir_all(&report_dir)?;

    let report_path = report_dir.join("report.json");
    let digest_path = report_dir.join("report.digest");
    let json = serde_json::to_vec_pretty(report)?;
    let digest = digest_hex(&json);

    std::fs::write(&report_path, &json)?;
    std::fs::write(&digest_path, digest.as_bytes())?;

    Ok(report_path)
}

/// Read and verify `<dir>/<id>/report.json`.
pub fn read_report<R: Report>(id: &str, dir: &Path) -> Result<R> {
    let report_dir = dir.join(id);
    let json = std::fs::read(report_dir.join("report.json"))?;
    let digest = std::fs::read_to_string(report_dir.join("report.digest"))?;
    let actual = digest_hex(&json);
    if digest.trim() != actual {
        return Err(BenchError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }

    Ok(serde_json::from_slice(&json)?)
}

/// First `max_chars` characters of `text`, with an ellipsis when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: String,
        ok: bool,
    }

    impl Report for Sample {
        fn report_id(&self) -> String {
            self.id.clone()
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let sample = Sample {
            id: "task_1-abcd".into(),
            ok: true,
        };
        let path = write_report(&sample, dir.path()).unwrap();
        assert!(path.ends_with("task_1-abcd/report.json"));
        let back: Sample = read_report("task_1-abcd", dir.path()).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn test_tampered_report_is_rejected() {
        let dir = tempdir().unwrap();
        let sample = Sample {
            id: "r".into(),
            ok: false,
        };
        let path = write_report(&sample, dir.path()).unwrap();
        std::fs::write(&path, br#"{"id":"r","ok":true}"#).unwrap();

        let err = read_report::<Sample>("r", dir.path()).unwrap_err();
        assert!(matches!(err, BenchError::DigestMismatch { .. }));
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("short", 500), "short");
        let long = "a".repeat(600);
        let e = excerpt(&long, 500);
        assert_eq!(e.len(), 503);
        assert!(e.ends_with("..."));
    }
}
