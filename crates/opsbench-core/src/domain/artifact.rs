//! Artifact: one generated, persisted attempt at an analysis program.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{BenchError, Result};

/// Generated source text bound to the file it was written to.
///
/// Fields are private: an artifact is never patched after persistence; a
/// repair produces a new artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    source: String,
    path: PathBuf,
    digest: String,
}

impl Artifact {
    /// Write `source` to `path` (parent directories included) and return the
    /// persisted artifact. Fails if the file already exists.
    pub fn persist(source: &str, path: &Path) -> Result<Self> {
        let to_err = |source: std::io::Error| BenchError::Persist {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(to_err)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(to_err)?;
        file.write_all(source.as_bytes()).map_err(to_err)?;

        Ok(Self {
            source: source.to_string(),
            path: path.to_path_buf(),
            digest: source_digest(source),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// SHA-256 hex of the source text.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn line_count(&self) -> usize {
        self.source.lines().count()
    }
}

fn source_digest(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}
