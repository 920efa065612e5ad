//! Pruning of old workflow artifacts.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

/// Remove all but the newest `keep_latest` `<prefix>_*.py` files in `dir`.
///
/// Errors are logged, never returned. Returns the number of files removed.
pub fn prune_artifacts(dir: &Path, prefix: &str, keep_latest: usize) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot list artifact directory");
            return 0;
        }
    };

    let stem = format!("{prefix}_");
    let mut files: Vec<(SystemTime, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.starts_with(&stem) && name.ends_with(".py")
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, entry.path())
        })
        .collect();

    // Newest first; equal timestamps fall back to name order.
    files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    let mut removed = 0;
    for (_, path) in files.into_iter().skip(keep_latest) {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "Pruned artifact");
                removed += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to prune artifact"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempdir().unwrap();
        for ts in 1000..1008 {
            std::fs::write(dir.path().join(format!("opensees_{ts}.py")), "x").unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        std::fs::write(dir.path().join("other_1.py"), "keep").unwrap();

        let removed = prune_artifacts(dir.path(), "opensees", 5);
        assert_eq!(removed, 3);

        let mut left: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with("opensees_"))
            .collect();
        left.sort();
        assert_eq!(left.len(), 5);
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("other_1.py").exists());
    }

    #[test]
    fn test_prune_missing_dir_is_harmless() {
        assert_eq!(prune_artifacts(Path::new("/definitely/missing"), "opensees", 5), 0);
    }
}
