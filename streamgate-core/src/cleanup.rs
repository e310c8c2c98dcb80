use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::paths::ResourcePaths;

/// What happened to a session's output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    AlreadyAbsent,
    /// Removal failed; the message is logged, never returned as an error
    Failed(String),
}

/// Removes per-session artifacts from disk.
///
/// Every operation is idempotent and infallible from the caller's point of
/// view: a missing directory counts as success and any other failure is
/// logged and reported in the outcome.
#[derive(Debug, Clone)]
pub struct CleanupCoordinator {
    output_root: PathBuf,
}

impl CleanupCoordinator {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    /// Remove the session's output directory and everything in it.
    pub async fn cleanup(&self, paths: &ResourcePaths) -> CleanupOutcome {
        let dir = &paths.output_dir;
        if !dir.starts_with(&self.output_root) {
            warn!(path = %dir.display(), "refusing to remove directory outside output root");
            return CleanupOutcome::Failed(format!(
                "{} is outside {}",
                dir.display(),
                self.output_root.display()
            ));
        }

        match remove_dir(dir).await {
            Ok(outcome) => outcome,
            // A transcoder that was killed mid-write can leave a file behind
            // between the directory walk and the final rmdir.
            Err(first) if dir.exists() => match remove_dir(dir).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        path = %dir.display(),
                        "failed to remove session output: {} (first attempt: {})",
                        e, first
                    );
                    CleanupOutcome::Failed(e.to_string())
                }
            },
            Err(e) => {
                warn!(path = %dir.display(), "failed to remove session output: {}", e);
                CleanupOutcome::Failed(e.to_string())
            }
        }
    }

    /// Remove every directory under the output root that `keep` rejects.
    /// Returns how many were removed. A missing root is not an error.
    pub async fn sweep(&self, keep: impl Fn(&str) -> bool) -> io::Result<usize> {
        let mut entries = match fs::read_dir(&self.output_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if keep(name) {
                continue;
            }

            match remove_dir(&entry.path()).await {
                Ok(CleanupOutcome::Removed) => {
                    debug!(dir = name, "removed orphaned output directory");
                    removed += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(dir = name, "failed to remove orphaned output: {}", e),
            }
        }

        if removed > 0 {
            info!(removed, root = %self.output_root.display(), "orphan sweep completed");
        }
        Ok(removed)
    }
}

async fn remove_dir(dir: &Path) -> io::Result<CleanupOutcome> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(CleanupOutcome::Removed),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Ok(CleanupOutcome::AlreadyAbsent)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranscoderPolicy;
    use crate::key::StreamKey;

    fn paths_in(root: &Path, key: &str) -> ResourcePaths {
        ResourcePaths::for_key(
            root,
            &StreamKey::parse(key).unwrap(),
            &TranscoderPolicy::default(),
        )
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let coordinator = CleanupCoordinator::new(root.path());
        let paths = paths_in(root.path(), "7");

        std::fs::create_dir_all(&paths.output_dir).unwrap();
        std::fs::write(&paths.playlist, "#EXTM3U\n").unwrap();
        std::fs::write(paths.output_dir.join("segment0.ts"), b"ts").unwrap();

        assert_eq!(coordinator.cleanup(&paths).await, CleanupOutcome::Removed);
        assert!(!paths.output_dir.exists());
        assert_eq!(
            coordinator.cleanup(&paths).await,
            CleanupOutcome::AlreadyAbsent
        );
    }

    #[tokio::test]
    async fn cleanup_refuses_paths_outside_root() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let coordinator = CleanupCoordinator::new(root.path());
        let paths = paths_in(other.path(), "7");
        std::fs::create_dir_all(&paths.output_dir).unwrap();

        assert!(matches!(
            coordinator.cleanup(&paths).await,
            CleanupOutcome::Failed(_)
        ));
        assert!(paths.output_dir.exists());
    }

    #[tokio::test]
    async fn sweep_keeps_live_directories() {
        let root = tempfile::tempdir().unwrap();
        let coordinator = CleanupCoordinator::new(root.path());
        for key in ["1", "2", "3"] {
            std::fs::create_dir_all(root.path().join(key)).unwrap();
        }
        std::fs::write(root.path().join("notes.txt"), "keep").unwrap();

        let removed = coordinator.sweep(|name| name == "2").await.unwrap();

        assert_eq!(removed, 2);
        assert!(root.path().join("2").exists());
        assert!(!root.path().join("1").exists());
        assert!(root.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn sweep_of_missing_root_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let coordinator = CleanupCoordinator::new(root.path().join("absent"));
        assert_eq!(coordinator.sweep(|_| false).await.unwrap(), 0);
    }
}
