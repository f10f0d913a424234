//! Removal of stale per-build working directories.

use shipyard_config::PipelineConfig;
use shipyard_core::{Error, Result};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Prunes build directories under the configured build root.
pub struct CleanupManager {
    build_dir: PathBuf,
}

impl CleanupManager {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            build_dir: config.build_dir.clone(),
        }
    }

    /// Remove build directories last modified more than `max_age` ago.
    ///
    /// Entries that cannot be inspected or removed are logged and skipped.
    /// Returns the removed paths.
    pub async fn cleanup_old_builds(&self, max_age: Duration) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.build_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %self.build_dir.display(), "Build directory does not exist");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::io(
                    format!("failed to read build directory {}", self.build_dir.display()),
                    e,
                ));
            }
        };

        let now = SystemTime::now();
        let mut removed = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io("failed to read build directory entry", e))?
        {
            let path = entry.path();
            let modified = match entry.metadata().await {
                Ok(meta) if meta.is_dir() => meta.modified(),
                Ok(_) => continue,
                Err(e) => Err(e),
            };
            let modified = match modified {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(dir = %path.display(), error = %e, "Failed to get directory info");
                    continue;
                }
            };

            let age = now.duration_since(modified).unwrap_or_default();
            if age <= max_age {
                continue;
            }

            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!(dir = %path.display(), age_secs = age.as_secs(), "Removed stale build");
                    removed.push(path);
                }
                Err(e) => error!(dir = %path.display(), error = %e, "Failed to remove old build"),
            }
        }

        info!(removed = removed.len(), "Stale build cleanup finished");
        Ok(removed)
    }
}
