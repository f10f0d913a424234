//! Filesystem scope for one build's lifetime.

use shipyard_config::PipelineConfig;
use shipyard_core::{BuildId, Error, Result};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Working, artifact and cache directories for a single build, namespaced by build id.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub root_dir: PathBuf,
    pub build_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl BuildContext {
    /// Create the build, artifact and cache directories eagerly.
    pub async fn create(config: &PipelineConfig, build_id: &BuildId) -> Result<Self> {
        if !is_single_component(build_id.as_str()) {
            return Err(Error::InvalidInput(format!(
                "build id '{}' is not usable as a directory name",
                build_id
            )));
        }

        let ctx = Self {
            root_dir: config.build_dir.clone(),
            build_dir: config.build_dir.join(build_id.as_str()),
            artifact_dir: config.artifacts_dir.join(build_id.as_str()),
            cache_dir: config.cache_dir.join(build_id.as_str()),
        };

        for dir in [&ctx.build_dir, &ctx.artifact_dir, &ctx.cache_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::io(format!("failed to create directory {}", dir.display()), e))?;
        }

        debug!(build_dir = %ctx.build_dir.display(), "Created build context");
        Ok(ctx)
    }

    /// Remove the build and cache directories. Artifacts are retained.
    pub async fn cleanup(&self) -> Result<()> {
        for dir in [&self.build_dir, &self.cache_dir] {
            remove_dir_if_exists(dir).await?;
        }
        Ok(())
    }
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

pub(crate) async fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(format!("failed to remove {}", dir.display()), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_config(root: &Path) -> PipelineConfig {
        PipelineConfig {
            build_dir: root.join("builds"),
            artifacts_dir: root.join("artifacts"),
            cache_dir: root.join("cache"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_makes_namespaced_dirs() {
        let root = TempDir::new().unwrap();
        let ctx = BuildContext::create(&make_config(root.path()), &BuildId::from("b1"))
            .await
            .unwrap();

        assert_eq!(ctx.build_dir, root.path().join("builds/b1"));
        assert!(ctx.build_dir.is_dir());
        assert!(ctx.artifact_dir.is_dir());
        assert!(ctx.cache_dir.is_dir());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_artifacts() {
        let root = TempDir::new().unwrap();
        let ctx = BuildContext::create(&make_config(root.path()), &BuildId::from("b1"))
            .await
            .unwrap();
        std::fs::write(ctx.artifact_dir.join("b1.tar.gz"), b"artifact").unwrap();
        std::fs::write(ctx.build_dir.join("Dockerfile"), b"FROM scratch").unwrap();

        ctx.cleanup().await.unwrap();
        ctx.cleanup().await.unwrap();

        assert!(!ctx.build_dir.exists());
        assert!(!ctx.cache_dir.exists());
        assert!(ctx.artifact_dir.join("b1.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let root = TempDir::new().unwrap();
        let config = make_config(root.path());

        for id in ["../escape", "a/b", "", "."] {
            let err = BuildContext::create(&config, &BuildId::from(id))
                .await
                .unwrap_err();
            assert!(err.is_caller_error(), "id {:?} should be rejected", id);
        }
    }
}
