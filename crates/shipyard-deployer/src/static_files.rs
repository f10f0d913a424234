//! Static file deployer.
//!
//! Artifacts are extracted into `<static root>/<project>`. Before the target is
//! touched, deploy records what it replaces under `<static root>/backups`:
//! `<build id>.tar.gz` holds the previous contents, or an empty
//! `<build id>.none` marker says there were none. Rollback acts only on one
//! of those records, so a deploy that failed before reaching the target
//! leaves the live site alone.

use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use shipyard_config::DeployConfig;
use shipyard_core::{Build, Deployer, Error, Result};
use std::fs::File;
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_STATIC_ROOT: &str = "/var/www/html";
pub const DEFAULT_MAX_DEPLOY_SIZE: u64 = 100 * 1024 * 1024;

const BACKUP_DIR: &str = "backups";

/// Deploys build artifacts as plain files under a static root.
#[derive(Debug, Clone)]
pub struct StaticDeployer {
    root: PathBuf,
    max_deploy_size: u64,
}

impl StaticDeployer {
    pub fn new(config: &DeployConfig) -> Self {
        let root = config.static_path.clone().unwrap_or_else(|| {
            warn!(default = DEFAULT_STATIC_ROOT, "static-path not configured, using default");
            PathBuf::from(DEFAULT_STATIC_ROOT)
        });
        let max_deploy_size = match config.max_deploy_size {
            Some(size) if size > 0 => size,
            _ => {
                warn!(default = DEFAULT_MAX_DEPLOY_SIZE, "max-deploy-size not configured, using default");
                DEFAULT_MAX_DEPLOY_SIZE
            }
        };

        Self {
            root,
            max_deploy_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn target_dir(&self, build: &Build) -> PathBuf {
        self.root.join(&build.project_id)
    }

    pub fn backup_path(&self, build: &Build) -> PathBuf {
        self.root
            .join(BACKUP_DIR)
            .join(format!("{}.tar.gz", build.id))
    }

    /// Marker left by a deploy that found no previous contents.
    pub fn empty_marker_path(&self, build: &Build) -> PathBuf {
        self.root.join(BACKUP_DIR).join(format!("{}.none", build.id))
    }

    fn artifact(build: &Build) -> Result<&Path> {
        build
            .artifact_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| Error::InvalidInput("artifact path is required".into()))
    }
}

fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(n)), None) if n != BACKUP_DIR
    )
}

fn interrupted() -> io::Error {
    io::Error::new(ErrorKind::Interrupted, "deployment cancelled")
}

/// Archive `source` to `dest`. The tarball only appears at `dest` once complete.
fn archive_dir(source: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let partial = dest.with_extension("gz.partial");
    let written = (|| {
        let file = File::create(&partial)?;
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        builder.follow_symlinks(false);
        builder.append_dir_all(".", source)?;
        builder.into_inner()?.finish()?.sync_all()
    })();
    match written {
        Ok(()) => std::fs::rename(&partial, dest),
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            Err(e)
        }
    }
}

fn write_marker(marker: &Path) -> io::Result<()> {
    if let Some(parent) = marker.parent() {
        std::fs::create_dir_all(parent)?;
    }
    File::create(marker).map(|_| ())
}

/// Replace `target` with the contents of the gzip tarball at `archive`,
/// checking `cancel` before each entry.
fn replace_with_archive(archive: &Path, target: &Path, cancel: &CancellationToken) -> io::Result<()> {
    if cancel.is_cancelled() {
        return Err(interrupted());
    }
    let file = File::open(archive)?;
    match std::fs::remove_dir_all(target) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::fs::create_dir_all(target)?;

    let mut archive = tar::Archive::new(GzDecoder::new(file));
    for entry in archive.entries()? {
        if cancel.is_cancelled() {
            return Err(interrupted());
        }
        entry?.unpack_in(target)?;
    }
    Ok(())
}

/// Run `f` on the blocking pool and wait for it to finish, even when cancelled.
async fn blocking<F>(context: String, f: F) -> Result<()>
where
    F: FnOnce() -> io::Result<()> + Send + 'static,
{
    match spawn_blocking(f).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) if e.kind() == ErrorKind::Interrupted => Err(Error::Cancelled),
        Ok(Err(e)) => Err(Error::io(context, e)),
        Err(e) => Err(Error::Internal(format!("{}: {}", context, e))),
    }
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[async_trait]
impl Deployer for StaticDeployer {
    fn name(&self) -> &'static str {
        "static"
    }

    fn validate(&self, build: &Build) -> Result<()> {
        if !is_single_component(&build.project_id) {
            return Err(Error::InvalidInput(format!(
                "project id '{}' is not usable as a directory name",
                build.project_id
            )));
        }

        let artifact = Self::artifact(build)?;
        let metadata = std::fs::metadata(artifact)
            .map_err(|e| Error::io(format!("failed to stat artifact {}", artifact.display()), e))?;

        if metadata.len() > self.max_deploy_size {
            return Err(Error::ArtifactRejected(format!(
                "artifact size {} exceeds maximum allowed size {}",
                metadata.len(),
                self.max_deploy_size
            )));
        }
        Ok(())
    }

    async fn deploy(&self, build: &Build, cancel: &CancellationToken) -> Result<()> {
        let artifact = Self::artifact(build)?.to_path_buf();
        let target = self.target_dir(build);
        info!(project = %build.project_id, target = %target.display(), "Deploying to static directory");

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            let backup = self.backup_path(build);
            info!(project = %build.project_id, backup = %backup.display(), "Creating backup");
            let source = target.clone();
            blocking(format!("failed to create backup {}", backup.display()), move || {
                archive_dir(&source, &backup)
            })
            .await?;
        } else {
            let marker = self.empty_marker_path(build);
            info!(project = %build.project_id, "No existing deployment to back up");
            blocking(format!("failed to write {}", marker.display()), move || {
                write_marker(&marker)
            })
            .await?;
        }

        let dest = target.clone();
        let cancel = cancel.clone();
        blocking(
            format!("failed to extract artifact {}", artifact.display()),
            move || replace_with_archive(&artifact, &dest, &cancel),
        )
        .await?;

        info!(project = %build.project_id, location = %target.display(), "Static deployment completed");
        Ok(())
    }

    async fn rollback(&self, build: &Build) -> Result<()> {
        let target = self.target_dir(build);
        let backup = self.backup_path(build);
        let marker = self.empty_marker_path(build);
        info!(project = %build.project_id, backup = %backup.display(), "Rolling back static deployment");

        if tokio::fs::try_exists(&backup).await.unwrap_or(false) {
            return blocking(
                format!("failed to restore backup {}", backup.display()),
                move || replace_with_archive(&backup, &target, &CancellationToken::new()),
            )
            .await;
        }

        if tokio::fs::try_exists(&marker).await.unwrap_or(false) {
            remove_if_exists(&target)
                .await
                .map_err(|e| Error::io(format!("failed to remove {}", target.display()), e))?;
            if let Err(e) = tokio::fs::remove_file(&marker).await {
                warn!(marker = %marker.display(), error = %e, "Failed to remove rollback marker");
            }
            return Ok(());
        }

        info!(project = %build.project_id, "Deploy never reached the target, nothing to roll back");
        Ok(())
    }
}
