//! Preparing an isolated copy of a project source tree.

use bytes::Bytes;
use shipyard_core::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Directories never copied into a build: dependency caches and VCS metadata.
const EXCLUDED_DIRS: &[&str] = &["node_modules", ".git"];

fn is_excluded(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| EXCLUDED_DIRS.contains(&name))
            .unwrap_or(false)
}

/// Copy `source` into `target`, skipping excluded directories.
///
/// Returns the number of files copied.
pub async fn copy_source_tree(source: &Path, target: &Path) -> Result<usize> {
    let source = source.to_owned();
    let target = target.to_owned();
    spawn_blocking(move || copy_source_tree_sync(&source, &target))
        .await
        .map_err(|e| Error::Internal(format!("source copy task failed: {}", e)))?
}

fn copy_source_tree_sync(source: &Path, target: &Path) -> Result<usize> {
    if !source.is_dir() {
        return Err(Error::InvalidInput(format!(
            "source directory does not exist: {}",
            source.display()
        )));
    }

    let mut copied = 0;
    let walker = WalkDir::new(source).into_iter().filter_entry(|e| !is_excluded(e));

    for entry in walker {
        let entry = entry.map_err(|e| {
            Error::io(
                format!("failed to walk {}", source.display()),
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
            )
        })?;

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::Internal(e.to_string()))?;
        let destination: PathBuf = target.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)
                .map_err(|e| Error::io(format!("failed to create {}", destination.display()), e))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &destination)
                .map_err(|e| Error::io(format!("failed to copy {}", entry.path().display()), e))?;
            copied += 1;
        } else {
            debug!(path = %entry.path().display(), "Skipping non-regular file");
        }
    }

    Ok(copied)
}

/// Pack a directory into an uncompressed tar, suitable as a build context.
pub async fn tar_directory(dir: &Path) -> Result<Bytes> {
    let dir = dir.to_owned();
    spawn_blocking(move || {
        let mut builder = tar::Builder::new(Vec::new());
        builder.follow_symlinks(false);
        builder
            .append_dir_all(".", &dir)
            .map_err(|e| Error::io(format!("failed to archive {}", dir.display()), e))?;
        let data = builder
            .into_inner()
            .map_err(|e| Error::io("failed to finish build context", e))?;
        Ok(Bytes::from(data))
    })
    .await
    .map_err(|e| Error::Internal(format!("archive task failed: {}", e)))?
}
