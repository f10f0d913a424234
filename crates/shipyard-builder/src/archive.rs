//! Packaging served content as an artifact tarball.

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use shipyard_core::{Error, Result};
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::debug;

/// Re-pack a tar copied out of a container into a gzip tarball at `dest`.
///
/// The container archive nests everything under the copied directory's name;
/// that first component is stripped so the artifact's entries are relative
/// to the served root. Returns the artifact size in bytes.
pub async fn repack_container_archive(archive: Bytes, dest: &Path) -> Result<u64> {
    let dest = dest.to_owned();
    spawn_blocking(move || repack_sync(&archive, &dest))
        .await
        .map_err(|e| Error::Internal(format!("artifact task failed: {}", e)))?
}

fn repack_sync(archive: &[u8], dest: &Path) -> Result<u64> {
    let io_err = |e: std::io::Error| Error::io(format!("failed to write artifact {}", dest.display()), e);

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let file = File::create(dest).map_err(io_err)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    let mut source = tar::Archive::new(Cursor::new(archive));
    let mut entries = 0usize;
    for entry in source.entries().map_err(io_err)? {
        let mut entry = entry.map_err(io_err)?;
        let path = entry.path().map_err(io_err)?.into_owned();
        let stripped: PathBuf = path.components().skip(1).collect();
        if stripped.as_os_str().is_empty() {
            continue;
        }

        let mut header = entry.header().clone();
        builder
            .append_data(&mut header, &stripped, &mut entry)
            .map_err(io_err)?;
        entries += 1;
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(io_err)?;

    let size = std::fs::metadata(dest).map_err(io_err)?.len();
    debug!(artifact = %dest.display(), entries, size, "Wrote artifact");
    Ok(size)
}
