//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! the write-then-rename primitive used to install artifacts.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Suffix marker for temporary files produced by [`write_atomic`].
pub const TEMP_MARKER: &str = ".tmp-";

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Write `contents` next to `target` under a unique temporary name, flush it
/// to disk, then rename it over `target`.
///
/// Readers of `target` observe either the previous file or the complete new
/// one, also after a crash. The temporary file is removed if any step fails.
pub async fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        ensure_dir_all_with_op("creating artifact directory", parent).await?;
    }

    let tmp = temp_sibling(target);
    if let Err(e) = write_synced(&tmp, contents).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error("writing temporary file", &tmp, e));
    }

    if let Err(e) = tokio::fs::rename(&tmp, target).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_error("replacing artifact", target, e));
    }

    debug!(path = %target.display(), bytes = contents.len(), "Installed file atomically");
    Ok(())
}

async fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}

fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    target.with_file_name(format!("{name}{TEMP_MARKER}{}", uuid::Uuid::new_v4()))
}

/// Remove temporary files left behind by an interrupted [`write_atomic`].
///
/// Returns the number of files deleted. Missing directories are not an error.
pub async fn cleanup_temp_files(dir: &Path) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(io_error("reading data directory", dir, e)),
    };

    let mut deleted = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_error("reading data directory", dir, e))?
    {
        let path = entry.path();
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(TEMP_MARKER));
        if !is_temp || !path.is_file() {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => deleted += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete temporary file"),
        }
    }

    Ok(deleted)
}
