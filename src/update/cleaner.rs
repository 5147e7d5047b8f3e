use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, UpdateError};

/// Delete `candidates` (relative to `work_dir`) in order.
///
/// Stops at the first path that cannot be removed. Directories are removed
/// with `remove_dir`, so they must already be empty by the time they come up.
pub fn clean_files(work_dir: &Path, candidates: &[PathBuf], enabled: bool, verbose: bool) -> Result<()> {
    if !enabled {
        return Ok(());
    }

    for relative in candidates {
        let path = work_dir.join(relative);
        if verbose {
            tracing::info!("Removing path {}", relative.display());
        } else {
            tracing::debug!("Removing path {}", relative.display());
        }

        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            // gone already
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(source) => return Err(UpdateError::DeletionFailed { path, source }),
        };

        let removed = if meta.is_dir() {
            fs::remove_dir(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|source| UpdateError::DeletionFailed {
            path: path.clone(),
            source,
        })?;
    }

    Ok(())
}
