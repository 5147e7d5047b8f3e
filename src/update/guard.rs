//! Preconditions checked before an update run touches the network or disk.

use std::path::Path;
use walkdir::WalkDir;

use super::github::{Quota, ReleaseSource};
use crate::error::{Result, UpdateError};

/// Version control metadata directories that mark a source checkout.
const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn"];

/// Fails when the process was started by a post-update relaunch.
pub fn check_loop_prevention<S: AsRef<str>>(args: &[S], marker: &str) -> Result<()> {
    if args.iter().any(|a| a.as_ref() == marker) {
        return Err(UpdateError::LoopPrevention);
    }
    Ok(())
}

/// Fails when `work_dir` (at any depth) contains a version control checkout.
pub fn check_dev_environment(work_dir: &Path) -> Result<()> {
    let found = WalkDir::new(work_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| {
            e.file_type().is_dir()
                && e.file_name()
                    .to_str()
                    .is_some_and(|name| VCS_DIRS.contains(&name))
        });

    match found {
        Some(entry) => Err(UpdateError::DevEnvironmentDetected {
            path: entry.into_path(),
        }),
        None => Ok(()),
    }
}

/// Fails when the release source has `minimum` or fewer requests left.
pub fn check_quota(
    source: &dyn ReleaseSource,
    credential: Option<&str>,
    minimum: u32,
) -> Result<Quota> {
    let quota = source.remaining_quota(credential)?;
    if quota.remaining <= minimum {
        return Err(UpdateError::QuotaExhausted { reset: quota.reset });
    }
    tracing::debug!("API requests remaining: {}", quota.remaining);
    Ok(quota)
}
