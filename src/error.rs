//! Error kinds reported by an update run.

use chrono::{DateTime, Local};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("booting after update install, skipping update check")]
    LoopPrevention,

    #[error("version control checkout detected at {path}, aborting update to protect file structure")]
    DevEnvironmentDetected { path: PathBuf },

    #[error(
        "GitHub API rate limit reached, cannot check for updates at this time (resets on {})",
        .reset.format("%B %d at %H:%M:%S")
    )]
    QuotaExhausted { reset: DateTime<Local> },

    #[error("no releases found for repository {repo}")]
    ReleaseNotFound { repo: String },

    #[error("no asset '{asset}' found for release {release}")]
    AssetNotFound { release: String, asset: String },

    #[error("no assets found for release {release}")]
    NoAssetsFound { release: String },

    #[error("download mode '{0}' is not recognized (expected 'archive' or 'asset')")]
    InvalidDownloadType(String),

    #[error("repository {repo} could not be found")]
    RepositoryNotFound { repo: String },

    #[error("'{file}' is not an executable")]
    FileNotExecutable { file: String },

    #[error("'{file}' is not a script")]
    FileNotScript { file: String },

    #[error("failed to delete {path}: {source}")]
    DeletionFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid archive {archive}: {reason}")]
    ArchiveStructureInvalid { archive: PathBuf, reason: String },

    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("extraction failed: {message}")]
    Extraction { message: String },

    #[error("invalid config field '{field}': {message}")]
    InvalidConfig { field: &'static str, message: String },
}

impl UpdateError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn network(url: &str, message: impl ToString) -> Self {
        Self::Network {
            url: url.to_string(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
