//! Keep a program up to date from its GitHub releases.
//!
//! [`Updater`] checks a repository for a release whose tag differs from the
//! local version, optionally clears the working directory of everything the
//! whitelist does not protect, installs the release and relaunches the host
//! program with a marker argument so the next start skips the check.

pub mod config;
pub mod error;
pub mod update;

pub use config::{Config, DownloadMode};
pub use error::UpdateError;
pub use update::reboot::{executable_command, plain_command, script_command};
pub use update::whitelist::{whitelist_report, Whitelist, WhitelistEntry};
pub use update::{Release, UpdateOutcome, Updater, LOOP_MARKER};
