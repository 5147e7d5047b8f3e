pub mod cleaner;
pub mod github;
pub mod guard;
pub mod installer;
pub mod reboot;
pub mod release;
pub mod version;
pub mod whitelist;

use std::path::{Path, PathBuf};

use crate::config::{Config, DownloadMode};
use crate::error::{Result, UpdateError};

pub use github::{GithubSource, HttpTransport, Quota, ReleaseSource, Transport};
pub use reboot::{Launcher, SystemLauncher, LOOP_MARKER};
pub use release::{Asset, Release};

/// How one update run ended.
#[derive(Debug)]
pub enum UpdateOutcome {
    NoUpdateNeeded,
    /// A release was installed. The process must end now, even when the
    /// relaunch itself failed.
    Installed {
        tag: String,
        relaunched: bool,
        relaunch_error: Option<UpdateError>,
    },
    Aborted(UpdateError),
}

impl UpdateOutcome {
    pub fn requires_exit(&self) -> bool {
        matches!(self, Self::Installed { .. })
    }

    /// Terminate the process after an install; hand the outcome back otherwise.
    pub fn finish(self) -> Self {
        if self.requires_exit() {
            std::process::exit(0);
        }
        self
    }
}

/// What to download once the directory has been cleaned.
#[derive(Debug, Clone)]
enum DownloadPlan {
    Archive { url: String },
    Asset { name: String, url: String },
}

enum State {
    Start,
    GuardChecking,
    Resolving,
    Comparing(Release),
    Cleaning(Release, DownloadPlan),
    Downloading(Release, DownloadPlan),
    Installing(Release, DownloadPlan, PathBuf),
    Relaunching(Release),
    Done(UpdateOutcome),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::GuardChecking => "guard-checking",
            Self::Resolving => "resolving",
            Self::Comparing(_) => "comparing",
            Self::Cleaning(..) => "cleaning",
            Self::Downloading(..) => "downloading",
            Self::Installing(..) => "installing",
            Self::Relaunching(_) => "relaunching",
            Self::Done(_) => "done",
        }
    }
}

/// Runs update checks and installs for one working directory.
pub struct Updater {
    config: Config,
    work_dir: PathBuf,
    args: Vec<String>,
    source: Box<dyn ReleaseSource>,
    transport: Box<dyn Transport>,
    launcher: Box<dyn Launcher>,
}

impl Updater {
    pub fn new(
        config: Config,
        work_dir: impl Into<PathBuf>,
        source: Box<dyn ReleaseSource>,
        transport: Box<dyn Transport>,
        launcher: Box<dyn Launcher>,
    ) -> Self {
        Self {
            config,
            work_dir: work_dir.into(),
            args: std::env::args().collect(),
            source,
            transport,
            launcher,
        }
    }

    /// Updater for the current directory backed by GitHub.
    pub fn github(config: Config) -> Result<Self> {
        let work_dir = std::env::current_dir()
            .map_err(|e| UpdateError::io("Failed to get current directory", e))?;
        let source = GithubSource::new()?;
        let transport = HttpTransport::new(config.credential.clone(), config.verbose)?;
        Ok(Self::new(
            config,
            work_dir,
            Box::new(source),
            Box::new(transport),
            Box::new(SystemLauncher),
        ))
    }

    /// Replace the invocation arguments inspected for the loop marker.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Run one update attempt. Never exits the process; see [`UpdateOutcome::finish`].
    pub fn run(&self) -> UpdateOutcome {
        let mut state = State::Start;
        loop {
            state = match state {
                State::Done(outcome) => {
                    tracing::debug!(?outcome, "update run finished");
                    return outcome;
                }
                current => {
                    tracing::debug!(stage = current.name(), "update stage");
                    match self.step(current) {
                        Ok(next) => next,
                        Err(e) => State::Done(UpdateOutcome::Aborted(e)),
                    }
                }
            };
        }
    }

    /// Run and, if something was installed, terminate the process.
    pub fn check_for_updates(&self) -> UpdateOutcome {
        self.run().finish()
    }

    /// Report the release that would be installed, without touching the disk.
    pub fn check(&self) -> Result<Option<Release>> {
        self.guard()?;
        let release = self.resolve()?;
        if version::needs_update(&self.config.local_version, &release.tag) {
            Ok(Some(release))
        } else {
            Ok(None)
        }
    }

    fn step(&self, state: State) -> Result<State> {
        let next = match state {
            State::Start => State::GuardChecking,
            State::GuardChecking => {
                self.guard()?;
                State::Resolving
            }
            State::Resolving => State::Comparing(self.resolve()?),
            State::Comparing(release) => {
                if !version::needs_update(&self.config.local_version, &release.tag) {
                    tracing::info!("No update required");
                    return Ok(State::Done(UpdateOutcome::NoUpdateNeeded));
                }
                tracing::info!(
                    "Update available: {} -> {}",
                    self.config.local_version,
                    release.tag
                );
                let plan = self.plan_download(&release)?;
                State::Cleaning(release, plan)
            }
            State::Cleaning(release, plan) => {
                self.clean()?;
                State::Downloading(release, plan)
            }
            State::Downloading(release, plan) => {
                let (url, file_name) = match &plan {
                    DownloadPlan::Archive { url } => (url.as_str(), archive_file_name(url)),
                    DownloadPlan::Asset { name, url } => (url.as_str(), name.as_str()),
                };
                let dest = self.work_dir.join(file_name);
                let path = self.transport.fetch(url, &dest)?;
                State::Installing(release, plan, path)
            }
            State::Installing(release, plan, path) => {
                match plan {
                    DownloadPlan::Archive { .. } => installer::install_archive(&path, &self.work_dir)?,
                    DownloadPlan::Asset { .. } => {
                        tracing::debug!("Saved asset to {}", path.display());
                    }
                }
                tracing::info!(
                    "Updated from {} to {}",
                    self.config.local_version,
                    release.tag
                );
                State::Relaunching(release)
            }
            State::Relaunching(release) => {
                let relaunch = reboot::relaunch(
                    self.config.relaunch_command.as_deref(),
                    self.launcher.as_ref(),
                );
                let (relaunched, relaunch_error) = match relaunch {
                    Ok(relaunched) => (relaunched, None),
                    Err(e) => {
                        tracing::warn!("Installed {} but relaunch failed: {}", release.tag, e);
                        (false, Some(e))
                    }
                };
                State::Done(UpdateOutcome::Installed {
                    tag: release.tag,
                    relaunched,
                    relaunch_error,
                })
            }
            State::Done(outcome) => State::Done(outcome),
        };
        Ok(next)
    }

    fn guard(&self) -> Result<()> {
        guard::check_loop_prevention(&self.args, LOOP_MARKER)?;
        guard::check_dev_environment(&self.work_dir)?;
        guard::check_quota(
            self.source.as_ref(),
            self.config.credential.as_deref(),
            self.config.minimum_quota,
        )?;
        Ok(())
    }

    fn resolve(&self) -> Result<Release> {
        let releases = self
            .source
            .list_releases(&self.config.repository, self.config.credential.as_deref())?;
        let release = release::resolve_release(
            &releases,
            self.config.accept_pre_releases,
            &self.config.repository,
        )?;
        Ok(release.clone())
    }

    /// Resolve the download before cleaning, so a missing asset leaves the directory alone.
    fn plan_download(&self, release: &Release) -> Result<DownloadPlan> {
        match self.config.download_mode {
            DownloadMode::Archive => Ok(DownloadPlan::Archive {
                url: release.archive_url.clone(),
            }),
            DownloadMode::Asset => {
                let asset = release::resolve_asset(release, self.config.asset_name.as_deref())?;
                tracing::debug!("Found asset {} with URL: {}", asset.name, asset.download_url);
                let name = Path::new(&asset.name)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| UpdateError::AssetNotFound {
                        release: release.tag.clone(),
                        asset: asset.name.clone(),
                    })?;
                Ok(DownloadPlan::Asset {
                    name: name.to_string(),
                    url: asset.download_url.clone(),
                })
            }
        }
    }

    fn clean(&self) -> Result<()> {
        if !self.config.clean_before_install {
            return Ok(());
        }
        let candidates = whitelist::whitelist_report(&self.work_dir, &self.config.whitelist)?;
        tracing::info!("Cleaning {} paths", candidates.len());
        cleaner::clean_files(&self.work_dir, &candidates, true, self.config.verbose)
    }
}

fn archive_file_name(url: &str) -> &'static str {
    if url.ends_with(".tar.gz") || url.contains("/tarball/") {
        "update.tar.gz"
    } else {
        "update.zip"
    }
}
