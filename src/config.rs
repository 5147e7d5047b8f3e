use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, UpdateError};
use crate::update::whitelist::{Whitelist, WhitelistEntry};

pub const DEFAULT_MINIMUM_QUOTA: u32 = 20;
pub const CONFIG_FILE_NAME: &str = "ghau.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadMode {
    /// Source archive generated for the release tag
    #[default]
    Archive,
    /// A binary asset uploaded to the release
    Asset,
}

impl FromStr for DownloadMode {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "archive" | "zip" => Ok(Self::Archive),
            "asset" => Ok(Self::Asset),
            _ => Err(UpdateError::InvalidDownloadType(s.to_string())),
        }
    }
}

/// Run parameters for one update run. Read-only once built.
#[derive(Debug, Clone)]
pub struct Config {
    pub local_version: String,
    pub repository: String,
    pub accept_pre_releases: bool,
    pub relaunch_command: Option<String>,
    pub clean_before_install: bool,
    pub whitelist: Whitelist,
    pub download_mode: DownloadMode,
    pub asset_name: Option<String>,
    pub credential: Option<String>,
    pub minimum_quota: u32,
    pub verbose: bool,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    local_version: String,
    repository: String,

    #[serde(default)]
    accept_pre_releases: bool,

    #[serde(default)]
    relaunch_command: Option<String>,

    #[serde(default)]
    clean_before_install: bool,

    #[serde(default)]
    whitelist: Vec<WhitelistEntry>,

    #[serde(default)]
    download_mode: Option<String>,

    #[serde(default)]
    asset_name: Option<String>,

    #[serde(default)]
    credential: Option<String>,

    #[serde(default = "default_minimum_quota")]
    minimum_quota: u32,

    #[serde(default)]
    verbose: bool,
}

fn default_minimum_quota() -> u32 {
    DEFAULT_MINIMUM_QUOTA
}

impl Config {
    /// Build a config with defaults for everything but the two required fields.
    pub fn new(local_version: impl Into<String>, repository: impl Into<String>) -> Result<Self> {
        let config = Self {
            local_version: local_version.into(),
            repository: repository.into(),
            accept_pre_releases: false,
            relaunch_command: None,
            clean_before_install: false,
            whitelist: Whitelist::default(),
            download_mode: DownloadMode::default(),
            asset_name: None,
            credential: None,
            minimum_quota: DEFAULT_MINIMUM_QUOTA,
            verbose: false,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content).map_err(|e| UpdateError::InvalidConfig {
            field: "toml",
            message: e.message().to_string(),
        })?;
        let download_mode = match raw.download_mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => DownloadMode::default(),
        };

        let config = Self {
            local_version: raw.local_version,
            repository: raw.repository,
            accept_pre_releases: raw.accept_pre_releases,
            relaunch_command: raw.relaunch_command,
            clean_before_install: raw.clean_before_install,
            whitelist: Whitelist::from(raw.whitelist),
            download_mode,
            asset_name: raw.asset_name,
            credential: raw.credential,
            minimum_quota: raw.minimum_quota,
            verbose: raw.verbose,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| UpdateError::io(format!("Failed to read {}", path.display()), e))?;
        Self::from_toml_str(&content)
    }

    /// Locate a config file: the working directory first, then the user config dir.
    pub fn find(work_dir: &Path) -> Option<PathBuf> {
        let local = work_dir.join(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }

        let user = Self::user_config_path();
        user.exists().then_some(user)
    }

    pub fn user_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("ghau")
            .join("config.toml")
    }

    fn validate(&self) -> Result<()> {
        if self.local_version.trim().is_empty() {
            return Err(UpdateError::InvalidConfig {
                field: "local_version",
                message: "must not be empty".to_string(),
            });
        }

        let mut parts = self.repository.splitn(2, '/');
        let owner = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(UpdateError::InvalidConfig {
                field: "repository",
                message: format!("expected 'owner/name', got '{}'", self.repository),
            });
        }

        Ok(())
    }

    pub fn with_pre_releases(mut self, accept: bool) -> Self {
        self.accept_pre_releases = accept;
        self
    }

    pub fn with_relaunch_command(mut self, command: impl Into<String>) -> Self {
        self.relaunch_command = Some(command.into());
        self
    }

    pub fn with_clean(mut self, clean: bool) -> Self {
        self.clean_before_install = clean;
        self
    }

    pub fn with_whitelist(mut self, whitelist: Whitelist) -> Self {
        self.whitelist = whitelist;
        self
    }

    pub fn with_download_mode(mut self, mode: DownloadMode) -> Self {
        self.download_mode = mode;
        self
    }

    pub fn with_asset_name(mut self, name: impl Into<String>) -> Self {
        self.asset_name = Some(name.into());
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_minimum_quota(mut self, minimum: u32) -> Self {
        self.minimum_quota = minimum;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
