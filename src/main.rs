use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use ghau::update::{GithubSource, HttpTransport, SystemLauncher};
use ghau::{whitelist_report, Config, DownloadMode, UpdateError, UpdateOutcome, Updater};

#[derive(Parser, Debug)]
#[command(name = "ghau")]
#[command(about = "Update a program in place from its GitHub releases", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to ./ghau.toml, then ~/.config/ghau/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory to update (defaults to current directory)
    #[arg(short = 'C', long, global = true)]
    dir: Option<PathBuf>,

    /// Repository as owner/name, when not using a config file
    #[arg(long, global = true)]
    repo: Option<String>,

    /// Installed version, when not using a config file
    #[arg(long, global = true)]
    local_version: Option<String>,

    /// GitHub token used for API requests and downloads
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Print per-file and per-chunk progress
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install the latest release if it differs from the local version
    Update {
        /// Accept pre-releases
        #[arg(long)]
        pre_releases: bool,

        /// Delete unprotected files before installing
        #[arg(long)]
        clean: bool,

        /// Command to relaunch the program after installing
        #[arg(long)]
        reboot: Option<String>,

        /// Download mode: archive or asset
        #[arg(long)]
        mode: Option<String>,

        /// Asset name to download in asset mode
        #[arg(long)]
        asset: Option<String>,

        /// Stop when this many API requests or fewer remain
        #[arg(long)]
        min_quota: Option<u32>,

        /// Arguments the host program was started with; `-ghau` among them skips the update
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        host_args: Vec<String>,
    },

    /// Only check whether an update is available
    Check {
        /// Arguments the host program was started with
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        host_args: Vec<String>,
    },

    /// List the paths the whitelist would not protect from cleaning
    Whitelist,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let work_dir = match &cli.dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let mut config = load_config(&cli, &work_dir)?;
    if let Some(token) = &cli.token {
        config = config.with_credential(token.clone());
    }
    if cli.verbose {
        config = config.with_verbose(true);
    }
    init_logging(config.verbose);

    match cli.command {
        Command::Update {
            pre_releases,
            clean,
            reboot,
            mode,
            asset,
            min_quota,
            host_args,
        } => {
            if pre_releases {
                config = config.with_pre_releases(true);
            }
            if clean {
                config = config.with_clean(true);
            }
            if let Some(reboot) = reboot {
                config = config.with_relaunch_command(reboot);
            }
            if let Some(mode) = mode {
                config = config.with_download_mode(mode.parse::<DownloadMode>()?);
            }
            if let Some(asset) = asset {
                config = config.with_asset_name(asset);
            }
            if let Some(min) = min_quota {
                config = config.with_minimum_quota(min);
            }
            run_update_command(config, work_dir, host_args)
        }
        Command::Check { host_args } => run_check_command(config, work_dir, host_args),
        Command::Whitelist => run_whitelist_command(&config, &work_dir),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli, work_dir: &Path) -> Result<Config> {
    let path = cli.config.clone().or_else(|| Config::find(work_dir));
    if let Some(path) = path {
        return Ok(Config::load(&path)?);
    }

    match (&cli.local_version, &cli.repo) {
        (Some(version), Some(repo)) => Ok(Config::new(version.clone(), repo.clone())?),
        _ => Err(anyhow!(
            "No config found. Create {} or pass --local-version and --repo",
            ghau::config::CONFIG_FILE_NAME
        )),
    }
}

fn build_updater(config: Config, work_dir: PathBuf, host_args: Vec<String>) -> Result<Updater> {
    let transport = HttpTransport::new(config.credential.clone(), config.verbose)?;
    let updater = Updater::new(
        config,
        work_dir,
        Box::new(GithubSource::new()?),
        Box::new(transport),
        Box::new(SystemLauncher),
    );
    Ok(updater.with_args(invocation_args(host_args)))
}

/// The argument list the loop marker is looked for in: the host's arguments
/// behind a program name.
fn invocation_args(host_args: Vec<String>) -> Vec<String> {
    std::iter::once("ghau".to_string()).chain(host_args).collect()
}

fn run_update_command(config: Config, work_dir: PathBuf, host_args: Vec<String>) -> Result<()> {
    println!("{}", "Checking for updates...".cyan());
    let local_version = config.local_version.clone();
    let updater = build_updater(config, work_dir, host_args)?;

    match updater.run() {
        UpdateOutcome::NoUpdateNeeded => {
            println!(
                "{} You're running the latest version ({})",
                "✓".green(),
                local_version
            );
        }
        outcome @ UpdateOutcome::Installed { .. } => {
            if let UpdateOutcome::Installed {
                tag,
                relaunched,
                relaunch_error,
            } = &outcome
            {
                println!(
                    "{} Updated from {} to {}",
                    "✓".green(),
                    local_version.dimmed(),
                    tag.green()
                );
                if *relaunched {
                    println!("  Relaunching...");
                }
                if let Some(err) = relaunch_error {
                    println!("{} Could not relaunch: {}", "!".yellow(), err);
                }
            }
            outcome.finish();
        }
        UpdateOutcome::Aborted(err) => report_abort(&err),
    }

    Ok(())
}

fn run_check_command(config: Config, work_dir: PathBuf, host_args: Vec<String>) -> Result<()> {
    let local_version = config.local_version.clone();
    let updater = build_updater(config, work_dir, host_args)?;

    match updater.check() {
        Ok(Some(release)) => {
            println!(
                "{} New version available: {} → {}",
                "↑".yellow(),
                local_version.dimmed(),
                release.tag.green()
            );
            println!("  Run `ghau update` to install");
        }
        Ok(None) => {
            println!(
                "{} You're running the latest version ({})",
                "✓".green(),
                local_version
            );
        }
        Err(err) => report_abort(&err),
    }
    Ok(())
}

fn run_whitelist_command(config: &Config, work_dir: &Path) -> Result<()> {
    let unprotected = whitelist_report(work_dir, &config.whitelist)?;

    if unprotected.is_empty() {
        println!("{} Everything is protected by your whitelist", "✓".green());
        return Ok(());
    }

    println!(
        "{} Whitelist will not protect the following ({}):",
        "!".yellow(),
        unprotected.len()
    );
    for path in &unprotected {
        println!("   {}", path.display());
    }
    Ok(())
}

fn report_abort(err: &UpdateError) {
    match err {
        UpdateError::LoopPrevention => println!("{} {}", "●".cyan(), err),
        _ => println!("{} {}", "✗".red(), err),
    }
}
