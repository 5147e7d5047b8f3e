//! Relaunching the host program after an install.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{Result, UpdateError};

/// Argument that marks a post-update relaunch. Its presence skips the next update check.
pub const LOOP_MARKER: &str = "-ghau";

const SCRIPT_EXTENSIONS: &[&str] = &["py", "sh", "rb", "pl", "ps1", "bat", "cmd"];

/// Starts a process without waiting on it.
pub trait Launcher {
    fn spawn_detached(&self, program: &str, args: &[String]) -> Result<()>;
}

/// Spawns with all standard streams closed, in a process group of its own on
/// unix, so the child outlives the updater and its terminal.
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn spawn_detached(&self, program: &str, args: &[String]) -> Result<()> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
            .spawn()
            .map(|_| ())
            .map_err(|e| UpdateError::io(format!("Failed to launch {}", program), e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Unix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl RelaunchCommand {
    /// Turn a command template into something spawnable, with the loop marker appended.
    ///
    /// Windows commands are split on whitespace; elsewhere the whole string
    /// goes to `sh -c` untouched.
    pub fn build(template: &str, platform: Platform) -> Self {
        let command = with_marker(template);
        match platform {
            Platform::Windows => {
                let mut parts = command.split_whitespace().map(str::to_string);
                let program = parts.next().unwrap_or_default();
                Self {
                    program,
                    args: parts.collect(),
                }
            }
            Platform::Unix => Self {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), command],
            },
        }
    }

    pub fn spawn(&self, launcher: &dyn Launcher) -> Result<()> {
        tracing::info!("Relaunching: {} {}", self.program, self.args.join(" "));
        launcher.spawn_detached(&self.program, &self.args)
    }
}

fn with_marker(command: &str) -> String {
    let command = command.trim();
    if command.split_whitespace().any(|t| t == LOOP_MARKER) {
        command.to_string()
    } else {
        format!("{} {}", command, LOOP_MARKER)
    }
}

/// Spawn the relaunch command, if one is configured. Returns whether anything was launched.
pub fn relaunch(template: Option<&str>, launcher: &dyn Launcher) -> Result<bool> {
    let Some(template) = template.filter(|t| !t.trim().is_empty()) else {
        return Ok(false);
    };
    RelaunchCommand::build(template, Platform::current()).spawn(launcher)?;
    Ok(true)
}

/// Command that runs `file` in `work_dir` through `interpreter`.
pub fn script_command(work_dir: &Path, interpreter: &str, file: &str) -> Result<String> {
    let is_script = Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
    if !is_script {
        return Err(UpdateError::FileNotScript {
            file: file.to_string(),
        });
    }

    let path = work_dir.join(file);
    Ok(format!("{} {} {}", interpreter, path.display(), LOOP_MARKER))
}

/// Command that runs the executable `file` in `work_dir`.
pub fn executable_command(work_dir: &Path, file: &str) -> Result<String> {
    let path = work_dir.join(file);
    if !is_executable(&path) {
        return Err(UpdateError::FileNotExecutable {
            file: file.to_string(),
        });
    }
    Ok(format!("{} {}", path.display(), LOOP_MARKER))
}

/// Any command, with the loop marker appended.
pub fn plain_command(command: &str) -> String {
    with_marker(command)
}

#[cfg(windows)]
fn is_executable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(any(unix, windows)))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    pub(crate) struct RecordingLauncher {
        pub(crate) launched: Rc<RefCell<Vec<(String, Vec<String>)>>>,
    }

    impl Launcher for RecordingLauncher {
        fn spawn_detached(&self, program: &str, args: &[String]) -> Result<()> {
            self.launched
                .borrow_mut()
                .push((program.to_string(), args.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn test_windows_command_is_split() {
        let cmd = RelaunchCommand::build("app.exe --fast", Platform::Windows);
        assert_eq!(cmd.program, "app.exe");
        assert_eq!(cmd.args, vec!["--fast", "-ghau"]);
    }

    #[test]
    fn test_unix_command_passes_through_shell() {
        let cmd = RelaunchCommand::build("./app --fast", Platform::Unix);
        assert_eq!(cmd.program, "sh");
        assert_eq!(cmd.args, vec!["-c", "./app --fast -ghau"]);
    }

    #[test]
    fn test_marker_not_duplicated() {
        assert_eq!(plain_command("./app -ghau"), "./app -ghau");
        assert_eq!(plain_command("./app"), "./app -ghau");
    }

    #[test]
    fn test_relaunch_without_command_launches_nothing() {
        let launcher = RecordingLauncher::default();
        assert!(!relaunch(None, &launcher).unwrap());
        assert!(launcher.launched.borrow().is_empty());

        assert!(relaunch(Some("./app"), &launcher).unwrap());
        assert_eq!(launcher.launched.borrow().len(), 1);
    }

    #[test]
    fn test_script_command() {
        let dir = Path::new("/opt/app");
        let cmd = script_command(dir, "python3", "main.py").unwrap();
        assert!(cmd.starts_with("python3 "));
        assert!(cmd.ends_with("main.py -ghau"));

        assert!(matches!(
            script_command(dir, "python3", "main.txt"),
            Err(UpdateError::FileNotScript { file }) if file == "main.txt"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_launcher_runs_detached() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("started");
        let script = format!("echo noise; touch '{}'", marker.display());

        SystemLauncher
            .spawn_detached("sh", &["-c".to_string(), script])
            .unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !marker.exists() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(marker.exists());
    }

    #[test]
    fn test_system_launcher_reports_missing_program() {
        let err = SystemLauncher
            .spawn_detached("ghau-no-such-program", &[])
            .unwrap_err();
        assert!(matches!(err, UpdateError::Io { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_command_checks_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("app");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();

        assert!(matches!(
            executable_command(dir.path(), "app"),
            Err(UpdateError::FileNotExecutable { .. })
        ));

        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        let cmd = executable_command(dir.path(), "app").unwrap();
        assert!(cmd.ends_with("app -ghau"));
    }
}
