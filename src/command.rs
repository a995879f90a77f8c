//! Repeatable fork + exec of an external program.
//!
//! A [`Command`] describes how to run a program: its argument vector, the
//! environment additions, working directory, output routing and identity. It
//! is a plain value; two commands compare equal when they would launch the
//! program the same way, which lets a supervisor recognise that a reloaded
//! definition did not change.
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{self, Child, Stdio};
use std::sync::LazyLock;
use std::{fmt, io};

use regex::Regex;
use serde::Deserialize;
use strum_macros::{AsRefStr, EnumString};
use tracing::debug;

use crate::constants::{SHELL, SHELL_COMMAND_FLAG};
use crate::error::CommandError;
use crate::identity::Identity;
use crate::output::OutputStream;

static SHELL_META: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[\]'"$\&*()`{}\\;<|>?\[]"#).expect("valid shell metacharacter pattern")
});

static SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\r\n]+").expect("valid whitespace pattern"));

/// Program to run, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    /// A command string. Run through the shell only when it contains shell
    /// metacharacters, otherwise split on whitespace and executed directly.
    Text(String),
    /// An explicit argument vector, never interpreted by a shell.
    Args(Vec<String>),
}

impl CommandLine {
    /// Returns `true` when running this line requires a shell.
    pub fn needs_shell(&self) -> bool {
        match self {
            CommandLine::Text(text) => SHELL_META.is_match(text),
            CommandLine::Args(_) => false,
        }
    }

    /// Resolves the line into `(executable, argv)`.
    fn resolve(&self) -> Result<(String, Vec<String>), CommandError> {
        let argv: Vec<String> = match self {
            CommandLine::Text(text) if self.needs_shell() => {
                return Ok((
                    SHELL.to_string(),
                    vec![
                        SHELL.to_string(),
                        SHELL_COMMAND_FLAG.to_string(),
                        text.clone(),
                    ],
                ));
            }
            CommandLine::Text(text) => SPACE
                .split(text)
                .filter(|token| !token.is_empty())
                .map(str::to_string)
                .collect(),
            CommandLine::Args(args) => args.clone(),
        };

        match argv.first() {
            Some(program) if !program.is_empty() => Ok((program.clone(), argv)),
            _ => Err(CommandError::EmptyCommand),
        }
    }
}

impl From<&str> for CommandLine {
    fn from(text: &str) -> Self {
        CommandLine::Text(text.to_string())
    }
}

impl From<String> for CommandLine {
    fn from(text: String) -> Self {
        CommandLine::Text(text)
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(args: Vec<String>) -> Self {
        CommandLine::Args(args)
    }
}

impl From<&[&str]> for CommandLine {
    fn from(args: &[&str]) -> Self {
        CommandLine::Args(args.iter().map(|arg| arg.to_string()).collect())
    }
}

/// Where a child's stdout and stderr go.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputMode {
    /// Pass the supervisor's stdout and stderr through untouched.
    #[default]
    #[serde(alias = "console", alias = "stdout")]
    #[strum(to_string = "inherit", serialize = "console", serialize = "stdout")]
    Inherit,
    /// Send both streams to the null device.
    #[serde(alias = "/dev/null")]
    #[strum(to_string = "discard", serialize = "/dev/null")]
    Discard,
    /// Send both streams into a pipe read by the supervisor.
    #[serde(alias = "log", alias = "pipe")]
    #[strum(to_string = "capture", serialize = "log", serialize = "pipe")]
    Capture,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A freshly launched child and, in capture mode, the read end of its output.
#[derive(Debug)]
pub struct Spawned {
    /// Handle used to wait for the child.
    pub child: Child,
    /// Supervisor's end of the capture pipe.
    pub output: Option<OutputStream>,
}

impl Spawned {
    /// PID of the launched child.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

/// Description of "run this program this way".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    argv: Vec<String>,
    executable: String,
    environment: BTreeMap<String, String>,
    cwd: Option<PathBuf>,
    output: OutputMode,
    user: Option<String>,
    group: Option<String>,
}

impl Command {
    /// Builds a command from a command string or argument vector.
    ///
    /// Strings containing shell metacharacters are wrapped as
    /// `/bin/sh -c <string>`; anything else is split on whitespace and
    /// executed without a shell.
    pub fn new(line: impl Into<CommandLine>) -> Result<Self, CommandError> {
        let (executable, argv) = line.into().resolve()?;
        Ok(Self {
            argv,
            executable,
            environment: BTreeMap::new(),
            cwd: None,
            output: OutputMode::Inherit,
            user: None,
            group: None,
        })
    }

    /// Overrides `argv[0]` without changing the executable that is run.
    pub fn argv0(mut self, name: impl Into<String>) -> Self {
        self.argv[0] = name.into();
        self
    }

    /// Adds or replaces one environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Adds or replaces several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.environment
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Directory to run the child in.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Where the child's stdout and stderr go.
    pub fn output(mut self, mode: OutputMode) -> Self {
        self.output = mode;
        self
    }

    /// User to run the child as.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Group to run the child as. Defaults to the user's primary group.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn group_name(&self) -> Option<&str> {
        self.group.as_deref()
    }

    /// Launches the command.
    pub fn run(&self) -> Result<Spawned, CommandError> {
        self.run_with_env(std::iter::empty::<(&str, &str)>())
    }

    /// Launches the command with extra environment variables, applied after
    /// the command's own environment.
    ///
    /// The child leads a new process group, so signals aimed at the
    /// supervisor's group (an interactive `^C`, for instance) do not reach it.
    /// Its stdin is always the null device.
    ///
    /// Fails with [`CommandError::Spawn`] when the child cannot be created and
    /// with [`CommandError::Exec`] when it was created but exited before
    /// running the program.
    pub fn run_with_env<I, K, V>(&self, extra_env: I) -> Result<Spawned, CommandError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let identity =
            Identity::resolve(self.user.as_deref(), self.group.as_deref())?;

        let mut cmd = process::Command::new(&self.executable);
        cmd.arg0(&self.argv[0]).args(&self.argv[1..]);
        cmd.stdin(Stdio::null());

        let read_end = match self.output {
            OutputMode::Inherit => None,
            OutputMode::Discard => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
                None
            }
            OutputMode::Capture => {
                let (read_end, write_end) = output_pipe().map_err(CommandError::Pipe)?;
                let stderr_end = write_end.try_clone().map_err(CommandError::Pipe)?;
                debug!(
                    "Capturing output of `{}` through pipe fd {}",
                    self.executable,
                    read_end.as_raw_fd()
                );
                cmd.stdout(Stdio::from(write_end))
                    .stderr(Stdio::from(stderr_end));
                Some(read_end)
            }
        };

        if !identity.is_inherited() {
            debug!(
                "Running `{}` as uid {:?}, gid {:?}",
                self.executable,
                identity.uid(),
                identity.gid()
            );
        }
        identity.apply(&mut cmd);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.environment);
        cmd.envs(extra_env);

        unsafe {
            cmd.pre_exec(|| {
                // Lead a new process group so the whole tree can be signalled
                // without touching the supervisor's group.
                if libc::setpgid(0, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        debug!("Executing command: {:?}", self.argv);

        let spawn_result = cmd.spawn();
        // Drops the parent's copies of the pipe write end; the child owns
        // writing from here on.
        drop(cmd);

        let child = spawn_result.map_err(|source| {
            let program = self.executable.clone();
            if is_fork_failure(&source) {
                CommandError::Spawn { program, source }
            } else {
                CommandError::Exec { program, source }
            }
        })?;
        debug!("Command `{}` started with PID {}", self.executable, child.id());

        Ok(Spawned {
            child,
            output: read_end.map(OutputStream::from_fd),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}

/// Returns `true` for errors raised by the parent while creating the child.
///
/// Everything else reported by `spawn` happened in the child after fork and
/// means the program image was never replaced.
fn is_fork_failure(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EAGAIN | libc::ENOMEM | libc::EMFILE | libc::ENFILE)
    )
}

/// Creates a pipe with both ends close-on-exec.
///
/// The write end reaches the child only through the stdout/stderr `dup2`;
/// neither end leaks into any other process spawned later.
fn output_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let (read_end, write_end) = nix::unistd::pipe().map_err(io::Error::from)?;
    set_cloexec(&read_end)?;
    set_cloexec(&write_end)?;
    Ok((read_end, write_end))
}

fn set_cloexec(fd: &impl AsRawFd) -> io::Result<()> {
    let res = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
