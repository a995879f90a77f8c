//! Lifecycle of a single supervised daemon.
//!
//! A [`Daemon`] pairs a start [`Command`] with a [`StopStrategy`] and owns at
//! most one running instance of it. It never decides on its own when to start
//! or stop; an external supervisor drives it:
//!
//! ```text
//! construct -> start -> { is_alive | read_line }* -> stop
//! ```
//!
//! All operations are synchronous. `start` returns as soon as the child has
//! been launched, `is_alive` never blocks, and `stop`/`reap` block until the
//! child has been collected. There is no stop timeout: a daemon that ignores
//! its stop signal keeps `stop` waiting, and escalation is left to the caller.
use std::io;
use std::ops::{Deref, DerefMut};
use std::os::fd::{AsRawFd, RawFd};
use std::process::Child;

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::command::{Command, OutputMode, Spawned};
use crate::config::DaemonSpec;
use crate::constants::{DAEMON_PID_ENV, DEFAULT_STOP_SIGNAL, EXEC_FAILURE_STATUS};
use crate::error::{CommandError, DaemonError};
use crate::exit::ExitStatus;
use crate::metadata::Metadata;
use crate::output::{Line, OutputStream};
use crate::signal::SignalSpec;

/// How a running daemon is told to terminate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopStrategy {
    /// Run a helper command with `DAEMON_PID` set and wait for it to exit.
    Command(Command),
    /// Send a signal to the daemon's whole process group.
    Signal(Signal),
}

impl StopStrategy {
    /// Applies the precedence stop command > stop signal > `SIGTERM`.
    pub fn resolve(stop_command: Option<Command>, stop_signal: Option<Signal>) -> Self {
        match (stop_command, stop_signal) {
            (Some(command), _) => StopStrategy::Command(command),
            (None, Some(signal)) => StopStrategy::Signal(signal),
            (None, None) => StopStrategy::default(),
        }
    }
}

impl Default for StopStrategy {
    fn default() -> Self {
        StopStrategy::Signal(DEFAULT_STOP_SIGNAL)
    }
}

/// One supervised program definition plus at most one live instance of it.
///
/// Equality compares the start command and the stop strategy only; the name,
/// metadata and runtime state are ignored. A supervisor reloading its
/// configuration can therefore compare a freshly built daemon against the
/// running one and, when they are equal, [`take_over`](Daemon::take_over) the
/// child instead of restarting it.
#[derive(Debug)]
pub struct Daemon {
    name: String,
    start: Command,
    stop: StopStrategy,
    metadata: Metadata,
    child: Option<Child>,
    output: Option<OutputStream>,
    last_exit: Option<ExitStatus>,
}

impl Daemon {
    /// Creates a stopped daemon.
    pub fn new(name: impl Into<String>, start: Command, stop: StopStrategy) -> Self {
        Self {
            name: name.into(),
            start,
            stop,
            metadata: Metadata::new(),
            child: None,
            output: None,
            last_exit: None,
        }
    }

    /// Builds a daemon from its configuration entry.
    ///
    /// The stop command, when present, shares the start command's
    /// environment, working directory and identity, and always runs with its
    /// output discarded.
    pub fn from_spec(name: impl Into<String>, spec: &DaemonSpec) -> Result<Self, DaemonError> {
        let mut start = with_context(Command::new(spec.start_command.clone())?, spec)
            .output(spec.stdout);
        if let Some(argv0) = &spec.argv0 {
            start = start.argv0(argv0.clone());
        }

        let stop_command = spec
            .stop_command
            .as_ref()
            .map(|line| Command::new(line.clone()))
            .transpose()?
            .map(|command| with_context(command, spec).output(OutputMode::Discard));
        let stop_signal = spec
            .stop_signal
            .as_ref()
            .map(SignalSpec::resolve)
            .transpose()?;

        Ok(Self::new(
            name,
            start,
            StopStrategy::resolve(stop_command, stop_signal),
        ))
    }

    /// Replaces the daemon's metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Name used to identify the daemon in log messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_command(&self) -> &Command {
        &self.start
    }

    pub fn stop_strategy(&self) -> &StopStrategy {
        &self.stop
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// PID of the running instance, if one is owned.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Returns `true` while a child is owned, without polling it.
    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Exit status of the most recently collected instance.
    pub fn last_exit(&self) -> Option<ExitStatus> {
        self.last_exit
    }

    /// Launches the daemon. Does nothing when an instance is already owned.
    ///
    /// Only a failure to create the child is an error. A child that fails
    /// before running its program (missing executable, identity switch, chdir)
    /// counts as launched and exited with the reserved status 127, exactly as
    /// a shell-wrapped command would.
    pub fn start(&mut self) -> Result<(), DaemonError> {
        if let Some(pid) = self.pid() {
            debug!(
                "Daemon '{}' already running with PID {pid}; not starting again",
                self.name
            );
            return Ok(());
        }

        info!("Starting daemon '{}': {}", self.name, self.start);
        let Spawned { child, output } = match self.start.run() {
            Ok(spawned) => spawned,
            Err(CommandError::Exec { program, source }) => {
                let status = ExitStatus::Exited(EXEC_FAILURE_STATUS);
                warn!(
                    "Daemon '{}' could not execute '{program}': {source}; {status}",
                    self.name
                );
                self.output = None;
                self.last_exit = Some(status);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        info!("Daemon '{}' started with PID {}", self.name, child.id());

        self.child = Some(child);
        // A leftover stream from a previous instance is closed here.
        self.output = output;
        self.last_exit = None;
        Ok(())
    }

    /// Launches the daemon and returns a guard that stops it when dropped.
    ///
    /// Fails with [`DaemonError::AlreadyRunning`] when an instance is already
    /// owned, so a guard never stops a child it did not start.
    pub fn start_scoped(&mut self) -> Result<ScopedDaemon<'_>, DaemonError> {
        if let Some(pid) = self.pid() {
            return Err(DaemonError::AlreadyRunning {
                daemon: self.name.clone(),
                pid,
            });
        }
        self.start()?;
        Ok(ScopedDaemon {
            daemon: self,
            released: false,
        })
    }

    /// Stops the running instance and collects its exit status.
    ///
    /// With a stop command, the helper runs with `DAEMON_PID` set and this
    /// call blocks until the helper exits. With a signal, the signal goes to
    /// the daemon's whole process group so children spawned by a shell
    /// wrapper are reached too. Either way the daemon is then reaped.
    ///
    /// Does nothing when no instance is owned. If the helper cannot be run or
    /// the group cannot be signalled, the error is returned and the instance
    /// stays owned.
    pub fn stop(&mut self) -> Result<Option<ExitStatus>, DaemonError> {
        let Some(pid) = self.pid() else {
            return Ok(None);
        };

        match &self.stop {
            StopStrategy::Command(stop_command) => {
                info!(
                    "Stopping daemon '{}' (PID {pid}) with `{stop_command}`",
                    self.name
                );
                let mut helper =
                    stop_command.run_with_env([(DAEMON_PID_ENV, pid.to_string())])?;
                let status = helper.child.wait().map_err(|source| {
                    DaemonError::StopCommand {
                        daemon: self.name.clone(),
                        source,
                    }
                })?;
                let status = ExitStatus::from(status);
                if status.success() {
                    debug!("Stop command for daemon '{}' finished", self.name);
                } else {
                    warn!("Stop command for daemon '{}' {status}", self.name);
                }
            }
            StopStrategy::Signal(signal) => {
                info!(
                    "Stopping daemon '{}' by sending {signal} to process group {pid}",
                    self.name
                );
                match killpg(Pid::from_raw(pid as i32), *signal) {
                    Ok(()) => {}
                    Err(Errno::ESRCH) => {
                        debug!(
                            "Process group {pid} of daemon '{}' is already gone",
                            self.name
                        );
                    }
                    Err(source) => {
                        error!(
                            "Failed to signal process group {pid} of daemon '{}': {source}",
                            self.name
                        );
                        return Err(DaemonError::Signal {
                            daemon: self.name.clone(),
                            pgid: pid,
                            source,
                        });
                    }
                }
            }
        }

        self.reap()
    }

    /// Closes the output stream, then blocks until the owned child exits.
    ///
    /// Returns the child's exit status, or `None` when no child was owned.
    pub fn reap(&mut self) -> Result<Option<ExitStatus>, DaemonError> {
        self.close();
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };

        let pid = child.id();
        let status = child.wait().map_err(|source| DaemonError::Wait {
            daemon: self.name.clone(),
            pid,
            source,
        })?;
        let status = ExitStatus::from(status);
        info!("Daemon '{}' (PID {pid}) {status}", self.name);
        self.last_exit = Some(status);
        Ok(Some(status))
    }

    /// Polls the owned child without blocking.
    ///
    /// Once the child is found dead its status is recorded in
    /// [`last_exit`](Daemon::last_exit) and the PID is released, so later
    /// calls return `false` without waiting again. The output stream stays
    /// open so the remaining output can still be read to end of stream.
    pub fn is_alive(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };

        let pid = child.id();
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                let status = ExitStatus::from(status);
                info!("Daemon '{}' (PID {pid}) {status}", self.name);
                self.last_exit = Some(status);
                self.child = None;
                false
            }
            Err(err) => {
                warn!(
                    "Failed to poll PID {pid} of daemon '{}': {err}; assuming it is gone",
                    self.name
                );
                self.child = None;
                false
            }
        }
    }

    /// Moves the running instance (PID and output stream) from `other`.
    ///
    /// Afterwards `other` owns nothing. Fails without moving anything when
    /// this daemon already owns a child.
    pub fn take_over(&mut self, other: &mut Daemon) -> Result<(), DaemonError> {
        if let Some(pid) = self.pid() {
            return Err(DaemonError::AlreadyRunning {
                daemon: self.name.clone(),
                pid,
            });
        }

        self.child = other.child.take();
        self.output = other.output.take();
        if let Some(pid) = self.pid() {
            info!(
                "Daemon '{}' took over PID {pid} from '{}'",
                self.name, other.name
            );
        }
        Ok(())
    }

    /// Descriptor of the captured output, for use with `poll(2)`/`select(2)`.
    pub fn as_raw_fd(&self) -> Option<RawFd> {
        self.output.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Reads one line of captured output.
    ///
    /// Returns `None` when output is not captured or the stream was closed.
    pub fn read_line(&mut self) -> io::Result<Option<Line>> {
        self.output.as_mut().map(OutputStream::read_line).transpose()
    }

    /// Returns `true` when captured output is buffered in-process and would
    /// not wake up `poll(2)`.
    pub fn has_buffered_output(&self) -> bool {
        self.output
            .as_ref()
            .is_some_and(OutputStream::has_buffered_data)
    }

    /// Closes this process' end of the output stream. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.output.take().is_some() {
            debug!("Closed output stream of daemon '{}'", self.name);
        }
    }

    /// Stops the daemon from a destructor, where nobody can retry a failed
    /// `stop()`: falls back to `SIGKILL` on the process group and reaps.
    fn stop_on_drop(&mut self) {
        let Err(err) = self.stop() else {
            return;
        };
        let Some(pid) = self.pid() else {
            error!("Failed to stop daemon '{}': {err}", self.name);
            return;
        };

        error!(
            "Failed to stop daemon '{}': {err}; sending SIGKILL to process group {pid}",
            self.name
        );
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(group_err) => {
                let killed = self.child.as_mut().map(Child::kill);
                if let Some(Err(kill_err)) = killed {
                    // Waiting now could block forever; leave the child be.
                    error!(
                        "Failed to kill PID {pid} of daemon '{}': {group_err}, {kill_err}",
                        self.name
                    );
                    return;
                }
            }
        }
        if let Err(err) = self.reap() {
            error!("Failed to reap daemon '{}': {err}", self.name);
        }
    }
}

fn with_context(command: Command, spec: &DaemonSpec) -> Command {
    let mut command = command.envs(spec.environment.clone());
    if let Some(cwd) = &spec.cwd {
        command = command.cwd(cwd.clone());
    }
    if let Some(user) = &spec.user {
        command = command.user(user.clone());
    }
    if let Some(group) = &spec.group {
        command = command.group(group.clone());
    }
    command
}

impl PartialEq for Daemon {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.stop == other.stop
    }
}

impl Eq for Daemon {}

impl Drop for Daemon {
    /// Last-resort cleanup for daemons abandoned while running. Callers are
    /// expected to `stop()` explicitly or use [`Daemon::start_scoped`].
    fn drop(&mut self) {
        if let Some(pid) = self.pid() {
            warn!(
                "Daemon '{}' dropped while still owning PID {pid}; stopping it",
                self.name
            );
            self.stop_on_drop();
        }
    }
}

/// A started daemon that is stopped when the guard goes out of scope.
#[derive(Debug)]
pub struct ScopedDaemon<'a> {
    daemon: &'a mut Daemon,
    released: bool,
}

impl ScopedDaemon<'_> {
    /// Stops the daemon now and reports the outcome.
    pub fn finish(mut self) -> Result<Option<ExitStatus>, DaemonError> {
        self.released = true;
        self.daemon.stop()
    }
}

impl Deref for ScopedDaemon<'_> {
    type Target = Daemon;

    fn deref(&self) -> &Daemon {
        self.daemon
    }
}

impl DerefMut for ScopedDaemon<'_> {
    fn deref_mut(&mut self) -> &mut Daemon {
        self.daemon
    }
}

impl Drop for ScopedDaemon<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.daemon.stop_on_drop();
        }
    }
}
