//! Error handling for herdsman.
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building or launching a [`Command`](crate::command::Command).
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command string or argument list contained no program.
    #[error("Command is empty")]
    EmptyCommand,

    /// The child process could not be created (process or descriptor
    /// exhaustion).
    #[error("Failed to fork for '{program}': {source}")]
    Spawn {
        /// Executable that was being launched.
        program: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The child was created but failed before its program image was replaced
    /// (identity switch, chdir, exec). It has already exited and been
    /// collected.
    #[error("Failed to execute '{program}': {source}")]
    Exec {
        /// Executable that was being launched.
        program: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Creating the capture pipe failed.
    #[error("Failed to create output pipe: {0}")]
    Pipe(#[source] std::io::Error),

    /// The configured user does not exist.
    #[error("User '{0}' not found")]
    UnknownUser(String),

    /// The configured group does not exist.
    #[error("Group '{0}' not found")]
    UnknownGroup(String),

    /// The user or group database could not be queried.
    #[error("Failed to look up '{name}': {source}")]
    IdentityLookup {
        /// User or group name being looked up.
        name: String,
        /// The underlying error that occurred.
        #[source]
        source: nix::errno::Errno,
    },
}

/// Errors raised by [`Daemon`](crate::daemon::Daemon) lifecycle operations.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Building or running the start or stop command failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// A stop signal name or number is not in the platform signal table.
    #[error("Invalid stop signal '{0}'")]
    InvalidSignal(String),

    /// Delivering the stop signal to the daemon's process group failed.
    #[error("Failed to signal process group {pgid} of daemon '{daemon}': {source}")]
    Signal {
        /// The daemon being stopped.
        daemon: String,
        /// Process group that was signalled.
        pgid: u32,
        /// The underlying error that occurred.
        #[source]
        source: nix::errno::Errno,
    },

    /// Waiting for the daemon's child to exit failed.
    #[error("Failed to wait for PID {pid} of daemon '{daemon}': {source}")]
    Wait {
        /// The daemon being reaped.
        daemon: String,
        /// PID that was waited on.
        pid: u32,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Waiting for the daemon's stop command to exit failed.
    #[error("Failed to wait for stop command of daemon '{daemon}': {source}")]
    StopCommand {
        /// The daemon being stopped.
        daemon: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The daemon already owns a running child, so it can neither take over
    /// another one nor hand out a scoped guard for a fresh start.
    #[error("Daemon '{daemon}' already owns running PID {pid}")]
    AlreadyRunning {
        /// The daemon that would have received the child.
        daemon: String,
        /// PID the daemon already owns.
        pid: u32,
    },
}

/// Error type for daemon metadata operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    /// Attempted to read a key that was never set.
    #[error("No such metadata key: {0}")]
    KeyNotFound(String),
}

/// Errors raised while loading daemon definitions from configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A daemon definition could not be turned into a daemon.
    #[error("Invalid definition for daemon '{daemon}': {source}")]
    Daemon {
        /// Name of the offending daemon.
        daemon: String,
        /// The underlying error that occurred.
        #[source]
        source: DaemonError,
    },
}
