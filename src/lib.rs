//! Herdsman provides the process supervision primitives a daemon supervisor is
//! built from: launching a program with a controlled environment, identity and
//! output routing, polling it without blocking, reading its merged output line
//! by line, stopping it by signal or helper command, and reaping it. Policy
//! (restarts, health checks, scheduling) belongs to the caller.

/// Shared constants.
pub mod constants;

/// Command description and process launching.
pub mod command;

/// Configuration management.
pub mod config;

/// Daemon lifecycle management.
pub mod daemon;

/// Error handling.
pub mod error;

/// Exit status of reaped children.
pub mod exit;

/// User and group resolution for privilege dropping.
pub mod identity;

/// Caller-owned daemon metadata.
pub mod metadata;

/// Captured output streams.
pub mod output;

/// Stop signal parsing.
pub mod signal;

#[doc(hidden)]
pub mod test_utils;

pub use command::{Command, CommandLine, OutputMode};
pub use config::{Config, DaemonSpec, load_config};
pub use daemon::{Daemon, ScopedDaemon, StopStrategy};
pub use exit::ExitStatus;
pub use metadata::Metadata;
pub use output::Line;
