//! Constants shared by the command and daemon layers.
//!
//! This module centralizes the fixed names and values that form part of the
//! contract with supervised programs and with the supervisor consuming this
//! crate.

use nix::sys::signal::Signal;

// ============================================================================
// Shell Execution Constants
// ============================================================================

/// Shell used for command strings that contain shell metacharacters.
pub const SHELL: &str = "/bin/sh";

/// Shell argument flag for executing command strings.
pub const SHELL_COMMAND_FLAG: &str = "-c";

// ============================================================================
// Process Contract Constants
// ============================================================================

/// Exit status reserved for "the program image could not be replaced".
///
/// Shells use it for commands they cannot find or run, so a shell-wrapped
/// daemon exiting with this status never got as far as running its program.
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// Environment variable carrying the daemon's PID into its stop command.
pub const DAEMON_PID_ENV: &str = "DAEMON_PID";

/// Signal sent to the daemon's process group when neither a stop command nor
/// a stop signal is configured.
pub const DEFAULT_STOP_SIGNAL: Signal = Signal::SIGTERM;

// ============================================================================
// Signal Name Resolution
// ============================================================================

/// Prefix carried by every entry of the platform signal table.
pub const SIGNAL_NAME_PREFIX: &str = "SIG";
