//! Exit status of a reaped child.
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::constants::EXEC_FAILURE_STATUS;

/// How a supervised child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// The child exited on its own with this status code.
    Exited(i32),
    /// The child was terminated by this signal number.
    Signaled(i32),
}

impl ExitStatus {
    /// Exit code, if the child exited normally.
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Exited(code) => Some(*code),
            ExitStatus::Signaled(_) => None,
        }
    }

    /// Terminating signal, if the child was killed by one the platform knows.
    pub fn signal(&self) -> Option<Signal> {
        match self {
            ExitStatus::Signaled(raw) => Signal::try_from(*raw).ok(),
            ExitStatus::Exited(_) => None,
        }
    }

    /// Returns `true` for a clean exit with status zero.
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }

    /// Returns `true` when the child exited with the status reserved for
    /// "could not launch the program".
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, ExitStatus::Exited(EXEC_FAILURE_STATUS))
    }
}

impl From<process::ExitStatus> for ExitStatus {
    fn from(status: process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            ExitStatus::Exited(code)
        } else if let Some(signal) = status.signal() {
            ExitStatus::Signaled(signal)
        } else {
            ExitStatus::Exited(status.into_raw())
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.signal()) {
            (ExitStatus::Exited(code), _) => write!(f, "exited with status {code}"),
            (ExitStatus::Signaled(_), Some(signal)) => write!(f, "killed by {signal}"),
            (ExitStatus::Signaled(raw), None) => write!(f, "killed by signal {raw}"),
        }
    }
}
