//! Stop signals given by name or number.
use std::str::FromStr;

use nix::sys::signal::Signal;
use serde::Deserialize;

use crate::constants::SIGNAL_NAME_PREFIX;
use crate::error::DaemonError;

/// A stop signal as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SignalSpec {
    /// Raw signal number, e.g. `15`.
    Number(i32),
    /// Signal name, case-insensitive, with or without the `SIG` prefix.
    Name(String),
}

impl SignalSpec {
    /// Resolves the spec against the platform signal table.
    pub fn resolve(&self) -> Result<Signal, DaemonError> {
        match self {
            SignalSpec::Number(number) => Signal::try_from(*number)
                .map_err(|_| DaemonError::InvalidSignal(number.to_string())),
            SignalSpec::Name(name) => parse_signal(name),
        }
    }
}

impl From<&str> for SignalSpec {
    fn from(name: &str) -> Self {
        SignalSpec::Name(name.to_string())
    }
}

/// Parses `"term"`, `"SIGTERM"`, `"Hup"` or `"15"` into a signal.
pub fn parse_signal(raw: &str) -> Result<Signal, DaemonError> {
    let trimmed = raw.trim();
    let invalid = || DaemonError::InvalidSignal(raw.to_string());

    if let Ok(number) = trimmed.parse::<i32>() {
        return Signal::try_from(number).map_err(|_| invalid());
    }

    let mut name = trimmed.to_ascii_uppercase();
    if !name.starts_with(SIGNAL_NAME_PREFIX) {
        name.insert_str(0, SIGNAL_NAME_PREFIX);
    }
    Signal::from_str(&name).map_err(|_| invalid())
}
