//! Daemon definitions loaded from YAML.
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::debug;

use crate::command::{CommandLine, OutputMode};
use crate::daemon::Daemon;
use crate::error::ConfigError;
use crate::signal::SignalSpec;

/// Represents the structure of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Map of daemon names to their definitions.
    #[serde(default)]
    pub daemons: BTreeMap<String, DaemonSpec>,
}

/// Definition of a single daemon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonSpec {
    /// Command used to start the daemon.
    pub start_command: CommandLine,
    /// Optional `argv[0]` override for the start command.
    #[serde(default)]
    pub argv0: Option<String>,
    /// Command that makes the daemon exit. Wins over `stop_signal`.
    #[serde(default)]
    pub stop_command: Option<CommandLine>,
    /// Signal sent to the daemon's process group. Defaults to `SIGTERM`.
    #[serde(default)]
    pub stop_signal: Option<SignalSpec>,
    /// Variables added to the inherited environment.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Working directory for both the start and stop commands.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Where the daemon's stdout and stderr go.
    #[serde(default)]
    pub stdout: OutputMode,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

impl DaemonSpec {
    /// A definition that only names the start command.
    pub fn new(start_command: impl Into<CommandLine>) -> Self {
        Self {
            start_command: start_command.into(),
            argv0: None,
            stop_command: None,
            stop_signal: None,
            environment: BTreeMap::new(),
            cwd: None,
            stdout: OutputMode::default(),
            user: None,
            group: None,
        }
    }
}

impl Config {
    /// Parses a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Builds every configured daemon, in name order.
    ///
    /// Fails on the first invalid definition, naming the daemon.
    pub fn build_daemons(&self) -> Result<Vec<Daemon>, ConfigError> {
        self.daemons
            .iter()
            .map(|(name, spec)| {
                Daemon::from_spec(name.as_str(), spec).map_err(|source| ConfigError::Daemon {
                    daemon: name.clone(),
                    source,
                })
            })
            .collect()
    }
}

/// Loads and parses the configuration file.
pub fn load_config(config_path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let config_path = config_path.as_ref();
    let content = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
        path: config_path.to_path_buf(),
        source,
    })?;

    let config = Config::from_yaml(&content)?;
    debug!(
        "Loaded {} daemon definition(s) from {}",
        config.daemons.len(),
        config_path.display()
    );
    Ok(config)
}
