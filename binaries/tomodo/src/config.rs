//! Configuration for the tomodo command line.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tomodo_orchestrator::{ReadinessSettings, StorageLayout};

use crate::{CliArgs, Command};

/// Complete command line configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomodoConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Docker and image settings.
    pub docker: DockerConfig,

    /// Readiness polling.
    pub readiness: ReadinessSettings,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (pretty, json, compact).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Docker and image settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Network every container joins.
    pub network_name: String,

    /// Image repository.
    pub image_repo: String,

    /// Image tag.
    pub image_tag: String,

    /// Root of data directories and the keyfile. Defaults to `~/.tomodo`.
    pub data_root: Option<PathBuf>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            network_name: "mongo_network".to_string(),
            image_repo: "mongo".to_string(),
            image_tag: "latest".to_string(),
            data_root: None,
        }
    }
}

impl TomodoConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TomodoConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge CLI arguments into the configuration.
    pub fn merge_cli_args(&mut self, args: &CliArgs) {
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if let Some(Command::Provision(ref provision)) = args.command {
            if let Some(ref repo) = provision.image_repo {
                self.docker.image_repo = repo.clone();
            }
            if let Some(ref tag) = provision.image_tag {
                self.docker.image_tag = tag.clone();
            }
            if let Some(ref network) = provision.network_name {
                self.docker.network_name = network.clone();
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        if self.readiness.max_attempts == 0 {
            anyhow::bail!("Readiness attempts must be at least 1");
        }

        if self.docker.network_name.is_empty() {
            anyhow::bail!("Network name must not be empty");
        }

        Ok(())
    }

    /// Returns the storage layout for data directories and the keyfile.
    pub fn storage(&self) -> anyhow::Result<StorageLayout> {
        match self.docker.data_root {
            Some(ref root) => Ok(StorageLayout::new(root)),
            None => Ok(StorageLayout::from_home()?),
        }
    }
}
