//! Container runtime trait definition.
//!
//! Every component that touches containers receives an explicit
//! `Arc<dyn ContainerRuntime>` in its constructor. [`DockerRuntime`]
//! implements it against the Docker daemon; tests substitute an in-memory
//! double.
//!
//! [`DockerRuntime`]: crate::runtime::DockerRuntime

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::Result;
use crate::labels::{GROUP, SOURCE_KEY, SOURCE_VALUE};

/// Operations the engine needs from a container runtime.
///
/// # Errors
///
/// Implementations map runtime-specific failures onto
/// [`OrchestratorError`](crate::error::OrchestratorError):
/// - a missing image is `ImageNotFound` both when pulling and when creating
/// - an unknown container is `ContainerNotFound`
/// - anything else propagates unchanged
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Checks that the runtime answers.
    async fn ping(&self) -> Result<()>;

    /// Returns true if the image is available locally.
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pulls the image from its registry.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Lists networks named exactly `name`, in runtime listing order.
    async fn list_networks(&self, name: &str) -> Result<Vec<NetworkHandle>>;

    /// Creates a network.
    async fn create_network(&self, name: &str) -> Result<NetworkHandle>;

    /// Creates and starts a container, returning its ID.
    async fn run_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Lists containers carrying the given label.
    async fn list_containers(
        &self,
        filter: &LabelFilter,
        include_stopped: bool,
    ) -> Result<Vec<ContainerRecord>>;

    /// Runs a command inside a running container.
    async fn exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecOutput>;

    /// Starts a stopped container.
    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Stops a running container.
    async fn stop_container(&self, container_id: &str) -> Result<()>;

    /// Removes a container, stopping it first if needed.
    async fn remove_container(&self, container_id: &str) -> Result<()>;
}

/// Output of a command executed in a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Standard output.
    pub stdout: String,

    /// Standard error.
    pub stderr: String,

    /// Exit code (-1 if unavailable).
    pub exit_code: i64,
}

impl ExecOutput {
    /// Returns true if the command succeeded.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns combined stdout and stderr.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// A network known to the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHandle {
    /// Network ID.
    pub id: String,

    /// Network name.
    pub name: String,
}

impl NetworkHandle {
    /// Returns the first 12 characters of the ID.
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// A host directory bind-mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Host path.
    pub source: PathBuf,

    /// Container path.
    pub target: String,

    /// Whether the mount is read-only.
    pub read_only: bool,
}

/// Everything needed to create one node's container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,

    /// Image reference.
    pub image: String,

    /// Container hostname.
    pub hostname: String,

    /// Command line.
    pub command: Vec<String>,

    /// Environment in `KEY=value` form.
    pub env: Vec<String>,

    /// Labels.
    pub labels: HashMap<String, String>,

    /// TCP port published on the same host port.
    pub port: u16,

    /// Bind mounts.
    pub mounts: Vec<BindMount>,

    /// Network to join.
    pub network: String,

    /// Aliases on that network.
    pub aliases: Vec<String>,
}

/// A container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Full container ID.
    pub id: String,

    /// Container name without the leading slash.
    pub name: String,

    /// Labels.
    pub labels: HashMap<String, String>,

    /// Runtime status string (`running`, `exited`, ...).
    pub status: String,

    /// Whether the container is running.
    pub running: bool,

    /// Image reference.
    pub image: Option<String>,

    /// Environment in `KEY=value` form.
    pub env: Vec<String>,
}

impl ContainerRecord {
    /// Returns the first 12 characters of the ID.
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    /// Returns the value of an environment variable.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

/// A `key=value` label filter for container listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    /// Label key.
    pub key: String,

    /// Label value.
    pub value: String,
}

impl LabelFilter {
    /// Matches every container managed by this engine.
    pub fn managed() -> Self {
        Self {
            key: SOURCE_KEY.to_string(),
            value: SOURCE_VALUE.to_string(),
        }
    }

    /// Matches the containers of one deployment.
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            key: GROUP.to_string(),
            value: name.into(),
        }
    }

    /// Returns the filter in `key=value` form.
    pub fn as_filter(&self) -> String {
        format!("{}={}", self.key, self.value)
    }

    /// Returns true if the labels satisfy the filter.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        labels.get(&self.key) == Some(&self.value)
    }
}

/// Returns the first 12 characters of a container or network ID.
pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
