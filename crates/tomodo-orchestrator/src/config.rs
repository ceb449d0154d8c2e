//! Provisioning requests and engine settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{OrchestratorError, Result};
use crate::retry::RetryPolicy;

/// The three topology shapes a request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopologyKind {
    /// A single mongod.
    Standalone,
    /// A replica set.
    ReplicaSet,
    /// A sharded cluster.
    Sharded,
}

/// Root credentials for the deployment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Root user name.
    pub username: String,
    /// Root password.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// A provisioning request.
///
/// Exactly one of `standalone`, `replica_set` and `sharded` must be set.
/// The flags mirror the command line so that invalid combinations are
/// rejected by [`ProvisionSpec::topology`] rather than by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionSpec {
    /// Deployment name. A random one is generated when absent.
    pub name: Option<String>,

    /// Provision a standalone mongod.
    pub standalone: bool,

    /// Provision a replica set.
    pub replica_set: bool,

    /// Provision a sharded cluster.
    pub sharded: bool,

    /// Members per replica set (and per shard).
    pub replicas: u16,

    /// Number of shards.
    pub shards: u16,

    /// Make the highest-port member of each replica set an arbiter.
    pub arbiter: bool,

    /// First port of the contiguous range the deployment occupies.
    pub port: u16,

    /// Config-server replica set size.
    pub config_servers: u16,

    /// Number of mongos routers.
    pub mongos: u16,

    /// Root user name. Authentication is enabled when both user and password are set.
    pub username: Option<String>,

    /// Root password.
    pub password: Option<String>,

    /// Image repository.
    pub image_repo: String,

    /// Image tag.
    pub image_tag: String,

    /// Shared network name.
    pub network_name: String,

    /// Run without host data directories.
    pub ephemeral: bool,
}

impl Default for ProvisionSpec {
    fn default() -> Self {
        Self {
            name: None,
            standalone: false,
            replica_set: false,
            sharded: false,
            replicas: 3,
            shards: 2,
            arbiter: false,
            port: 27017,
            config_servers: 1,
            mongos: 1,
            username: None,
            password: None,
            image_repo: "mongo".to_string(),
            image_tag: "latest".to_string(),
            network_name: "mongo_network".to_string(),
            ephemeral: false,
        }
    }
}

impl ProvisionSpec {
    /// Creates a new request builder.
    pub fn builder() -> ProvisionSpecBuilder {
        ProvisionSpecBuilder::default()
    }

    /// Resolves the requested topology, rejecting invalid flag combinations.
    pub fn topology(&self) -> Result<TopologyKind> {
        let selected = [self.standalone, self.replica_set, self.sharded]
            .iter()
            .filter(|f| **f)
            .count();
        if selected != 1 {
            return Err(OrchestratorError::invalid_configuration(
                "exactly one of standalone, replica-set or sharded has to be specified",
            ));
        }
        if self.standalone && self.arbiter {
            return Err(OrchestratorError::invalid_configuration(
                "arbiter nodes are supported only in replica sets and sharded clusters",
            ));
        }
        if self.standalone {
            Ok(TopologyKind::Standalone)
        } else if self.replica_set {
            Ok(TopologyKind::ReplicaSet)
        } else {
            Ok(TopologyKind::Sharded)
        }
    }

    /// Validates the request without touching the host.
    pub fn validate(&self) -> Result<TopologyKind> {
        let kind = self.topology()?;
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if kind != TopologyKind::Standalone && self.replicas == 0 {
            return Err(OrchestratorError::invalid_configuration(
                "replica sets need at least one member",
            ));
        }
        if self.arbiter && self.replicas < 2 {
            return Err(OrchestratorError::invalid_configuration(
                "an arbiter needs at least one other replica set member",
            ));
        }
        if kind == TopologyKind::Sharded
            && (self.shards == 0 || self.config_servers == 0 || self.mongos == 0)
        {
            return Err(OrchestratorError::invalid_configuration(
                "sharded clusters need at least one shard, config server and mongos",
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(OrchestratorError::invalid_configuration(
                "username and password have to be specified together",
            ));
        }
        if self.image_repo.is_empty() || self.image_tag.is_empty() {
            return Err(OrchestratorError::invalid_configuration(
                "image repository and tag must not be empty",
            ));
        }
        Ok(kind)
    }

    /// Returns the image reference `repo:tag`.
    pub fn image(&self) -> String {
        format!("{}:{}", self.image_repo, self.image_tag)
    }

    /// Returns the root credentials when authentication is enabled.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    /// Number of ports the requested topology occupies.
    pub fn port_count(&self, kind: TopologyKind) -> usize {
        match kind {
            TopologyKind::Standalone => 1,
            TopologyKind::ReplicaSet => self.replicas as usize,
            TopologyKind::Sharded => {
                self.shards as usize * self.replicas as usize
                    + self.config_servers as usize
                    + self.mongos as usize
            }
        }
    }
}

/// Generates a deployment name.
pub fn generate_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("tomodo-{}", &id[..8])
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(OrchestratorError::invalid_configuration(format!(
            "invalid deployment name: {name:?}"
        )))
    }
}

/// Builder for [`ProvisionSpec`].
#[derive(Debug, Default)]
pub struct ProvisionSpecBuilder {
    spec: ProvisionSpec,
}

impl ProvisionSpecBuilder {
    /// Sets the deployment name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.spec.name = Some(name.into());
        self
    }

    /// Selects the topology, clearing the other topology flags.
    pub fn topology(mut self, kind: TopologyKind) -> Self {
        self.spec.standalone = kind == TopologyKind::Standalone;
        self.spec.replica_set = kind == TopologyKind::ReplicaSet;
        self.spec.sharded = kind == TopologyKind::Sharded;
        self
    }

    /// Sets the members per replica set.
    pub fn replicas(mut self, replicas: u16) -> Self {
        self.spec.replicas = replicas;
        self
    }

    /// Sets the number of shards.
    pub fn shards(mut self, shards: u16) -> Self {
        self.spec.shards = shards;
        self
    }

    /// Requests an arbiter.
    pub fn arbiter(mut self, arbiter: bool) -> Self {
        self.spec.arbiter = arbiter;
        self
    }

    /// Sets the first port.
    pub fn port(mut self, port: u16) -> Self {
        self.spec.port = port;
        self
    }

    /// Sets the config-server count.
    pub fn config_servers(mut self, count: u16) -> Self {
        self.spec.config_servers = count;
        self
    }

    /// Sets the router count.
    pub fn mongos(mut self, count: u16) -> Self {
        self.spec.mongos = count;
        self
    }

    /// Enables authentication.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.spec.username = Some(username.into());
        self.spec.password = Some(password.into());
        self
    }

    /// Sets the image repository and tag.
    pub fn image(mut self, repo: impl Into<String>, tag: impl Into<String>) -> Self {
        self.spec.image_repo = repo.into();
        self.spec.image_tag = tag.into();
        self
    }

    /// Sets the network name.
    pub fn network_name(mut self, name: impl Into<String>) -> Self {
        self.spec.network_name = name.into();
        self
    }

    /// Runs without host data directories.
    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.spec.ephemeral = ephemeral;
        self
    }

    /// Builds the request.
    pub fn build(self) -> ProvisionSpec {
        self.spec
    }
}

/// Readiness polling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReadinessSettings {
    /// Maximum ping attempts per node.
    pub max_attempts: usize,

    /// Delay between attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            delay_ms: 2000,
        }
    }
}

impl ReadinessSettings {
    /// Returns the delay between attempts.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Returns the retry policy for readiness probes.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, self.delay())
    }
}
