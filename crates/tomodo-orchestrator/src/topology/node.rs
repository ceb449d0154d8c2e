//! A single mongod or mongos process and the role it plays.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;

use crate::topology::deployment::{DeploymentState, DeploymentType};

/// The role a node plays in its deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// A lone mongod.
    #[serde(rename = "standalone")]
    Standalone,

    /// A data-bearing member of a replica set or shard.
    #[serde(rename = "rs-member")]
    ReplicaSetMember,

    /// A member of a sharded cluster's config-server replica set.
    #[serde(rename = "cfg-svr")]
    ConfigServer,

    /// A mongos router.
    #[serde(rename = "mongos")]
    Router,
}

impl NodeRole {
    /// Returns the label value of this role.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::ReplicaSetMember => "rs-member",
            Self::ConfigServer => "cfg-svr",
            Self::Router => "mongos",
        }
    }

    /// Parses a role from its label value.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "standalone" => Some(Self::Standalone),
            "rs-member" => Some(Self::ReplicaSetMember),
            "cfg-svr" => Some(Self::ConfigServer),
            "mongos" => Some(Self::Router),
            _ => None,
        }
    }

    /// Returns true for roles backed by a mongod process.
    pub fn is_mongod(&self) -> bool {
        !matches!(self, Self::Router)
    }

    /// Returns true if shell commands against this role run without credentials.
    pub fn skips_shell_auth(&self) -> bool {
        matches!(self, Self::ConfigServer | Self::Router)
    }

    /// Short process description used in member tables.
    pub fn process_description(&self) -> &'static str {
        match self {
            Self::ConfigServer => "mongod (config)",
            Self::Router => "mongos",
            Self::Standalone | Self::ReplicaSetMember => "mongod",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single mongod or mongos process backed by one container.
///
/// Nodes are planned before any container exists; `container_id` and the
/// data directories are filled in once the container is created or when the
/// node is rebuilt from container labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node and container name, also its hostname on the network.
    pub name: String,

    /// Port the process listens on, published on the same host port.
    pub port: u16,

    /// Role of the node.
    pub role: NodeRole,

    /// Topology type of the owning deployment.
    pub deployment_type: DeploymentType,

    /// Name of the owning deployment.
    pub group_name: String,

    /// Name of the owning replica set, if any.
    pub parent_name: Option<String>,

    /// Shard the node belongs to, for shard members.
    pub shard_id: Option<u32>,

    /// Whether the node is a replica-set arbiter.
    pub is_arbiter: bool,

    /// Whether the node runs without a host data directory.
    pub is_ephemeral: bool,

    /// Runtime container ID (short form).
    pub container_id: Option<String>,

    /// Host directory mounted as the data directory.
    pub host_data_dir: Option<PathBuf>,

    /// Data directory inside the container.
    pub container_data_dir: Option<String>,

    /// Last observed state of the container.
    pub state: DeploymentState,

    /// MongoDB server version reported by the image.
    pub mongo_version: Option<String>,

    /// Image the container runs.
    pub image: Option<String>,
}

impl Node {
    /// Creates a new node builder.
    pub fn builder(name: impl Into<String>, port: u16) -> NodeBuilder {
        NodeBuilder::new(name, port)
    }

    /// Returns `name:port`, the address peers use on the shared network.
    pub fn hostname(&self) -> String {
        format!("{}:{}", self.name, self.port)
    }

    /// Returns the connection URI of this node.
    pub fn uri(&self) -> String {
        format!("mongodb://{}:{}", self.name, self.port)
    }

    /// Returns true if the container was last seen running.
    pub fn is_running(&self) -> bool {
        self.state == DeploymentState::Running
    }

    /// Returns the dictionary projection of this node.
    pub fn as_dict(&self, detailed: bool) -> Value {
        let state = self.state.to_string();
        if !detailed {
            return json!({
                "name": self.name,
                "deployment_type": self.deployment_type.label(),
                "state": state,
                "containers": 1,
                "mongo_version": self.mongo_version,
                "port_range": self.port.to_string(),
            });
        }
        json!({
            "name": self.name,
            "deployment_type": self.deployment_type.label(),
            "state": state,
            "containers": 1,
            "mongo_version": self.mongo_version,
            "port": self.port,
            "role": self.role.name(),
            "host_data_dir": self.host_data_dir,
            "container_data_dir": self.container_data_dir,
            "container": {
                "id": self.container_id,
                "image": self.image,
            },
        })
    }

    /// Returns the member-table cells of this node.
    pub(crate) fn member_cells(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.port.to_string(),
            self.role.process_description().to_string(),
            self.hostname(),
            self.container_id.clone().unwrap_or_else(|| "N/A".to_string()),
        ]
    }
}

/// Builder for [`Node`].
#[derive(Debug)]
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    /// Creates a builder for a standalone node grouped under its own name.
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        let name = name.into();
        Self {
            node: Node {
                group_name: name.clone(),
                name,
                port,
                role: NodeRole::Standalone,
                deployment_type: DeploymentType::Standalone,
                parent_name: None,
                shard_id: None,
                is_arbiter: false,
                is_ephemeral: false,
                container_id: None,
                host_data_dir: None,
                container_data_dir: None,
                state: DeploymentState::Unknown,
                mongo_version: None,
                image: None,
            },
        }
    }

    /// Sets the role.
    pub fn role(mut self, role: NodeRole) -> Self {
        self.node.role = role;
        self
    }

    /// Sets the deployment type.
    pub fn deployment_type(mut self, deployment_type: DeploymentType) -> Self {
        self.node.deployment_type = deployment_type;
        self
    }

    /// Sets the owning deployment.
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.node.group_name = group.into();
        self
    }

    /// Sets the owning replica set.
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.node.parent_name = Some(parent.into());
        self
    }

    /// Sets the shard ID.
    pub fn shard_id(mut self, shard_id: u32) -> Self {
        self.node.shard_id = Some(shard_id);
        self
    }

    /// Marks the node as an arbiter.
    pub fn arbiter(mut self, is_arbiter: bool) -> Self {
        self.node.is_arbiter = is_arbiter;
        self
    }

    /// Marks the node as ephemeral.
    pub fn ephemeral(mut self, is_ephemeral: bool) -> Self {
        self.node.is_ephemeral = is_ephemeral;
        self
    }

    /// Builds the node.
    pub fn build(self) -> Node {
        self.node
    }
}
