//! Deployments: the closed set of topologies this engine manages.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;
use crate::topology::node::Node;
use crate::topology::replica_set::{ReplicaSet, Shard};

/// Header cells of the deployment listing table.
pub const DEPLOYMENT_TABLE_HEADERS: [&str; 6] =
    ["Name", "Type", "Status", "Containers", "Version", "Port(s)"];

const MEMBER_TABLE_HEADERS: [&str; 5] = ["Name", "Port", "Type", "Hostname", "Container ID"];

/// Topology type of a deployment, as written to the `tomodo-type` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeploymentType {
    /// A single mongod.
    #[serde(rename = "Standalone")]
    Standalone,

    /// A replica set.
    #[serde(rename = "Replica Set")]
    ReplicaSet,

    /// A sharded cluster.
    #[serde(rename = "Sharded Cluster")]
    ShardedCluster,
}

impl DeploymentType {
    /// Returns the label value.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Standalone => "Standalone",
            Self::ReplicaSet => "Replica Set",
            Self::ShardedCluster => "Sharded Cluster",
        }
    }

    /// Parses a label value after normalising spaces and underscores to `-`
    /// and lower-casing, so `Replica Set`, `replica_set` and `replica-set`
    /// are all accepted.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.replace([' ', '_'], "-").to_lowercase();
        match normalized.as_str() {
            "standalone" => Some(Self::Standalone),
            "replica-set" => Some(Self::ReplicaSet),
            "sharded-cluster" => Some(Self::ShardedCluster),
            _ => None,
        }
    }
}

impl fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Last known state of a deployment or node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeploymentState {
    /// Every container is running.
    Running,
    /// No container is running.
    Stopped,
    /// Some containers are running.
    PartiallyRunning,
    /// Not observed yet.
    #[default]
    Unknown,
}

impl DeploymentState {
    /// Maps a container's running flag to a node state.
    pub fn from_running(running: bool) -> Self {
        if running {
            Self::Running
        } else {
            Self::Stopped
        }
    }

    /// Aggregates member states.
    ///
    /// All running is `Running`, none running is `Stopped`, a mix is
    /// `PartiallyRunning`. Nothing observed is `Unknown`.
    pub fn aggregate<'a>(states: impl IntoIterator<Item = &'a DeploymentState>) -> Self {
        let mut observed = 0usize;
        let mut running = 0usize;
        for state in states {
            match state {
                Self::Unknown => {}
                Self::Running => {
                    observed += 1;
                    running += 1;
                }
                Self::Stopped => observed += 1,
                Self::PartiallyRunning => {
                    observed += 2;
                    running += 1;
                }
            }
        }
        match (observed, running) {
            (0, _) => Self::Unknown,
            (_, 0) => Self::Stopped,
            (o, r) if o == r => Self::Running,
            _ => Self::PartiallyRunning,
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::PartiallyRunning => "Partially Running",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// A sharded cluster: config servers, routers and shards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardedCluster {
    /// Deployment name.
    pub name: String,

    /// The config-server replica set.
    pub config_servers: ReplicaSet,

    /// mongos routers in ascending port order.
    pub routers: Vec<Node>,

    /// Shards in shard-ID order.
    pub shards: Vec<Shard>,

    /// Aggregate state of every container.
    pub state: DeploymentState,

    /// MongoDB server version.
    pub mongo_version: Option<String>,
}

impl ShardedCluster {
    /// Creates a cluster and derives its aggregate state and version.
    pub fn new(
        name: impl Into<String>,
        config_servers: ReplicaSet,
        mut routers: Vec<Node>,
        shards: Vec<Shard>,
    ) -> Self {
        routers.sort_by_key(|r| r.port);
        let mut cluster = Self {
            name: name.into(),
            config_servers,
            routers,
            shards,
            state: DeploymentState::Unknown,
            mongo_version: None,
        };
        cluster.refresh_state();
        let version = cluster.nodes().find_map(|n| n.mongo_version.clone());
        cluster.mongo_version = version;
        cluster
    }

    /// Every node: config servers, then routers, then shard members.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.config_servers
            .members
            .iter()
            .chain(self.routers.iter())
            .chain(self.shards.iter().flat_map(|s| s.replica_set.members.iter()))
    }

    /// Total container count.
    pub fn container_count(&self) -> usize {
        self.config_servers.size()
            + self.routers.len()
            + self.shards.iter().map(Shard::size).sum::<usize>()
    }

    /// Returns `start-end` from the first config server's port.
    pub fn port_range(&self) -> String {
        match self.config_servers.first() {
            Some(first) => {
                let end = first.port as usize + self.container_count().saturating_sub(1);
                format!("{}-{}", first.port, end)
            }
            None => String::new(),
        }
    }

    /// Recomputes the aggregate state from every node.
    pub fn refresh_state(&mut self) {
        self.config_servers.refresh_state();
        for shard in &mut self.shards {
            shard.replica_set.refresh_state();
        }
        self.state = DeploymentState::aggregate(self.nodes().map(|n| &n.state));
    }
}

/// A provisioned or discovered deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Deployment {
    /// A single mongod.
    Standalone(Node),
    /// A replica set.
    ReplicaSet(ReplicaSet),
    /// A sharded cluster.
    ShardedCluster(ShardedCluster),
}

impl Deployment {
    /// Deployment name.
    pub fn name(&self) -> &str {
        match self {
            Self::Standalone(node) => &node.group_name,
            Self::ReplicaSet(rs) => &rs.name,
            Self::ShardedCluster(cluster) => &cluster.name,
        }
    }

    /// Topology type.
    pub fn deployment_type(&self) -> DeploymentType {
        match self {
            Self::Standalone(_) => DeploymentType::Standalone,
            Self::ReplicaSet(_) => DeploymentType::ReplicaSet,
            Self::ShardedCluster(_) => DeploymentType::ShardedCluster,
        }
    }

    /// Last known state.
    pub fn state(&self) -> DeploymentState {
        match self {
            Self::Standalone(node) => node.state,
            Self::ReplicaSet(rs) => rs.state,
            Self::ShardedCluster(cluster) => cluster.state,
        }
    }

    /// MongoDB server version, when known.
    pub fn mongo_version(&self) -> Option<&str> {
        match self {
            Self::Standalone(node) => node.mongo_version.as_deref(),
            Self::ReplicaSet(rs) => rs.mongo_version.as_deref(),
            Self::ShardedCluster(cluster) => cluster.mongo_version.as_deref(),
        }
    }

    /// Number of backing containers.
    pub fn container_count(&self) -> usize {
        match self {
            Self::Standalone(_) => 1,
            Self::ReplicaSet(rs) => rs.size(),
            Self::ShardedCluster(cluster) => cluster.container_count(),
        }
    }

    /// Port or port range the deployment occupies.
    pub fn port_range(&self) -> String {
        match self {
            Self::Standalone(node) => node.port.to_string(),
            Self::ReplicaSet(rs) => rs.port_range(),
            Self::ShardedCluster(cluster) => cluster.port_range(),
        }
    }

    /// Every node of the deployment in canonical order.
    pub fn nodes(&self) -> Vec<&Node> {
        match self {
            Self::Standalone(node) => vec![node],
            Self::ReplicaSet(rs) => rs.members.iter().collect(),
            Self::ShardedCluster(cluster) => cluster.nodes().collect(),
        }
    }

    /// Returns the dictionary projection consumed by renderers.
    pub fn as_dict(&self, detailed: bool) -> Value {
        match self {
            Self::Standalone(node) => node.as_dict(detailed),
            Self::ReplicaSet(rs) => rs.as_dict(detailed),
            Self::ShardedCluster(cluster) => {
                let mut dict = json!({
                    "name": cluster.name,
                    "deployment_type": DeploymentType::ShardedCluster.label(),
                    "state": cluster.state.to_string(),
                    "containers": cluster.container_count(),
                    "mongo_version": cluster.mongo_version,
                    "port_range": cluster.port_range(),
                });
                if detailed {
                    dict["routers"] =
                        Value::Array(cluster.routers.iter().map(|r| r.as_dict(true)).collect());
                    dict["config_servers_replica_set"] = cluster.config_servers.as_dict(true);
                    dict["shards"] =
                        Value::Array(cluster.shards.iter().map(|s| s.as_dict(true)).collect());
                }
                dict
            }
        }
    }

    /// Returns the listing-table cells, in [`DEPLOYMENT_TABLE_HEADERS`] order.
    pub fn as_table_row(&self) -> Vec<String> {
        vec![
            self.name().to_string(),
            self.deployment_type().label().to_string(),
            self.state().to_string(),
            self.container_count().to_string(),
            self.mongo_version().unwrap_or("unknown").to_string(),
            self.port_range(),
        ]
    }

    /// Returns a markdown table describing every member.
    pub fn as_markdown_table(&self) -> String {
        let kind = match self {
            Self::Standalone(_) => "standalone",
            Self::ReplicaSet(_) => "replica set",
            Self::ShardedCluster(_) => "sharded cluster",
        };
        let mut rows = vec![
            format!("**{} ({}):**", self.name(), kind),
            markdown_row(MEMBER_TABLE_HEADERS.iter().map(|h| h.to_string())),
            markdown_separator(MEMBER_TABLE_HEADERS.len()),
        ];
        rows.extend(self.nodes().into_iter().map(|n| markdown_row(n.member_cells())));
        rows.join("\n")
    }

    /// Renders the dictionary projection as pretty JSON.
    pub fn to_json(&self, detailed: bool) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.as_dict(detailed))?)
    }

    /// Renders the dictionary projection as YAML.
    pub fn to_yaml(&self, detailed: bool) -> Result<String> {
        Ok(serde_yaml::to_string(&self.as_dict(detailed))?)
    }
}

/// Renders a markdown listing of deployments keyed by name.
pub fn deployments_markdown_table(deployments: &BTreeMap<String, Deployment>) -> String {
    let mut rows = vec![
        markdown_row(DEPLOYMENT_TABLE_HEADERS.iter().map(|h| h.to_string())),
        markdown_separator(DEPLOYMENT_TABLE_HEADERS.len()),
    ];
    rows.extend(deployments.values().map(|d| markdown_row(d.as_table_row())));
    rows.join("\n")
}

fn markdown_row(cells: impl IntoIterator<Item = String>) -> String {
    format!("| {} |", cells.into_iter().collect::<Vec<_>>().join(" | "))
}

fn markdown_separator(columns: usize) -> String {
    markdown_row(std::iter::repeat("------".to_string()).take(columns))
}
