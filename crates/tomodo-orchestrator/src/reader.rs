//! Deployment discovery.
//!
//! The reader rebuilds deployments from container labels alone:
//!
//! 1. list containers carrying the `source=tomodo` marker (or one group)
//! 2. group them by their `tomodo-group` label
//! 3. decode each container's labels into a node plus runtime state
//! 4. rebuild each group according to its `tomodo-type`
//!
//! Shard members are grouped by their shard ID and ordered by port. Shards
//! may be incomplete: a running-only view leaves out stopped members, and an
//! aborted provisioning leaves only the shards created so far. A member
//! without a shard ID, a shard ID above the shard count, or records that
//! disagree on the shard count are [`OrchestratorError::InconsistentTopology`].
//!
//! Cleanup paths use [`Reader::get_nodes`], which decodes a group without
//! rebuilding it, so partially created deployments can always be removed.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};
use crate::labels;
use crate::runtime::{ContainerRecord, ContainerRuntime, LabelFilter};
use crate::topology::{
    Deployment, DeploymentState, DeploymentType, Node, NodeRole, ReplicaSet, Shard,
    ShardedCluster,
};

/// Environment variable carrying the server version in official images.
pub const MONGO_VERSION_ENV: &str = "MONGO_VERSION";

/// A node rebuilt from one container, with the shard count it recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredNode {
    /// The node with runtime state filled in.
    pub node: Node,

    /// Shard count from the node's labels.
    pub shard_count: u32,
}

impl DiscoveredNode {
    /// Decodes a container record.
    pub fn from_record(record: &ContainerRecord) -> Result<Self> {
        let decoded = labels::decode(&record.name, &record.labels)?;
        let shard_count = decoded.shard_count;

        let mut node = decoded.into_node();
        node.container_id = Some(record.short_id().to_string());
        node.state = DeploymentState::from_running(record.running);
        node.mongo_version = record.env_var(MONGO_VERSION_ENV).map(str::to_string);
        node.image = record.image.clone();

        Ok(Self { node, shard_count })
    }
}

fn decode_group(records: &[ContainerRecord]) -> Result<Vec<DiscoveredNode>> {
    records.iter().map(DiscoveredNode::from_record).collect()
}

/// Rebuilds deployments from live container state.
pub struct Reader {
    runtime: Arc<dyn ContainerRuntime>,
}

impl Reader {
    /// Creates a reader.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Returns the deployment called `name`.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::DeploymentNotFound`] if no managed container
    /// belongs to it.
    pub async fn get_by_name(&self, name: &str, include_stopped: bool) -> Result<Deployment> {
        let nodes = self.discover_group(name, include_stopped).await?;
        reconstruct(name, nodes)
    }

    /// Returns every managed deployment, keyed by name.
    ///
    /// Groups that cannot be decoded or rebuilt are logged and left out;
    /// use [`Reader::scan`] to see why.
    pub async fn get_all(&self, include_stopped: bool) -> Result<BTreeMap<String, Deployment>> {
        let mut deployments = BTreeMap::new();
        for (name, result) in self.scan(include_stopped).await? {
            match result {
                Ok(deployment) => {
                    deployments.insert(name, deployment);
                }
                Err(e) => warn!(deployment = %name, error = %e, "Skipping unreadable deployment"),
            }
        }
        Ok(deployments)
    }

    /// Rebuilds every managed group, reporting failures per group.
    pub async fn scan(
        &self,
        include_stopped: bool,
    ) -> Result<BTreeMap<String, Result<Deployment>>> {
        Ok(self
            .list_groups(&LabelFilter::managed(), include_stopped)
            .await?
            .into_iter()
            .map(|(name, records)| {
                let deployment =
                    decode_group(&records).and_then(|nodes| reconstruct(&name, nodes));
                (name, deployment)
            })
            .collect())
    }

    /// Returns the decoded nodes of `name` without rebuilding the topology.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::DeploymentNotFound`] if no managed container
    /// belongs to it.
    pub async fn get_nodes(&self, name: &str, include_stopped: bool) -> Result<Vec<Node>> {
        let nodes = self.discover_group(name, include_stopped).await?;
        Ok(nodes.into_iter().map(|d| d.node).collect())
    }

    /// Returns the decoded nodes of every managed group. Groups whose
    /// labels cannot be decoded are logged and left out.
    pub async fn get_all_nodes(
        &self,
        include_stopped: bool,
    ) -> Result<BTreeMap<String, Vec<Node>>> {
        let mut groups = BTreeMap::new();
        for (name, records) in self.list_groups(&LabelFilter::managed(), include_stopped).await? {
            match decode_group(&records) {
                Ok(nodes) => {
                    groups.insert(name, nodes.into_iter().map(|d| d.node).collect());
                }
                Err(e) => warn!(deployment = %name, error = %e, "Skipping undecodable deployment"),
            }
        }
        Ok(groups)
    }

    /// Returns true if any container, running or not, belongs to `name`.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let groups = self.list_groups(&LabelFilter::group(name), true).await?;
        Ok(groups.get(name).is_some_and(|records| !records.is_empty()))
    }

    async fn discover_group(
        &self,
        name: &str,
        include_stopped: bool,
    ) -> Result<Vec<DiscoveredNode>> {
        let mut groups = self.list_groups(&LabelFilter::group(name), include_stopped).await?;
        let records = groups
            .remove(name)
            .ok_or_else(|| OrchestratorError::deployment_not_found(name))?;
        decode_group(&records)
    }

    async fn list_groups(
        &self,
        filter: &LabelFilter,
        include_stopped: bool,
    ) -> Result<BTreeMap<String, Vec<ContainerRecord>>> {
        let marker = LabelFilter::managed();
        let records = self.runtime.list_containers(filter, include_stopped).await?;
        debug!(filter = %filter.as_filter(), count = records.len(), "Listed containers");

        let mut groups: BTreeMap<String, Vec<ContainerRecord>> = BTreeMap::new();
        for record in records {
            if !marker.matches(&record.labels) {
                continue;
            }
            let group = match record.labels.get(labels::GROUP) {
                Some(group) => group.clone(),
                None => record.name.clone(),
            };
            groups.entry(group).or_default().push(record);
        }
        Ok(groups)
    }
}

/// Rebuilds one deployment from its discovered nodes.
pub fn reconstruct(name: &str, nodes: Vec<DiscoveredNode>) -> Result<Deployment> {
    let inconsistent = |reason: String| OrchestratorError::inconsistent_topology(name, reason);

    let Some(first) = nodes.first() else {
        return Err(OrchestratorError::deployment_not_found(name));
    };
    let deployment_type = first.node.deployment_type;
    if let Some(other) = nodes
        .iter()
        .find(|n| n.node.deployment_type != deployment_type)
    {
        return Err(inconsistent(format!(
            "{} is a {} node in a {} deployment",
            other.node.name,
            other.node.deployment_type.label(),
            deployment_type.label()
        )));
    }

    match deployment_type {
        DeploymentType::Standalone => {
            let mut nodes = nodes;
            if nodes.len() != 1 {
                return Err(inconsistent(format!(
                    "standalone deployment has {} containers",
                    nodes.len()
                )));
            }
            let node = nodes.remove(0).node;
            if node.role != NodeRole::Standalone {
                return Err(inconsistent(format!("{} has role {}", node.name, node.role)));
            }
            Ok(Deployment::Standalone(node))
        }
        DeploymentType::ReplicaSet => {
            let members = nodes
                .into_iter()
                .map(|d| match d.node.role {
                    NodeRole::ReplicaSetMember => Ok(d.node),
                    role => Err(inconsistent(format!("{} has role {role}", d.node.name))),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Deployment::ReplicaSet(ReplicaSet::new(name, members)))
        }
        DeploymentType::ShardedCluster => {
            reconstruct_sharded(name, nodes).map(Deployment::ShardedCluster)
        }
    }
}

fn reconstruct_sharded(name: &str, nodes: Vec<DiscoveredNode>) -> Result<ShardedCluster> {
    let inconsistent = |reason: String| OrchestratorError::inconsistent_topology(name, reason);

    let shard_count = nodes.first().map(|n| n.shard_count).unwrap_or_default();
    if let Some(other) = nodes.iter().find(|n| n.shard_count != shard_count) {
        return Err(inconsistent(format!(
            "{} records {} shards, expected {shard_count}",
            other.node.name, other.shard_count
        )));
    }

    let mut config_servers = Vec::new();
    let mut routers = Vec::new();
    let mut members = Vec::new();
    for DiscoveredNode { node, .. } in nodes {
        match node.role {
            NodeRole::ConfigServer => config_servers.push(node),
            NodeRole::Router => routers.push(node),
            NodeRole::ReplicaSetMember => members.push(node),
            NodeRole::Standalone => {
                return Err(inconsistent(format!("{} is a standalone node", node.name)));
            }
        }
    }

    let shards = group_shards(name, shard_count, members)?;
    let config_servers = ReplicaSet::new(format!("{name}-cfg-svr"), config_servers);
    Ok(ShardedCluster::new(name, config_servers, routers, shards))
}

/// Groups shard members by shard ID, each shard ordered by port.
///
/// Shards may hold fewer members than planned. A member without a shard ID
/// or with an ID above `shard_count` is inconsistent.
pub fn group_shards(name: &str, shard_count: u32, members: Vec<Node>) -> Result<Vec<Shard>> {
    let inconsistent = |reason: String| OrchestratorError::inconsistent_topology(name, reason);

    let mut by_shard: BTreeMap<u32, Vec<Node>> = BTreeMap::new();
    for member in members {
        match member.shard_id {
            Some(id) if (1..=shard_count).contains(&id) => {
                by_shard.entry(id).or_default().push(member);
            }
            Some(id) => {
                return Err(inconsistent(format!(
                    "{} belongs to shard {id} of {shard_count}",
                    member.name
                )));
            }
            None => {
                return Err(inconsistent(format!("{} has no shard ID", member.name)));
            }
        }
    }

    Ok(by_shard
        .into_iter()
        .map(|(id, members)| Shard::new(id, ReplicaSet::new(format!("{name}-sh-{id}"), members)))
        .collect())
}
