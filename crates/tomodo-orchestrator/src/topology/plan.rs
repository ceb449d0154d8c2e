//! Name and port planning.
//!
//! A plan is the in-memory topology the provisioner works through before
//! any container exists. Ports are laid out as one contiguous range:
//! config servers first, then routers, then each shard in turn.

use crate::config::{ProvisionSpec, TopologyKind};
use crate::error::{OrchestratorError, Result};
use crate::topology::deployment::{Deployment, DeploymentType, ShardedCluster};
use crate::topology::node::{Node, NodeRole};
use crate::topology::replica_set::{ReplicaSet, Shard};

/// A planned deployment and the ports it will bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPlan {
    /// The planned topology; no node has a container yet.
    pub deployment: Deployment,

    /// Every port the deployment will bind, ascending and contiguous.
    pub ports: Vec<u16>,

    /// Shard count recorded in every node's labels.
    pub shard_count: u32,

    /// Whether replica sets end with an arbiter.
    pub arbiter: bool,
}

impl TopologyPlan {
    /// Plans the deployment `name` described by `spec`.
    pub fn build(spec: &ProvisionSpec, name: &str) -> Result<Self> {
        let kind = spec.validate()?;
        let count = spec.port_count(kind);
        let last = spec.port as usize + count - 1;
        if last > u16::MAX as usize {
            return Err(OrchestratorError::invalid_configuration(format!(
                "{count} ports starting at {} exceed the highest port",
                spec.port
            )));
        }
        let ports = (spec.port..=last as u16).collect();

        let (deployment, shard_count) = match kind {
            TopologyKind::Standalone => {
                let node = Node::builder(name, spec.port)
                    .ephemeral(spec.ephemeral)
                    .build();
                (Deployment::Standalone(node), 0)
            }
            TopologyKind::ReplicaSet => {
                let rs = plan_replica_set(&ReplicaSetLayout {
                    group: name,
                    name,
                    start_port: spec.port,
                    size: spec.replicas,
                    role: NodeRole::ReplicaSetMember,
                    deployment_type: DeploymentType::ReplicaSet,
                    arbiter: spec.arbiter,
                    shard_id: None,
                    ephemeral: spec.ephemeral,
                });
                (Deployment::ReplicaSet(rs), 0)
            }
            TopologyKind::Sharded => (
                Deployment::ShardedCluster(plan_sharded_cluster(spec, name)),
                spec.shards as u32,
            ),
        };

        Ok(Self {
            deployment,
            ports,
            shard_count,
            arbiter: spec.arbiter,
        })
    }
}

struct ReplicaSetLayout<'a> {
    group: &'a str,
    name: &'a str,
    start_port: u16,
    size: u16,
    role: NodeRole,
    deployment_type: DeploymentType,
    arbiter: bool,
    shard_id: Option<u32>,
    ephemeral: bool,
}

fn plan_replica_set(layout: &ReplicaSetLayout<'_>) -> ReplicaSet {
    let members = (1..=layout.size)
        .map(|i| {
            let port = layout.start_port + i - 1;
            let mut builder = Node::builder(format!("{}-{}", layout.name, i), port)
                .role(layout.role)
                .deployment_type(layout.deployment_type)
                .group(layout.group)
                .parent(layout.name)
                .arbiter(layout.arbiter && i == layout.size)
                .ephemeral(layout.ephemeral);
            if let Some(shard_id) = layout.shard_id {
                builder = builder.shard_id(shard_id);
            }
            builder.build()
        })
        .collect();
    ReplicaSet::new(layout.name, members)
}

fn plan_sharded_cluster(spec: &ProvisionSpec, name: &str) -> ShardedCluster {
    let cfg_name = format!("{name}-cfg-svr");
    let config_servers = plan_replica_set(&ReplicaSetLayout {
        group: name,
        name: &cfg_name,
        start_port: spec.port,
        size: spec.config_servers,
        role: NodeRole::ConfigServer,
        deployment_type: DeploymentType::ShardedCluster,
        arbiter: false,
        shard_id: None,
        ephemeral: spec.ephemeral,
    });

    let routers: Vec<Node> = (1..=spec.mongos)
        .map(|i| {
            Node::builder(format!("{name}-mongos-{i}"), spec.port + spec.config_servers + i - 1)
                .role(NodeRole::Router)
                .deployment_type(DeploymentType::ShardedCluster)
                .group(name)
                .ephemeral(true)
                .build()
        })
        .collect();
    let last_router_port = spec.port + spec.config_servers + spec.mongos - 1;

    let shards = (1..=spec.shards)
        .map(|s| {
            let shard_name = format!("{name}-sh-{s}");
            let rs = plan_replica_set(&ReplicaSetLayout {
                group: name,
                name: &shard_name,
                start_port: last_router_port + (s - 1) * spec.replicas + 1,
                size: spec.replicas,
                role: NodeRole::ReplicaSetMember,
                deployment_type: DeploymentType::ShardedCluster,
                arbiter: spec.arbiter,
                shard_id: Some(s as u32),
                ephemeral: spec.ephemeral,
            });
            Shard::new(s as u32, rs)
        })
        .collect();

    ShardedCluster::new(name, config_servers, routers, shards)
}
