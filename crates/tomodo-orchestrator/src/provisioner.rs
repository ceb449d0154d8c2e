//! Deployment provisioning.
//!
//! [`Provisioner::provision`] turns a [`ProvisionSpec`] into running
//! containers. Every check that can fail cheaply runs before any container
//! exists:
//!
//! 1. the request is validated and planned (names, ports)
//! 2. the name must not belong to a discoverable deployment
//! 3. every planned port must be free on the host
//!
//! Only then is the image pulled, the network created and the containers
//! launched, in dependency order:
//!
//! - replica set: all members, then `rs.initiate()` on the first member,
//!   then each remaining member is awaited and added in port order
//! - sharded cluster: the config-server replica set, then every router,
//!   then every shard replica set, then `sh.addShard` per shard on the
//!   first router
//!
//! Provisioning is not transactional. If a step fails, the containers
//! created so far are left in place for the caller to remove.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{generate_name, ProvisionSpec, ReadinessSettings};
use crate::container::{ContainerFactory, FactorySettings, StorageLayout};
use crate::error::{OrchestratorError, Result};
use crate::network::NetworkManager;
use crate::ports::{check_ports, PortProbe, TcpPortProbe};
use crate::reader::Reader;
use crate::readiness::ReadinessProbe;
use crate::retry::RetryPolicy;
use crate::runtime::ContainerRuntime;
use crate::shell::MongoShell;
use crate::topology::{Deployment, Node, ReplicaSet, ShardedCluster, TopologyPlan};

/// Provisions deployments on a container runtime.
pub struct Provisioner {
    runtime: Arc<dyn ContainerRuntime>,
    reader: Reader,
    storage: StorageLayout,
    port_probe: Arc<dyn PortProbe>,
    readiness: ReadinessSettings,
}

/// Per-call collaborators, built once the request has passed every check.
struct Session {
    factory: ContainerFactory,
    shell: Arc<MongoShell>,
    probe: ReadinessProbe,
    policy: RetryPolicy,
}

impl Provisioner {
    /// Creates a provisioner probing ports over TCP with default readiness
    /// settings.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, storage: StorageLayout) -> Self {
        Self {
            reader: Reader::new(runtime.clone()),
            runtime,
            storage,
            port_probe: Arc::new(TcpPortProbe),
            readiness: ReadinessSettings::default(),
        }
    }

    /// Replaces the port probe.
    pub fn with_port_probe(mut self, probe: Arc<dyn PortProbe>) -> Self {
        self.port_probe = probe;
        self
    }

    /// Replaces the readiness settings.
    pub fn with_readiness(mut self, readiness: ReadinessSettings) -> Self {
        self.readiness = readiness;
        self
    }

    /// Provisions the deployment described by `spec`.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::InvalidConfiguration`] for an invalid request
    /// - [`OrchestratorError::NameCollision`] if the name is taken
    /// - [`OrchestratorError::PortsTaken`] if any planned port is bound
    /// - [`OrchestratorError::ImageNotFound`] if the image cannot be found
    /// - any runtime or readiness failure during creation
    pub async fn provision(&self, spec: &ProvisionSpec) -> Result<Deployment> {
        let name = spec.name.clone().unwrap_or_else(generate_name);
        let plan = TopologyPlan::build(spec, &name)?;

        if self.reader.exists(&name).await? {
            return Err(OrchestratorError::name_collision(&name));
        }
        check_ports(self.port_probe.as_ref(), &plan.ports).await?;

        info!(
            deployment = %name,
            kind = plan.deployment.deployment_type().label(),
            ports = %plan.deployment.port_range(),
            image = %spec.image(),
            "Provisioning deployment"
        );

        let credentials = spec.credentials();
        let shell = Arc::new(MongoShell::new(self.runtime.clone(), credentials.clone()));
        let policy = self.readiness.policy();
        let session = Session {
            factory: ContainerFactory::new(
                self.runtime.clone(),
                self.storage.clone(),
                FactorySettings {
                    image: spec.image(),
                    network: spec.network_name.clone(),
                    credentials,
                    shard_count: plan.shard_count,
                },
            ),
            probe: ReadinessProbe::new(shell.clone(), policy),
            shell,
            policy,
        };

        session.factory.ensure_image().await?;
        NetworkManager::new(self.runtime.clone())
            .get_or_create(&spec.network_name)
            .await?;

        let deployment = match plan.deployment {
            Deployment::Standalone(mut node) => {
                session.factory.create_node(&mut node).await?;
                session.probe.wait_for_ready(&node).await?;
                Deployment::Standalone(node)
            }
            Deployment::ReplicaSet(mut rs) => {
                session.provision_replica_set(&mut rs, plan.arbiter).await?;
                Deployment::ReplicaSet(rs)
            }
            Deployment::ShardedCluster(mut cluster) => {
                session.provision_sharded_cluster(&mut cluster, plan.arbiter).await?;
                Deployment::ShardedCluster(cluster)
            }
        };

        info!(
            deployment = %name,
            containers = deployment.container_count(),
            "Deployment provisioned"
        );
        Ok(deployment)
    }
}

/// Returns the `w` of a majority of the non-arbiter members.
pub fn non_arbiter_majority(size: usize) -> usize {
    size.saturating_sub(1) / 2 + 1
}

impl Session {
    async fn provision_replica_set(&self, rs: &mut ReplicaSet, arbiter: bool) -> Result<()> {
        for member in rs.members.iter_mut() {
            self.factory.create_node(member).await?;
        }
        rs.refresh_state();

        let (first, rest) = rs.members.split_first().ok_or_else(|| {
            OrchestratorError::invalid_configuration(format!("replica set {} is empty", rs.name))
        })?;

        self.probe.wait_for_ready(first).await?;
        self.shell.run_command(first, "rs.initiate()").await?;
        info!(replica_set = %rs.name, primary = %first.hostname(), "Initiated replica set");

        if arbiter {
            let w = non_arbiter_majority(rs.members.len());
            let js = format!(
                "db.adminCommand({{ setDefaultRWConcern: 1, defaultWriteConcern: {{ 'w': {w} }} }})"
            );
            self.admin(first, &js).await?;
        }

        for member in rest {
            self.probe.wait_for_ready(member).await?;
            let js = if member.is_arbiter {
                format!("rs.addArb('{}')", member.hostname())
            } else {
                format!("rs.add('{}')", member.hostname())
            };
            self.admin(first, &js).await?;
            info!(
                replica_set = %rs.name,
                member = %member.hostname(),
                arbiter = member.is_arbiter,
                "Added member"
            );
        }
        Ok(())
    }

    async fn provision_sharded_cluster(
        &self,
        cluster: &mut ShardedCluster,
        arbiter: bool,
    ) -> Result<()> {
        self.provision_replica_set(&mut cluster.config_servers, false)
            .await?;
        let config_db = cluster.config_servers.config_db();

        for router in cluster.routers.iter_mut() {
            self.factory.create_router(router, &config_db).await?;
        }
        for router in &cluster.routers {
            self.probe.wait_for_ready(router).await?;
        }

        for shard in cluster.shards.iter_mut() {
            self.provision_replica_set(&mut shard.replica_set, arbiter)
                .await?;
        }

        let router = cluster.routers.first().ok_or_else(|| {
            OrchestratorError::invalid_configuration(format!(
                "sharded cluster {} has no router",
                cluster.name
            ))
        })?;
        for shard in &cluster.shards {
            let js = format!("sh.addShard('{}')", shard.add_shard_target());
            self.admin(router, &js).await?;
            info!(
                cluster = %cluster.name,
                shard = %shard.replica_set.name,
                router = %router.name,
                "Added shard"
            );
        }

        cluster.refresh_state();
        Ok(())
    }

    /// Runs an administrative command, retrying while the target settles.
    async fn admin(&self, node: &Node, js: &str) -> Result<String> {
        self.policy
            .run(js, || self.shell.run_command(node, js), |e| {
                if e.is_retryable() {
                    warn!(node = %node.name, error = %e, "Command not accepted yet");
                    true
                } else {
                    false
                }
            })
            .await
    }
}
