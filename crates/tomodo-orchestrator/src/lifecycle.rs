//! Start, stop and remove discovered deployments.
//!
//! Operations act on the decoded nodes of a group rather than on a rebuilt
//! topology, so a deployment left half created by a failed provisioning can
//! still be stopped and removed. Sharded clusters start with their config
//! servers and stop with their routers.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::container::StorageLayout;
use crate::error::{OrchestratorError, Result};
use crate::reader::Reader;
use crate::runtime::ContainerRuntime;
use crate::topology::{Deployment, Node, NodeRole};

/// Acts on the containers of existing deployments.
pub struct Lifecycle {
    runtime: Arc<dyn ContainerRuntime>,
    reader: Reader,
    storage: StorageLayout,
}

/// Sorts nodes into start order: config servers, routers, then data nodes.
fn start_order(mut nodes: Vec<Node>) -> Vec<Node> {
    nodes.sort_by_key(|n| {
        let rank = match n.role {
            NodeRole::ConfigServer => 0,
            NodeRole::Router => 1,
            NodeRole::ReplicaSetMember | NodeRole::Standalone => 2,
        };
        (rank, n.shard_id, n.port)
    });
    nodes
}

/// Sorts nodes into stop order: routers, data nodes, then config servers.
fn stop_order(mut nodes: Vec<Node>) -> Vec<Node> {
    nodes.sort_by_key(|n| {
        let rank = match n.role {
            NodeRole::Router => 0,
            NodeRole::ReplicaSetMember | NodeRole::Standalone => 1,
            NodeRole::ConfigServer => 2,
        };
        (rank, n.shard_id, n.port)
    });
    nodes
}

fn container_id(node: &Node) -> Result<&str> {
    node.container_id
        .as_deref()
        .ok_or_else(|| OrchestratorError::container_not_found(&node.name))
}

impl Lifecycle {
    /// Creates a lifecycle manager. Only data directories under `storage`
    /// are ever deleted.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, storage: StorageLayout) -> Self {
        Self {
            reader: Reader::new(runtime.clone()),
            runtime,
            storage,
        }
    }

    /// Starts every stopped container of `name` and returns the refreshed
    /// deployment.
    pub async fn start(&self, name: &str) -> Result<Deployment> {
        let nodes = self.reader.get_nodes(name, true).await?;
        let mut started = 0usize;
        for node in start_order(nodes) {
            if node.is_running() {
                continue;
            }
            self.runtime.start_container(container_id(&node)?).await?;
            info!(deployment = %name, node = %node.name, "Started node");
            started += 1;
        }
        info!(deployment = %name, started, "Deployment started");
        self.reader.get_by_name(name, true).await
    }

    /// Stops every running container of `name`, returning how many were
    /// stopped.
    pub async fn stop(&self, name: &str) -> Result<usize> {
        let nodes = self.reader.get_nodes(name, true).await?;
        self.stop_nodes(name, nodes).await
    }

    /// Stops every managed deployment.
    pub async fn stop_all(&self) -> Result<BTreeMap<String, usize>> {
        let mut stopped = BTreeMap::new();
        for (name, nodes) in self.reader.get_all_nodes(true).await? {
            let count = self.stop_nodes(&name, nodes).await?;
            stopped.insert(name, count);
        }
        Ok(stopped)
    }

    /// Removes every container of `name` and its data directories,
    /// returning how many containers were removed.
    pub async fn remove(&self, name: &str) -> Result<usize> {
        let nodes = self.reader.get_nodes(name, true).await?;
        self.remove_nodes(name, nodes).await
    }

    /// Removes every managed deployment.
    pub async fn remove_all(&self) -> Result<BTreeMap<String, usize>> {
        let mut removed = BTreeMap::new();
        for (name, nodes) in self.reader.get_all_nodes(true).await? {
            let count = self.remove_nodes(&name, nodes).await?;
            removed.insert(name, count);
        }
        Ok(removed)
    }

    async fn stop_nodes(&self, name: &str, nodes: Vec<Node>) -> Result<usize> {
        let mut stopped = 0usize;
        for node in stop_order(nodes) {
            if !node.is_running() {
                continue;
            }
            self.runtime.stop_container(container_id(&node)?).await?;
            info!(deployment = %name, node = %node.name, "Stopped node");
            stopped += 1;
        }
        Ok(stopped)
    }

    async fn remove_nodes(&self, name: &str, nodes: Vec<Node>) -> Result<usize> {
        let mut removed = 0usize;
        for node in stop_order(nodes) {
            match self.runtime.remove_container(container_id(&node)?).await {
                Ok(()) => removed += 1,
                Err(OrchestratorError::ContainerNotFound(id)) => {
                    warn!(node = %node.name, id = %id, "Container already removed");
                }
                Err(e) => return Err(e),
            }
            if let Some(dir) = &node.host_data_dir {
                self.storage.remove_data_dir(dir).await?;
            }
        }
        info!(deployment = %name, removed, "Deployment removed");
        Ok(removed)
    }
}
