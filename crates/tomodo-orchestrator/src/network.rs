//! Shared network management.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::runtime::{ContainerRuntime, NetworkHandle};

/// Get-or-create access to the network every deployment joins.
///
/// Lookup and creation are two separate runtime calls, so two concurrent
/// callers can both create a network with the same name. Later lookups
/// then resolve to the first network in listing order.
pub struct NetworkManager {
    runtime: Arc<dyn ContainerRuntime>,
}

impl NetworkManager {
    /// Creates a network manager.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Returns the network named `name`, creating it if none exists.
    pub async fn get_or_create(&self, name: &str) -> Result<NetworkHandle> {
        if let Some(network) = self.runtime.list_networks(name).await?.into_iter().next() {
            debug!(network = %name, id = %network.short_id(), "Using existing network");
            return Ok(network);
        }

        let network = self.runtime.create_network(name).await?;
        info!(network = %name, id = %network.short_id(), "Created network");
        Ok(network)
    }
}
