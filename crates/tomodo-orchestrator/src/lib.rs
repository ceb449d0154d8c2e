//! Provisioning and discovery of local MongoDB topologies.
//!
//! This crate builds standalone nodes, replica sets and sharded clusters out
//! of containers on a single host, and rebuilds those topologies later from
//! container labels alone. There is no state file: the labels attached to
//! each container are the system of record.
//!
//! # Overview
//!
//! - **Provisioning**: planning names and ports, checking them, creating
//!   containers in dependency order and wiring replica sets and shards
//! - **Discovery**: listing labeled containers and reconstructing
//!   deployments from them
//! - **Lifecycle**: starting, stopping and removing discovered deployments
//!
//! # Architecture
//!
//! - [`runtime`]: the container runtime trait and its Docker implementation
//! - [`labels`]: the label schema written to and read from containers
//! - [`topology`]: deployments, replica sets, shards and nodes
//! - [`container`]: container creation and host-side storage
//! - [`provisioner`]: the creation state machine
//! - [`reader`]: discovery and reconstruction
//! - [`lifecycle`]: start, stop and remove
//! - [`error`]: error types
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tomodo_orchestrator::{
//!     DockerRuntime, ProvisionSpec, Provisioner, Reader, StorageLayout, TopologyKind,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = Arc::new(DockerRuntime::connect().await?);
//!     let provisioner = Provisioner::new(runtime.clone(), StorageLayout::from_home()?);
//!
//!     let spec = ProvisionSpec::builder()
//!         .name("rs0")
//!         .topology(TopologyKind::ReplicaSet)
//!         .replicas(3)
//!         .build();
//!     let deployment = provisioner.provision(&spec).await?;
//!     println!("{}", deployment.as_markdown_table());
//!
//!     // Later, possibly from another process.
//!     let found = Reader::new(runtime).get_by_name("rs0", true).await?;
//!     assert_eq!(found.port_range(), "27017-27019");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod container;
pub mod error;
pub mod labels;
pub mod lifecycle;
pub mod network;
pub mod ports;
pub mod provisioner;
pub mod reader;
pub mod readiness;
pub mod retry;
pub mod runtime;
pub mod shell;
pub mod topology;

// Re-export commonly used types at the crate root
pub use config::{Credentials, ProvisionSpec, ReadinessSettings, TopologyKind};
pub use container::StorageLayout;
pub use error::{OrchestratorError, Result};
pub use lifecycle::Lifecycle;
pub use provisioner::Provisioner;
pub use reader::Reader;
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use topology::{
    deployments_markdown_table, Deployment, DeploymentState, DeploymentType, Node, NodeRole,
    ReplicaSet, Shard, ShardedCluster, DEPLOYMENT_TABLE_HEADERS,
};
