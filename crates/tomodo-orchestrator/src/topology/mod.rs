//! Topology model.
//!
//! A deployment is one of three closed variants. Per-node role is an enum
//! field on a single [`Node`] value type.

pub mod deployment;
pub mod node;
pub mod plan;
pub mod replica_set;

pub use deployment::{
    deployments_markdown_table, Deployment, DeploymentState, DeploymentType, ShardedCluster,
    DEPLOYMENT_TABLE_HEADERS,
};
pub use node::{Node, NodeBuilder, NodeRole};
pub use plan::TopologyPlan;
pub use replica_set::{ReplicaSet, Shard};
