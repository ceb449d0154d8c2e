//! Replica sets and shards.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::topology::deployment::{DeploymentState, DeploymentType};
use crate::topology::node::Node;

/// An ordered set of mongod nodes sharing one replica-set name.
///
/// Members are kept in ascending port order; the first member is the one
/// every administrative command targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSet {
    /// Replica-set name (`--replSet`).
    pub name: String,

    /// Port of the first member.
    pub start_port: u16,

    /// Members in ascending port order.
    pub members: Vec<Node>,

    /// Aggregate state of the members.
    pub state: DeploymentState,

    /// MongoDB server version.
    pub mongo_version: Option<String>,
}

impl ReplicaSet {
    /// Creates a replica set from its members, sorting them by port.
    pub fn new(name: impl Into<String>, mut members: Vec<Node>) -> Self {
        members.sort_by_key(|m| m.port);
        let start_port = members.first().map(|m| m.port).unwrap_or_default();
        let state = DeploymentState::aggregate(members.iter().map(|m| &m.state));
        let mongo_version = members.iter().find_map(|m| m.mongo_version.clone());
        Self {
            name: name.into(),
            start_port,
            members,
            state,
            mongo_version,
        }
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// The lowest-port member.
    pub fn first(&self) -> Option<&Node> {
        self.members.first()
    }

    /// Returns the deployment type recorded on the members.
    pub fn deployment_type(&self) -> DeploymentType {
        self.first()
            .map(|m| m.deployment_type)
            .unwrap_or(DeploymentType::ReplicaSet)
    }

    /// Returns `h1:p1,h2:p2,...` in member order.
    pub fn host_list(&self) -> String {
        self.members
            .iter()
            .map(Node::hostname)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Returns the replica-set connection string.
    pub fn hostname(&self) -> String {
        format!("mongodb://{}/?replicaSet={}", self.host_list(), self.name)
    }

    /// Returns the seed list in `name/h1:p1,...` form, as used by `--configdb`
    /// and `sh.addShard`.
    pub fn config_db(&self) -> String {
        format!("{}/{}", self.name, self.host_list())
    }

    /// Returns `start-end`.
    pub fn port_range(&self) -> String {
        let end = self.start_port as usize + self.size().saturating_sub(1);
        format!("{}-{}", self.start_port, end)
    }

    /// Returns true if members are strictly ordered by port.
    pub fn is_port_ordered(&self) -> bool {
        self.members.windows(2).all(|w| w[0].port < w[1].port)
    }

    /// Returns the arbiter, if the set has one.
    pub fn arbiter(&self) -> Option<&Node> {
        self.members.iter().find(|m| m.is_arbiter)
    }

    /// Recomputes the aggregate state from the members.
    pub fn refresh_state(&mut self) {
        self.state = DeploymentState::aggregate(self.members.iter().map(|m| &m.state));
    }

    /// Returns the dictionary projection of this replica set.
    pub fn as_dict(&self, detailed: bool) -> Value {
        let mut dict = json!({
            "name": self.name,
            "deployment_type": self.deployment_type().label(),
            "state": self.state.to_string(),
            "containers": self.size(),
            "mongo_version": self.mongo_version,
            "port_range": self.port_range(),
        });
        if detailed {
            dict["size"] = json!(self.size());
            dict["members"] = Value::Array(self.members.iter().map(|m| m.as_dict(true)).collect());
        }
        dict
    }
}

/// A replica set acting as one shard of a sharded cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    /// 1-based shard ID.
    pub shard_id: u32,

    /// The shard's replica set.
    pub replica_set: ReplicaSet,
}

impl Shard {
    /// Creates a shard.
    pub fn new(shard_id: u32, replica_set: ReplicaSet) -> Self {
        Self {
            shard_id,
            replica_set,
        }
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.replica_set.size()
    }

    /// Returns the `sh.addShard` argument for this shard.
    pub fn add_shard_target(&self) -> String {
        self.replica_set.config_db()
    }

    /// Returns the dictionary projection of this shard.
    pub fn as_dict(&self, detailed: bool) -> Value {
        let mut dict = self.replica_set.as_dict(detailed);
        dict["shard_id"] = json!(self.shard_id);
        dict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::node::NodeRole;

    fn member(name: &str, port: u16, state: DeploymentState) -> Node {
        let mut node = Node::builder(name, port)
            .role(NodeRole::ReplicaSetMember)
            .deployment_type(DeploymentType::ReplicaSet)
            .group("rs0")
            .parent("rs0")
            .build();
        node.state = state;
        node
    }

    #[test]
    fn test_members_sorted_by_port() {
        let rs = ReplicaSet::new(
            "rs0",
            vec![
                member("rs0-3", 27019, DeploymentState::Running),
                member("rs0-1", 27017, DeploymentState::Running),
                member("rs0-2", 27018, DeploymentState::Running),
            ],
        );

        assert_eq!(rs.start_port, 27017);
        assert!(rs.is_port_ordered());
        assert_eq!(rs.first().map(|m| m.name.as_str()), Some("rs0-1"));
        assert_eq!(rs.port_range(), "27017-27019");
    }

    #[test]
    fn test_connection_strings() {
        let rs = ReplicaSet::new(
            "rs0",
            vec![
                member("rs0-1", 27017, DeploymentState::Running),
                member("rs0-2", 27018, DeploymentState::Running),
            ],
        );

        assert_eq!(
            rs.hostname(),
            "mongodb://rs0-1:27017,rs0-2:27018/?replicaSet=rs0"
        );
        assert_eq!(rs.config_db(), "rs0/rs0-1:27017,rs0-2:27018");
    }

    #[test]
    fn test_state_aggregation() {
        let rs = ReplicaSet::new(
            "rs0",
            vec![
                member("rs0-1", 27017, DeploymentState::Running),
                member("rs0-2", 27018, DeploymentState::Stopped),
            ],
        );
        assert_eq!(rs.state, DeploymentState::PartiallyRunning);
    }

    #[test]
    fn test_detailed_dict_lists_members() {
        let rs = ReplicaSet::new(
            "rs0",
            vec![
                member("rs0-1", 27017, DeploymentState::Running),
                member("rs0-2", 27018, DeploymentState::Running),
            ],
        );
        let shard = Shard::new(1, rs.clone());

        let dict = rs.as_dict(true);
        assert_eq!(dict["size"], 2);
        assert_eq!(dict["members"][1]["name"], "rs0-2");

        assert_eq!(shard.as_dict(false)["shard_id"], 1);
        assert_eq!(shard.add_shard_target(), "rs0/rs0-1:27017,rs0-2:27018");
    }
}
