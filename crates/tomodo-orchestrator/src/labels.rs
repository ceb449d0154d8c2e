//! Container label schema.
//!
//! Labels are the only persisted state: every container carries a flat
//! string map describing the node's place in its deployment, and the reader
//! rebuilds topologies from nothing else. The key set is fixed and
//! versioned. Decoding is strict: a missing required key, an unparsable
//! value or an unrecognised `tomodo-*` key is an error, never a default.
//!
//! | key | roles | value |
//! |-----|-------|-------|
//! | `source` | all | always `tomodo` |
//! | `tomodo-name` | all | node name |
//! | `tomodo-group` | all | deployment name |
//! | `tomodo-port` | all | port |
//! | `tomodo-role` | all | `standalone`, `rs-member`, `cfg-svr`, `mongos` |
//! | `tomodo-type` | all | `Standalone`, `Replica Set`, `Sharded Cluster` |
//! | `tomodo-shard-count` | all | number of shards, `0` outside sharded clusters |
//! | `tomodo-shard-id` | mongod | shard ID, `0` outside shards |
//! | `tomodo-arbiter` | mongod | `0` or `1` |
//! | `tomodo-ephemeral` | mongod | `0` or `1` |
//! | `tomodo-data-dir` | mongod | host data directory, empty when ephemeral |
//! | `tomodo-container-data-dir` | mongod | container data directory, empty when ephemeral |
//! | `tomodo-schema-version` | all | schema version, `1` when absent |

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{OrchestratorError, Result};
use crate::topology::{DeploymentType, Node, NodeRole};

/// Marker key present on every managed container.
pub const SOURCE_KEY: &str = "source";

/// Marker value present on every managed container.
pub const SOURCE_VALUE: &str = "tomodo";

/// Prefix of every schema key except the marker.
pub const LABEL_PREFIX: &str = "tomodo-";

/// Schema version written by this engine.
pub const SCHEMA_VERSION: u32 = 1;

/// Node name.
pub const NAME: &str = "tomodo-name";
/// Deployment name.
pub const GROUP: &str = "tomodo-group";
/// Port.
pub const PORT: &str = "tomodo-port";
/// Node role.
pub const ROLE: &str = "tomodo-role";
/// Deployment type.
pub const TYPE: &str = "tomodo-type";
/// Shard count of the deployment.
pub const SHARD_COUNT: &str = "tomodo-shard-count";
/// Shard ID.
pub const SHARD_ID: &str = "tomodo-shard-id";
/// Arbiter flag.
pub const ARBITER: &str = "tomodo-arbiter";
/// Ephemeral flag.
pub const EPHEMERAL: &str = "tomodo-ephemeral";
/// Host data directory.
pub const DATA_DIR: &str = "tomodo-data-dir";
/// Container data directory.
pub const CONTAINER_DATA_DIR: &str = "tomodo-container-data-dir";
/// Schema version.
pub const SCHEMA: &str = "tomodo-schema-version";

const COMMON_KEYS: [&str; 6] = [NAME, GROUP, PORT, ROLE, TYPE, SHARD_COUNT];
const MONGOD_KEYS: [&str; 5] = [SHARD_ID, ARBITER, EPHEMERAL, DATA_DIR, CONTAINER_DATA_DIR];

/// The decoded labels of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRecord {
    /// Node name.
    pub name: String,
    /// Deployment name.
    pub group: String,
    /// Port.
    pub port: u16,
    /// Role.
    pub role: NodeRole,
    /// Deployment type.
    pub deployment_type: DeploymentType,
    /// Shard count of the deployment.
    pub shard_count: u32,
    /// Shard ID, for shard members.
    pub shard_id: Option<u32>,
    /// Arbiter flag.
    pub is_arbiter: bool,
    /// Ephemeral flag.
    pub is_ephemeral: bool,
    /// Host data directory.
    pub host_data_dir: Option<PathBuf>,
    /// Container data directory.
    pub container_data_dir: Option<String>,
}

impl LabelRecord {
    /// Converts the record into a node with no runtime state.
    ///
    /// The owning replica set is not stored in labels; it follows from the
    /// naming scheme.
    pub fn into_node(self) -> Node {
        let parent_name = match (self.role, self.deployment_type, self.shard_id) {
            (NodeRole::ConfigServer, _, _) => Some(format!("{}-cfg-svr", self.group)),
            (NodeRole::ReplicaSetMember, DeploymentType::ShardedCluster, Some(id)) => {
                Some(format!("{}-sh-{}", self.group, id))
            }
            (NodeRole::ReplicaSetMember, _, _) => Some(self.group.clone()),
            (NodeRole::Standalone | NodeRole::Router, _, _) => None,
        };

        let mut node = Node::builder(self.name, self.port)
            .role(self.role)
            .deployment_type(self.deployment_type)
            .group(self.group)
            .arbiter(self.is_arbiter)
            .ephemeral(self.is_ephemeral)
            .build();
        node.parent_name = parent_name;
        node.shard_id = self.shard_id;
        node.host_data_dir = self.host_data_dir;
        node.container_data_dir = self.container_data_dir;
        node
    }
}

/// Encodes the labels of a planned node.
pub fn encode(node: &Node, shard_count: u32) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(SOURCE_KEY.to_string(), SOURCE_VALUE.to_string());
    labels.insert(SCHEMA.to_string(), SCHEMA_VERSION.to_string());
    labels.insert(NAME.to_string(), node.name.clone());
    labels.insert(GROUP.to_string(), node.group_name.clone());
    labels.insert(PORT.to_string(), node.port.to_string());
    labels.insert(ROLE.to_string(), node.role.name().to_string());
    labels.insert(TYPE.to_string(), node.deployment_type.label().to_string());
    labels.insert(SHARD_COUNT.to_string(), shard_count.to_string());

    if node.role.is_mongod() {
        labels.insert(SHARD_ID.to_string(), node.shard_id.unwrap_or(0).to_string());
        labels.insert(ARBITER.to_string(), flag(node.is_arbiter).to_string());
        labels.insert(EPHEMERAL.to_string(), flag(node.is_ephemeral).to_string());
        labels.insert(
            DATA_DIR.to_string(),
            node.host_data_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        );
        labels.insert(
            CONTAINER_DATA_DIR.to_string(),
            node.container_data_dir.clone().unwrap_or_default(),
        );
    }
    labels
}

/// Decodes the labels of the container `container` (name or ID, used in errors).
pub fn decode(container: &str, labels: &HashMap<String, String>) -> Result<LabelRecord> {
    let fail = |reason: String| OrchestratorError::label_decode(container, reason);

    if labels.get(SOURCE_KEY).map(String::as_str) != Some(SOURCE_VALUE) {
        return Err(fail(format!("missing {SOURCE_KEY}={SOURCE_VALUE} marker")));
    }

    let version = match labels.get(SCHEMA) {
        None => 1,
        Some(v) => v
            .parse::<u32>()
            .map_err(|_| fail(format!("invalid {SCHEMA} value {v:?}")))?,
    };
    if version == 0 || version > SCHEMA_VERSION {
        return Err(fail(format!("unsupported label schema version {version}")));
    }

    if let Some(unknown) = labels.keys().find(|k| {
        k.starts_with(LABEL_PREFIX)
            && k.as_str() != SCHEMA
            && !COMMON_KEYS.contains(&k.as_str())
            && !MONGOD_KEYS.contains(&k.as_str())
    }) {
        return Err(fail(format!("unrecognised label key {unknown}")));
    }

    let type_value = required(container, labels, TYPE)?;
    let deployment_type = DeploymentType::parse(type_value)
        .ok_or_else(|| OrchestratorError::invalid_deployment_type(type_value))?;

    let role_value = required(container, labels, ROLE)?;
    let role = NodeRole::from_name(role_value)
        .ok_or_else(|| fail(format!("invalid {ROLE} value {role_value:?}")))?;

    let port = parse_number::<u16>(PORT, required(container, labels, PORT)?).map_err(fail)?;
    let shard_count =
        parse_number::<u32>(SHARD_COUNT, required(container, labels, SHARD_COUNT)?).map_err(fail)?;

    let mut record = LabelRecord {
        name: required(container, labels, NAME)?.to_string(),
        group: required(container, labels, GROUP)?.to_string(),
        port,
        role,
        deployment_type,
        shard_count,
        shard_id: None,
        is_arbiter: false,
        is_ephemeral: true,
        host_data_dir: None,
        container_data_dir: None,
    };

    if role.is_mongod() {
        let shard_id =
            parse_number::<u32>(SHARD_ID, required(container, labels, SHARD_ID)?).map_err(fail)?;
        record.shard_id = (shard_id > 0).then_some(shard_id);
        record.is_arbiter =
            parse_flag(ARBITER, required(container, labels, ARBITER)?).map_err(fail)?;
        record.is_ephemeral =
            parse_flag(EPHEMERAL, required(container, labels, EPHEMERAL)?).map_err(fail)?;
        record.host_data_dir =
            non_empty(required(container, labels, DATA_DIR)?).map(PathBuf::from);
        record.container_data_dir =
            non_empty(required(container, labels, CONTAINER_DATA_DIR)?).map(str::to_string);
    }

    Ok(record)
}

fn required<'a>(
    container: &str,
    labels: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a str> {
    labels
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| {
            OrchestratorError::label_decode(container, format!("missing label key {key}"))
        })
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn parse_flag(key: &str, value: &str) -> std::result::Result<bool, String> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(format!("invalid {key} value {other:?}")),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> std::result::Result<T, String> {
    value
        .parse::<T>()
        .map_err(|_| format!("invalid {key} value {value:?}"))
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard_member() -> Node {
        let mut node = Node::builder("sh-sh-2-3", 27024)
            .role(NodeRole::ReplicaSetMember)
            .deployment_type(DeploymentType::ShardedCluster)
            .group("sh")
            .parent("sh-sh-2")
            .shard_id(2)
            .arbiter(true)
            .build();
        node.host_data_dir = Some(PathBuf::from("/home/me/.tomodo/data/sh-sh-2-3-db"));
        node.container_data_dir = Some("/data/db".to_string());
        node
    }

    #[test]
    fn test_encode_mongod_labels() {
        let labels = encode(&shard_member(), 2);
        assert_eq!(labels[SOURCE_KEY], "tomodo");
        assert_eq!(labels[NAME], "sh-sh-2-3");
        assert_eq!(labels[GROUP], "sh");
        assert_eq!(labels[PORT], "27024");
        assert_eq!(labels[ROLE], "rs-member");
        assert_eq!(labels[TYPE], "Sharded Cluster");
        assert_eq!(labels[SHARD_ID], "2");
        assert_eq!(labels[SHARD_COUNT], "2");
        assert_eq!(labels[ARBITER], "1");
        assert_eq!(labels[EPHEMERAL], "0");
        assert_eq!(labels[CONTAINER_DATA_DIR], "/data/db");
    }

    #[test]
    fn test_router_labels_omit_mongod_keys() {
        let router = Node::builder("sh-mongos-1", 27018)
            .role(NodeRole::Router)
            .deployment_type(DeploymentType::ShardedCluster)
            .group("sh")
            .ephemeral(true)
            .build();
        let labels = encode(&router, 2);
        for key in MONGOD_KEYS {
            assert!(!labels.contains_key(key), "{key} should be absent");
        }
        let decoded = decode("sh-mongos-1", &labels).unwrap().into_node();
        assert_eq!(decoded, router);
    }

    #[test]
    fn test_decode_is_left_inverse_of_encode() {
        let node = shard_member();
        let decoded = decode("c1", &encode(&node, 2)).unwrap();
        assert_eq!(decoded.shard_count, 2);
        assert_eq!(decoded.into_node(), node);

        let member = Node::builder("rs0-1", 27017)
            .role(NodeRole::ReplicaSetMember)
            .deployment_type(DeploymentType::ReplicaSet)
            .group("rs0")
            .parent("rs0")
            .ephemeral(true)
            .build();
        assert_eq!(decode("c2", &encode(&member, 0)).unwrap().into_node(), member);
    }

    #[test]
    fn test_missing_key_is_error() {
        let mut labels = encode(&shard_member(), 2);
        labels.remove(SHARD_ID);
        let err = decode("c1", &labels).unwrap_err();
        assert!(matches!(err, OrchestratorError::LabelDecode { .. }));
        assert!(err.to_string().contains(SHARD_ID));
    }

    #[test]
    fn test_unknown_key_is_error() {
        let mut labels = encode(&shard_member(), 2);
        labels.insert("tomodo-priority".to_string(), "1".to_string());
        assert!(decode("c1", &labels).is_err());

        // image labels outside the namespace are ignored
        let mut labels = encode(&shard_member(), 2);
        labels.insert("org.opencontainers.image.version".to_string(), "22.04".to_string());
        assert!(decode("c1", &labels).is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let mut labels = encode(&shard_member(), 2);
        labels.insert(ARBITER.to_string(), "yes".to_string());
        assert!(decode("c1", &labels).is_err());

        let mut labels = encode(&shard_member(), 2);
        labels.insert(PORT.to_string(), "70000".to_string());
        assert!(decode("c1", &labels).is_err());

        let mut labels = encode(&shard_member(), 2);
        labels.insert(TYPE.to_string(), "Atlas Deployment".to_string());
        assert!(matches!(
            decode("c1", &labels),
            Err(OrchestratorError::InvalidDeploymentType(_))
        ));
    }

    #[test]
    fn test_schema_version() {
        let mut labels = encode(&shard_member(), 2);
        labels.remove(SCHEMA);
        assert!(decode("c1", &labels).is_ok());

        labels.insert(SCHEMA.to_string(), "2".to_string());
        assert!(decode("c1", &labels).is_err());
    }

    #[test]
    fn test_type_label_is_normalised() {
        let mut labels = encode(&shard_member(), 2);
        labels.insert(TYPE.to_string(), "sharded_cluster".to_string());
        assert_eq!(
            decode("c1", &labels).unwrap().deployment_type,
            DeploymentType::ShardedCluster
        );
    }

    #[test]
    fn test_missing_marker_is_error() {
        let mut labels = encode(&shard_member(), 2);
        labels.remove(SOURCE_KEY);
        assert!(decode("c1", &labels).is_err());
    }
}
