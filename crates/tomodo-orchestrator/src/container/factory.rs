//! Builds and launches node containers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Credentials;
use crate::container::storage::{keyfile_target, StorageLayout, CONTAINER_DATA_DIR};
use crate::error::{OrchestratorError, Result};
use crate::labels;
use crate::runtime::{short_id, BindMount, ContainerRuntime, ContainerSpec};
use crate::topology::{DeploymentState, Node, NodeRole};

/// Settings shared by every container of one deployment.
#[derive(Debug, Clone)]
pub struct FactorySettings {
    /// Image reference.
    pub image: String,

    /// Network every container joins.
    pub network: String,

    /// Root credentials, enabling authentication when present.
    pub credentials: Option<Credentials>,

    /// Shard count recorded in labels.
    pub shard_count: u32,
}

/// Creates one container per node.
///
/// A missing image is pulled at most once per factory: either up front by
/// [`ContainerFactory::ensure_image`] or when the first container creation
/// reports it missing.
pub struct ContainerFactory {
    runtime: Arc<dyn ContainerRuntime>,
    storage: StorageLayout,
    settings: FactorySettings,
    pulled: AtomicBool,
}

impl ContainerFactory {
    /// Creates a factory.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        storage: StorageLayout,
        settings: FactorySettings,
    ) -> Self {
        Self {
            runtime,
            storage,
            settings,
            pulled: AtomicBool::new(false),
        }
    }

    /// Pulls the image unless it is available locally.
    pub async fn ensure_image(&self) -> Result<()> {
        if self.runtime.image_exists(&self.settings.image).await? {
            return Ok(());
        }
        self.pull_once().await
    }

    /// Creates and starts a mongod container for `node`.
    ///
    /// On success the node carries its container ID, data directories and
    /// image, and is marked running.
    pub async fn create_node(&self, node: &mut Node) -> Result<()> {
        let mut command = mongod_command(node)?;
        let mut mounts = Vec::new();
        let mut env = Vec::new();

        if !node.is_ephemeral {
            let host_dir = self.storage.create_data_dir(&node.name).await?;
            mounts.push(BindMount {
                source: host_dir.clone(),
                target: CONTAINER_DATA_DIR.to_string(),
                read_only: false,
            });
            node.host_data_dir = Some(host_dir);
            node.container_data_dir = Some(CONTAINER_DATA_DIR.to_string());
        }

        if let Some(credentials) = &self.settings.credentials {
            env.push(format!("MONGO_INITDB_ROOT_USERNAME={}", credentials.username));
            env.push(format!("MONGO_INITDB_ROOT_PASSWORD={}", credentials.password));
            self.add_keyfile(&mut command, &mut mounts).await?;
        }

        self.launch(node, command, mounts, env).await
    }

    /// Creates and starts a mongos container for `node`, pointed at the
    /// config servers in `config_db` (`rs/host:port,...`).
    pub async fn create_router(&self, node: &mut Node, config_db: &str) -> Result<()> {
        let mut command = router_command(node, config_db);
        let mut mounts = Vec::new();
        if self.settings.credentials.is_some() {
            self.add_keyfile(&mut command, &mut mounts).await?;
        }
        self.launch(node, command, mounts, Vec::new()).await
    }

    async fn add_keyfile(
        &self,
        command: &mut Vec<String>,
        mounts: &mut Vec<BindMount>,
    ) -> Result<()> {
        let keyfile = self.storage.ensure_keyfile().await?;
        command.push("--keyFile".to_string());
        command.push(keyfile_target().to_string());
        mounts.push(BindMount {
            source: keyfile,
            target: keyfile_target().to_string(),
            read_only: true,
        });
        Ok(())
    }

    async fn launch(
        &self,
        node: &mut Node,
        command: Vec<String>,
        mounts: Vec<BindMount>,
        env: Vec<String>,
    ) -> Result<()> {
        let spec = ContainerSpec {
            name: node.name.clone(),
            image: self.settings.image.clone(),
            hostname: node.name.clone(),
            command,
            env,
            labels: labels::encode(node, self.settings.shard_count),
            port: node.port,
            mounts,
            network: self.settings.network.clone(),
            aliases: vec![node.name.clone()],
        };

        let id = match self.runtime.run_container(&spec).await {
            Err(OrchestratorError::ImageNotFound(_)) if !self.pulled.load(Ordering::SeqCst) => {
                warn!(image = %spec.image, container = %spec.name, "Image missing, pulling");
                self.pull_once().await?;
                self.runtime.run_container(&spec).await?
            }
            other => other?,
        };

        node.container_id = Some(short_id(&id).to_string());
        node.image = Some(spec.image);
        node.state = DeploymentState::Running;

        info!(
            container = %node.name,
            id = %short_id(&id),
            port = node.port,
            role = %node.role,
            "Created container"
        );
        Ok(())
    }

    async fn pull_once(&self) -> Result<()> {
        if self.pulled.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::image_not_found(&self.settings.image));
        }
        self.runtime.pull_image(&self.settings.image).await
    }
}

/// Builds the mongod command line of a node.
pub fn mongod_command(node: &Node) -> Result<Vec<String>> {
    let mut command = vec![
        "mongod".to_string(),
        "--bind_ip_all".to_string(),
        "--port".to_string(),
        node.port.to_string(),
    ];

    if !node.is_ephemeral {
        command.extend([
            "--dbpath".to_string(),
            CONTAINER_DATA_DIR.to_string(),
            "--logpath".to_string(),
            format!("{CONTAINER_DATA_DIR}/mongod.log"),
        ]);
    }

    let replica_set = || {
        node.parent_name.clone().ok_or_else(|| {
            OrchestratorError::invalid_configuration(format!(
                "node {} has no replica set name",
                node.name
            ))
        })
    };

    match node.role {
        NodeRole::Standalone => {}
        NodeRole::ConfigServer => {
            command.push("--configsvr".to_string());
            command.extend(["--replSet".to_string(), replica_set()?]);
        }
        NodeRole::ReplicaSetMember => {
            if node.shard_id.is_some() {
                command.push("--shardsvr".to_string());
            }
            command.extend(["--replSet".to_string(), replica_set()?]);
        }
        NodeRole::Router => {
            return Err(OrchestratorError::invalid_configuration(format!(
                "{} is a router, not a mongod",
                node.name
            )));
        }
    }
    Ok(command)
}

/// Builds the mongos command line of a router.
pub fn router_command(node: &Node, config_db: &str) -> Vec<String> {
    vec![
        "mongos".to_string(),
        "--bind_ip_all".to_string(),
        "--port".to_string(),
        node.port.to_string(),
        "--configdb".to_string(),
        config_db.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::FakeRuntime;
    use crate::topology::DeploymentType;
    use tempfile::TempDir;

    fn settings(credentials: Option<Credentials>) -> FactorySettings {
        FactorySettings {
            image: "mongo:latest".to_string(),
            network: "mongo_network".to_string(),
            credentials,
            shard_count: 0,
        }
    }

    fn member(name: &str, port: u16) -> Node {
        Node::builder(name, port)
            .role(NodeRole::ReplicaSetMember)
            .deployment_type(DeploymentType::ReplicaSet)
            .group("rs0")
            .parent("rs0")
            .build()
    }

    #[test]
    fn test_mongod_command_flags() {
        let standalone = Node::builder("solo", 27017).build();
        assert_eq!(
            mongod_command(&standalone).unwrap(),
            vec![
                "mongod",
                "--bind_ip_all",
                "--port",
                "27017",
                "--dbpath",
                "/data/db",
                "--logpath",
                "/data/db/mongod.log"
            ]
        );

        let cfg = Node::builder("sh-cfg-svr-1", 30000)
            .role(NodeRole::ConfigServer)
            .parent("sh-cfg-svr")
            .ephemeral(true)
            .build();
        assert_eq!(
            mongod_command(&cfg).unwrap(),
            vec![
                "mongod",
                "--bind_ip_all",
                "--port",
                "30000",
                "--configsvr",
                "--replSet",
                "sh-cfg-svr"
            ]
        );

        let shard_member = Node::builder("sh-sh-1-1", 30002)
            .role(NodeRole::ReplicaSetMember)
            .parent("sh-sh-1")
            .shard_id(1)
            .ephemeral(true)
            .build();
        let command = mongod_command(&shard_member).unwrap();
        assert!(command.contains(&"--shardsvr".to_string()));
        assert_eq!(command.last().map(String::as_str), Some("sh-sh-1"));

        let router = Node::builder("sh-mongos-1", 30001).role(NodeRole::Router).build();
        assert!(mongod_command(&router).is_err());
    }

    #[test]
    fn test_router_command() {
        let router = Node::builder("sh-mongos-1", 30001).role(NodeRole::Router).build();
        assert_eq!(
            router_command(&router, "sh-cfg-svr/sh-cfg-svr-1:30000"),
            vec![
                "mongos",
                "--bind_ip_all",
                "--port",
                "30001",
                "--configdb",
                "sh-cfg-svr/sh-cfg-svr-1:30000"
            ]
        );
    }

    #[tokio::test]
    async fn test_create_node_mounts_data_dir() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let factory = ContainerFactory::new(
            runtime.clone(),
            StorageLayout::new(dir.path()),
            settings(None),
        );

        let mut node = member("rs0-1", 27017);
        factory.create_node(&mut node).await.unwrap();

        let container = runtime.container("rs0-1").unwrap();
        assert_eq!(node.container_id.as_deref(), Some(short_id(&container.id)));
        assert_eq!(node.host_data_dir, Some(dir.path().join("data").join("rs0-1-db")));
        assert!(dir.path().join("data").join("rs0-1-db").is_dir());
        assert_eq!(container.spec.aliases, vec!["rs0-1"]);
        assert_eq!(container.spec.mounts[0].target, "/data/db");
        assert_eq!(container.spec.labels, labels::encode(&node, 0));
        assert!(node.is_running());
    }

    #[tokio::test]
    async fn test_credentials_add_keyfile() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let credentials = Credentials {
            username: "root".to_string(),
            password: "secret".to_string(),
        };
        let factory = ContainerFactory::new(
            runtime.clone(),
            StorageLayout::new(dir.path()),
            settings(Some(credentials)),
        );

        let mut node = member("rs0-1", 27017);
        node.is_ephemeral = true;
        factory.create_node(&mut node).await.unwrap();
        let mut router = Node::builder("rs0-mongos-1", 27018).role(NodeRole::Router).build();
        factory.create_router(&mut router, "cfg/cfg-1:27000").await.unwrap();

        let container = runtime.container("rs0-1").unwrap();
        assert!(container.spec.env.contains(&"MONGO_INITDB_ROOT_USERNAME=root".to_string()));
        assert!(container.spec.command.contains(&"--keyFile".to_string()));
        assert_eq!(container.spec.mounts.len(), 1);
        assert!(container.spec.mounts[0].read_only);
        assert!(dir.path().join("mongo_keyfile").is_file());

        let router = runtime.container("rs0-mongos-1").unwrap();
        assert!(router.spec.command.contains(&"--keyFile".to_string()));
        assert!(router.spec.env.is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_pulled_once() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        runtime.with_state(|s| {
            s.images.clear();
            s.registry.insert("mongo:latest".to_string());
        });
        let factory = ContainerFactory::new(
            runtime.clone(),
            StorageLayout::new(dir.path()),
            settings(None),
        );

        let mut first = member("rs0-1", 27017);
        let mut second = member("rs0-2", 27018);
        factory.create_node(&mut first).await.unwrap();
        factory.create_node(&mut second).await.unwrap();

        assert_eq!(runtime.with_state(|s| s.pulls.clone()), vec!["mongo:latest"]);
        assert_eq!(runtime.container_names(), vec!["rs0-1", "rs0-2"]);
    }

    #[tokio::test]
    async fn test_unknown_image_fails_after_one_pull() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        runtime.with_state(|s| s.images.clear());
        let factory = ContainerFactory::new(
            runtime.clone(),
            StorageLayout::new(dir.path()),
            settings(None),
        );

        let result = factory.ensure_image().await;
        assert!(matches!(result, Err(OrchestratorError::ImageNotFound(_))));

        let mut node = member("rs0-1", 27017);
        let result = factory.create_node(&mut node).await;
        assert!(matches!(result, Err(OrchestratorError::ImageNotFound(_))));
        assert_eq!(runtime.with_state(|s| s.pulls.len()), 1);
        assert!(runtime.container_names().is_empty());
    }
}
