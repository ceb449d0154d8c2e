//! Docker implementation of [`ContainerRuntime`].
//!
//! Talks to the local Docker daemon through bollard.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::service::{EndpointSettings, HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::labels::{SOURCE_KEY, SOURCE_VALUE};
use crate::runtime::r#trait::{
    ContainerRecord, ContainerRuntime, ContainerSpec, ExecOutput, LabelFilter, NetworkHandle,
};

/// Seconds a container gets to shut down before it is killed.
const STOP_TIMEOUT_SECS: i64 = 10;

/// Container runtime backed by the Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon and verifies it answers.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        info!("Connected to Docker daemon");
        Ok(Self { docker })
    }

    /// Wraps an existing client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn container_env(&self, id: &str) -> Result<Option<Vec<String>>> {
        match self.docker.inspect_container(id, None).await {
            Ok(inspect) => Ok(Some(inspect.config.and_then(|c| c.env).unwrap_or_default())),
            Err(e) if status_code(&e) == Some(404) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn status_code(err: &DockerError) -> Option<u16> {
    match err {
        DockerError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn server_message(err: &DockerError) -> String {
    match err {
        DockerError::DockerResponseServerError { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

fn not_found_or(err: DockerError, container_id: &str) -> OrchestratorError {
    if status_code(&err) == Some(404) {
        OrchestratorError::container_not_found(container_id)
    } else {
        err.into()
    }
}

/// Maps a `create_container` failure. Only a missing image and a name
/// conflict get their own variants; a missing network and every other
/// daemon error stay [`OrchestratorError::DockerApi`].
fn creation_error(err: DockerError, name: &str, image: &str) -> OrchestratorError {
    match status_code(&err) {
        Some(404) if server_message(&err).to_ascii_lowercase().contains("no such image") => {
            OrchestratorError::image_not_found(image)
        }
        Some(409) => OrchestratorError::container_creation_failed(name, server_message(&err)),
        _ => err.into(),
    }
}

fn is_missing_image(err: &DockerError) -> bool {
    match err {
        DockerError::DockerResponseServerError { status_code: 404, .. } => true,
        DockerError::DockerStreamError { error } => {
            let error = error.to_ascii_lowercase();
            error.contains("not found") || error.contains("manifest unknown")
        }
        _ => false,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) if status_code(&e) == Some(404) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(image = %image, "Pulling image");

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) if is_missing_image(&e) => {
                    return Err(OrchestratorError::image_not_found(image));
                }
                Err(e) => {
                    return Err(OrchestratorError::image_pull_failed(image, e.to_string()));
                }
            }
        }

        info!(image = %image, "Pulled image");
        Ok(())
    }

    async fn list_networks(&self, name: &str) -> Result<Vec<NetworkHandle>> {
        let filters: HashMap<String, Vec<String>> =
            [("name".to_string(), vec![name.to_string()])]
                .into_iter()
                .collect();
        let options = ListNetworksOptions { filters };

        // The daemon's name filter matches substrings.
        let networks = self
            .docker
            .list_networks(Some(options))
            .await?
            .into_iter()
            .filter_map(|n| match (n.id, n.name) {
                (Some(id), Some(n)) if n == name => Some(NetworkHandle { id, name: n }),
                _ => None,
            })
            .collect();
        Ok(networks)
    }

    async fn create_network(&self, name: &str) -> Result<NetworkHandle> {
        let labels: HashMap<&str, &str> = [(SOURCE_KEY, SOURCE_VALUE)].into_iter().collect();
        let options = CreateNetworkOptions {
            name,
            labels,
            ..Default::default()
        };

        let response = self
            .docker
            .create_network(options)
            .await
            .map_err(|e| OrchestratorError::network_creation_failed(name, server_message(&e)))?;
        if response.id.is_empty() {
            return Err(OrchestratorError::network_creation_failed(name, "no ID returned"));
        }

        info!(network = %name, id = %response.id, "Created network");
        Ok(NetworkHandle {
            id: response.id,
            name: name.to_string(),
        })
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String> {
        let port_key = format!("{}/tcp", spec.port);
        let exposed_ports: HashMap<String, HashMap<(), ()>> =
            [(port_key.clone(), HashMap::new())].into_iter().collect();
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = [(
            port_key,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(spec.port.to_string()),
            }]),
        )]
        .into_iter()
        .collect();

        let mounts = spec
            .mounts
            .iter()
            .map(|m| Mount {
                target: Some(m.target.clone()),
                source: Some(m.source.display().to_string()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            network_mode: Some(spec.network.clone()),
            mounts: Some(mounts),
            ..Default::default()
        };

        let endpoint = EndpointSettings {
            aliases: Some(spec.aliases.clone()),
            ..Default::default()
        };
        let networking_config = NetworkingConfig {
            endpoints_config: [(spec.network.clone(), endpoint)].into_iter().collect(),
        };

        let config = Config {
            image: Some(spec.image.clone()),
            hostname: Some(spec.hostname.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            networking_config: Some(networking_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| creation_error(e, &spec.name, &spec.image))?;

        for warning in &response.warnings {
            warn!(container = %spec.name, warning = %warning, "Container created with warning");
        }

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await?;

        info!(container = %spec.name, id = %response.id, "Started container");
        Ok(response.id)
    }

    async fn list_containers(
        &self,
        filter: &LabelFilter,
        include_stopped: bool,
    ) -> Result<Vec<ContainerRecord>> {
        let filters: HashMap<String, Vec<String>> =
            [("label".to_string(), vec![filter.as_filter()])]
                .into_iter()
                .collect();
        let options = ListContainersOptions {
            all: include_stopped,
            filters,
            ..Default::default()
        };

        let summaries = self.docker.list_containers(Some(options)).await?;
        let mut records = Vec::with_capacity(summaries.len());

        for summary in summaries {
            let Some(id) = summary.id else { continue };
            // Removed between listing and inspection.
            let Some(env) = self.container_env(&id).await? else {
                debug!(id = %id, "Container vanished during listing");
                continue;
            };

            let name = summary
                .names
                .and_then(|names| names.into_iter().next())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| id.clone());
            let state = summary.state.unwrap_or_default();

            records.push(ContainerRecord {
                running: state == "running",
                status: summary.status.unwrap_or(state),
                labels: summary.labels.unwrap_or_default(),
                image: summary.image,
                name,
                id,
                env,
            });
        }

        Ok(records)
    }

    async fn exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecOutput> {
        debug!(container = %container_id, cmd = ?cmd.first(), "Executing command");

        let exec_options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_options)
            .await
            .map_err(|e| match status_code(&e) {
                Some(404) => OrchestratorError::container_not_found(container_id),
                _ => OrchestratorError::exec_failed(container_id, server_message(&e)),
            })?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| OrchestratorError::exec_failed(container_id, server_message(&e)))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = start_result {
            while let Some(result) = output.next().await {
                match result {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(OrchestratorError::exec_failed(container_id, e.to_string()));
                    }
                }
            }
        }

        let exec_inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = exec_inspect.exit_code.unwrap_or(-1);

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| not_found_or(e, container_id))?;
        info!(container = %container_id, "Started container");
        Ok(())
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };
        match self.docker.stop_container(container_id, Some(options)).await {
            Ok(()) => {}
            // Already stopped.
            Err(e) if status_code(&e) == Some(304) => {}
            Err(e) => return Err(not_found_or(e, container_id)),
        }
        info!(container = %container_id, "Stopped container");
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| not_found_or(e, container_id))?;
        info!(container = %container_id, "Removed container");
        Ok(())
    }
}
