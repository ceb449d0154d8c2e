//! Error types for the orchestrator crate.
//!
//! Errors are grouped the way callers act on them: configuration problems are
//! raised before any I/O, resource conflicts before any container exists,
//! and infrastructure errors carry the name, port or image they concern.

use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur while provisioning or discovering deployments.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The requested topology is not valid.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A deployment with the same name is already discoverable.
    #[error("deployment {0} already exists")]
    NameCollision(String),

    /// One or more ports of the planned range are in use on the host.
    #[error("ports already in use on the host: {ports:?}")]
    PortsTaken {
        /// The ports found to be bound.
        ports: Vec<u16>,
    },

    /// The image is neither available locally nor in the registry.
    #[error("MongoDB image not found: {0}")]
    ImageNotFound(String),

    /// Pulling the image failed for a reason other than a missing image.
    #[error("failed to pull image {image}: {reason}")]
    ImagePullFailed {
        /// The image that failed to pull.
        image: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Container creation failed.
    #[error("failed to create container {name}: {reason}")]
    ContainerCreationFailed {
        /// The container name.
        name: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Container not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Network creation failed.
    #[error("failed to create network {name}: {reason}")]
    NetworkCreationFailed {
        /// The network name.
        name: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Exec session could not be run.
    #[error("exec failed in container {container_id}: {reason}")]
    ExecFailed {
        /// The container ID.
        container_id: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Neither `mongosh` nor the legacy `mongo` shell exists in the container.
    #[error("no usable mongo shell found in container {container_id}")]
    NoUsableShell {
        /// The container ID.
        container_id: String,
    },

    /// The node did not answer the liveness ping yet.
    #[error("server {name} is not ready to accept connections")]
    NotReady {
        /// The node name.
        name: String,
    },

    /// An administrative shell command exited with a non-zero code.
    #[error("command `{command}` failed on {name} with exit code {exit_code}: {output}")]
    ShellCommandFailed {
        /// The node the command ran against.
        name: String,
        /// The evaluated command.
        command: String,
        /// The shell exit code.
        exit_code: i64,
        /// Cleaned shell output.
        output: String,
    },

    /// No container matched the deployment name.
    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    /// The `tomodo-type` label holds an unknown value.
    #[error("invalid deployment type: {0}")]
    InvalidDeploymentType(String),

    /// A container's labels do not follow the schema.
    #[error("invalid labels on container {container}: {reason}")]
    LabelDecode {
        /// The container name or ID.
        container: String,
        /// What was wrong with the labels.
        reason: String,
    },

    /// Labels decoded fine but do not describe a coherent topology.
    #[error("inconsistent topology for deployment {name}: {reason}")]
    InconsistentTopology {
        /// The deployment name.
        name: String,
        /// What did not add up.
        reason: String,
    },

    /// Docker API error.
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl OrchestratorError {
    /// Creates an invalid configuration error.
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// Creates a name collision error.
    pub fn name_collision(name: impl Into<String>) -> Self {
        Self::NameCollision(name.into())
    }

    /// Creates a ports taken error.
    pub fn ports_taken(ports: Vec<u16>) -> Self {
        Self::PortsTaken { ports }
    }

    /// Creates an image not found error.
    pub fn image_not_found(image: impl Into<String>) -> Self {
        Self::ImageNotFound(image.into())
    }

    /// Creates an image pull failed error.
    pub fn image_pull_failed(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImagePullFailed {
            image: image.into(),
            reason: reason.into(),
        }
    }

    /// Creates a container creation failed error.
    pub fn container_creation_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ContainerCreationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a container not found error.
    pub fn container_not_found(id: impl Into<String>) -> Self {
        Self::ContainerNotFound(id.into())
    }

    /// Creates a network creation failed error.
    pub fn network_creation_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NetworkCreationFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates an exec failed error.
    pub fn exec_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecFailed {
            container_id: id.into(),
            reason: reason.into(),
        }
    }

    /// Creates a no usable shell error.
    pub fn no_usable_shell(id: impl Into<String>) -> Self {
        Self::NoUsableShell {
            container_id: id.into(),
        }
    }

    /// Creates a not ready error.
    pub fn not_ready(name: impl Into<String>) -> Self {
        Self::NotReady { name: name.into() }
    }

    /// Creates a deployment not found error.
    pub fn deployment_not_found(name: impl Into<String>) -> Self {
        Self::DeploymentNotFound(name.into())
    }

    /// Creates an invalid deployment type error.
    pub fn invalid_deployment_type(value: impl Into<String>) -> Self {
        Self::InvalidDeploymentType(value.into())
    }

    /// Creates a label decode error.
    pub fn label_decode(container: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LabelDecode {
            container: container.into(),
            reason: reason.into(),
        }
    }

    /// Creates an inconsistent topology error.
    pub fn inconsistent_topology(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InconsistentTopology {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization(reason.into())
    }

    /// Returns true if a readiness or initiation step may succeed when retried.
    ///
    /// A missing shell never fixes itself, so it is excluded even though it
    /// surfaces from the same probe as [`OrchestratorError::NotReady`].
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotReady { .. }
                | Self::ShellCommandFailed { .. }
                | Self::ExecFailed { .. }
                | Self::DockerApi(_)
                | Self::Io(_)
        )
    }

    /// Returns true if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ContainerNotFound(_) | Self::DeploymentNotFound(_) | Self::ImageNotFound(_)
        )
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
