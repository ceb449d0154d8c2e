//! Container runtime abstraction.
//!
//! [`ContainerRuntime`] is the seam between the engine and the container
//! daemon. [`DockerRuntime`] is the production implementation.

#[cfg(test)]
pub(crate) mod fake;

mod docker;
mod r#trait;

pub use docker::DockerRuntime;
pub use r#trait::{
    short_id, BindMount, ContainerRecord, ContainerRuntime, ContainerSpec, ExecOutput,
    LabelFilter, NetworkHandle,
};
