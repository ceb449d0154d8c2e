//! Node containers and their host-side storage.

pub mod factory;
pub mod storage;

pub use factory::{mongod_command, router_command, ContainerFactory, FactorySettings};
pub use storage::{keyfile_target, StorageLayout, CONTAINER_DATA_DIR};
