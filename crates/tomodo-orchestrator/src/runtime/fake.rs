//! In-memory runtime for tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::error::{OrchestratorError, Result};
use crate::runtime::r#trait::{
    ContainerRecord, ContainerRuntime, ContainerSpec, ExecOutput, LabelFilter, NetworkHandle,
};

/// A container held by [`FakeRuntime`].
#[derive(Debug, Clone)]
pub(crate) struct FakeContainer {
    pub id: String,
    pub spec: ContainerSpec,
    pub running: bool,
}

/// Mutable state behind [`FakeRuntime`].
#[derive(Debug, Default)]
pub(crate) struct FakeState {
    /// Images present locally.
    pub images: HashSet<String>,
    /// Images the registry can serve.
    pub registry: HashSet<String>,
    pub pulls: Vec<String>,
    pub networks: Vec<NetworkHandle>,
    pub containers: Vec<FakeContainer>,
    /// `(container name, script)` for every shell `--eval`.
    pub evals: Vec<(String, String)>,
    /// Full command lines of every exec.
    pub execs: Vec<Vec<String>>,
    pub shells: HashSet<String>,
    /// Remaining failed pings per container name.
    pub unready: HashMap<String, usize>,
    /// Remaining failures for scripts containing the key.
    pub failing_scripts: HashMap<String, usize>,
    pub mongo_version: Option<String>,
    next_id: u64,
}

/// A [`ContainerRuntime`] that keeps everything in memory.
#[derive(Debug, Default)]
pub(crate) struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    /// A runtime with `mongo:latest` local, `mongosh` installed and
    /// version 7.0.2 reported by every container.
    pub fn new() -> Self {
        let runtime = Self::default();
        runtime.with_state(|s| {
            s.images.insert("mongo:latest".to_string());
            s.shells.insert("mongosh".to_string());
            s.mongo_version = Some("7.0.2".to_string());
        });
        runtime
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn container_names(&self) -> Vec<String> {
        self.with_state(|s| s.containers.iter().map(|c| c.spec.name.clone()).collect())
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.with_state(|s| s.containers.iter().find(|c| c.spec.name == name).cloned())
    }

    /// Scripts evaluated so far, excluding readiness pings.
    pub fn scripts(&self) -> Vec<(String, String)> {
        self.with_state(|s| {
            s.evals
                .iter()
                .filter(|(_, js)| !js.contains("ping"))
                .cloned()
                .collect()
        })
    }

    /// Adds a container as if another tool had created it.
    pub fn insert_container(&self, spec: ContainerSpec, running: bool) -> String {
        self.with_state(|s| {
            let id = s.allocate_id();
            s.containers.push(FakeContainer {
                id: id.clone(),
                spec,
                running,
            });
            id
        })
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl FakeState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:012x}{:052x}", self.next_id, 0)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut FakeContainer> {
        self.containers.iter_mut().find(|c| c.id.starts_with(id))
    }

    fn take_failure(map: &mut HashMap<String, usize>, key: &str) -> bool {
        match map.get_mut(key) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

fn output(stdout: &str, exit_code: i64) -> ExecOutput {
    ExecOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code,
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.with_state(|s| s.images.contains(image)))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.with_state(|s| {
            s.pulls.push(image.to_string());
            if s.registry.contains(image) {
                s.images.insert(image.to_string());
                Ok(())
            } else {
                Err(OrchestratorError::image_not_found(image))
            }
        })
    }

    async fn list_networks(&self, name: &str) -> Result<Vec<NetworkHandle>> {
        Ok(self.with_state(|s| {
            s.networks
                .iter()
                .filter(|n| n.name == name)
                .cloned()
                .collect()
        }))
    }

    async fn create_network(&self, name: &str) -> Result<NetworkHandle> {
        Ok(self.with_state(|s| {
            let handle = NetworkHandle {
                id: format!("net{:061x}", s.networks.len() + 1),
                name: name.to_string(),
            };
            s.networks.push(handle.clone());
            handle
        }))
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.with_state(|s| {
            if !s.images.contains(&spec.image) {
                return Err(OrchestratorError::image_not_found(&spec.image));
            }
            if s.containers.iter().any(|c| c.spec.name == spec.name) {
                return Err(OrchestratorError::container_creation_failed(
                    &spec.name,
                    "Conflict. The container name is already in use",
                ));
            }
            let id = s.allocate_id();
            s.containers.push(FakeContainer {
                id: id.clone(),
                spec: spec.clone(),
                running: true,
            });
            Ok(id)
        })
    }

    async fn list_containers(
        &self,
        filter: &LabelFilter,
        include_stopped: bool,
    ) -> Result<Vec<ContainerRecord>> {
        Ok(self.with_state(|s| {
            s.containers
                .iter()
                .filter(|c| filter.matches(&c.spec.labels))
                .filter(|c| include_stopped || c.running)
                .map(|c| ContainerRecord {
                    id: c.id.clone(),
                    name: c.spec.name.clone(),
                    labels: c.spec.labels.clone(),
                    status: if c.running { "running" } else { "exited" }.to_string(),
                    running: c.running,
                    image: Some(c.spec.image.clone()),
                    env: s
                        .mongo_version
                        .iter()
                        .map(|v| format!("MONGO_VERSION={v}"))
                        .collect(),
                })
                .collect()
        }))
    }

    async fn exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecOutput> {
        self.with_state(|s| {
            s.execs.push(cmd.to_vec());
            let container = s
                .find_mut(container_id)
                .ok_or_else(|| OrchestratorError::container_not_found(container_id))?;
            if !container.running {
                return Err(OrchestratorError::exec_failed(
                    container_id,
                    "container is not running",
                ));
            }
            let name = container.spec.name.clone();

            if cmd.first().map(String::as_str) == Some("which") {
                let shell = cmd.get(1).cloned().unwrap_or_default();
                return Ok(if s.shells.contains(&shell) {
                    output(&format!("/usr/bin/{shell}\n"), 0)
                } else {
                    output("", 1)
                });
            }

            let script = cmd
                .iter()
                .position(|arg| arg == "--eval")
                .and_then(|i| cmd.get(i + 1))
                .cloned()
                .unwrap_or_default();
            s.evals.push((name.clone(), script.clone()));

            if script.contains("ping") {
                return Ok(if FakeState::take_failure(&mut s.unready, &name) {
                    output("", 1)
                } else {
                    output("2024-01-01T00:00:00.000+0000 I NETWORK  [js] connected\n1\n", 0)
                });
            }

            let failing = s
                .failing_scripts
                .keys()
                .find(|key| script.contains(key.as_str()))
                .cloned();
            if let Some(key) = failing {
                if FakeState::take_failure(&mut s.failing_scripts, &key) {
                    return Ok(output("MongoServerError: not yet", 1));
                }
            }
            Ok(output("{ ok: 1 }\n", 0))
        })
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.with_state(|s| {
            let container = s
                .find_mut(container_id)
                .ok_or_else(|| OrchestratorError::container_not_found(container_id))?;
            container.running = true;
            Ok(())
        })
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        self.with_state(|s| {
            let container = s
                .find_mut(container_id)
                .ok_or_else(|| OrchestratorError::container_not_found(container_id))?;
            container.running = false;
            Ok(())
        })
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        self.with_state(|s| {
            let before = s.containers.len();
            s.containers.retain(|c| !c.id.starts_with(container_id));
            if s.containers.len() == before {
                return Err(OrchestratorError::container_not_found(container_id));
            }
            Ok(())
        })
    }
}
