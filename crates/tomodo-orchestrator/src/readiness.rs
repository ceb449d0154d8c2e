//! Node readiness probing.

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};
use crate::retry::RetryPolicy;
use crate::shell::MongoShell;
use crate::topology::Node;

/// Administrative ping evaluated against a node.
pub const PING_COMMAND: &str = "db.runCommand({ping: 1}).ok";

/// Polls nodes until they answer an administrative ping.
pub struct ReadinessProbe {
    shell: Arc<MongoShell>,
    policy: RetryPolicy,
}

impl ReadinessProbe {
    /// Creates a probe retrying under `policy`.
    pub fn new(shell: Arc<MongoShell>, policy: RetryPolicy) -> Self {
        Self { shell, policy }
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Pings `node` once.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotReady`] unless the ping answers `1`,
    /// and [`OrchestratorError::NoUsableShell`] if the container has no shell.
    pub async fn ping(&self, node: &Node) -> Result<()> {
        let output = self.shell.eval(node, PING_COMMAND).await?;
        if output.success() && output.stdout == "1" {
            Ok(())
        } else {
            debug!(node = %node.name, exit_code = output.exit_code, "Ping not answered");
            Err(OrchestratorError::not_ready(&node.name))
        }
    }

    /// Pings `node` until it answers or the policy is exhausted.
    pub async fn wait_for_ready(&self, node: &Node) -> Result<()> {
        let what = format!("ping {}", node.name);
        self.policy
            .run(&what, || self.ping(node), OrchestratorError::is_retryable)
            .await?;
        info!(node = %node.name, port = node.port, "Server ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::FakeRuntime;
    use crate::runtime::ContainerSpec;
    use std::collections::HashMap;
    use std::time::Duration;

    fn setup(attempts: usize) -> (Arc<FakeRuntime>, ReadinessProbe, Node) {
        let runtime = Arc::new(FakeRuntime::new());
        let id = runtime.insert_container(
            ContainerSpec {
                name: "rs0-1".to_string(),
                image: "mongo:latest".to_string(),
                hostname: "rs0-1".to_string(),
                command: Vec::new(),
                env: Vec::new(),
                labels: HashMap::new(),
                port: 27017,
                mounts: Vec::new(),
                network: "mongo_network".to_string(),
                aliases: Vec::new(),
            },
            true,
        );
        let mut node = Node::builder("rs0-1", 27017).build();
        node.container_id = Some(id);

        let shell = Arc::new(MongoShell::new(runtime.clone(), None));
        let probe = ReadinessProbe::new(shell, RetryPolicy::fixed(attempts, Duration::ZERO));
        (runtime, probe, node)
    }

    fn pings(runtime: &FakeRuntime) -> usize {
        runtime.with_state(|s| s.evals.iter().filter(|(_, js)| js == PING_COMMAND).count())
    }

    #[tokio::test]
    async fn test_ready_after_retries() {
        let (runtime, probe, node) = setup(5);
        runtime.with_state(|s| {
            s.unready.insert("rs0-1".to_string(), 3);
        });

        probe.wait_for_ready(&node).await.unwrap();
        assert_eq!(pings(&runtime), 4);
    }

    #[tokio::test]
    async fn test_exhaustion_is_not_ready() {
        let (runtime, probe, node) = setup(3);
        runtime.with_state(|s| {
            s.unready.insert("rs0-1".to_string(), 10);
        });

        let result = probe.wait_for_ready(&node).await;
        assert!(matches!(result, Err(OrchestratorError::NotReady { .. })));
        assert_eq!(pings(&runtime), 3);
    }

    #[tokio::test]
    async fn test_missing_shell_is_not_retried() {
        let (runtime, probe, node) = setup(5);
        runtime.with_state(|s| s.shells.clear());

        let result = probe.wait_for_ready(&node).await;
        assert!(matches!(result, Err(OrchestratorError::NoUsableShell { .. })));
        // One `which` per candidate shell, no retries.
        assert_eq!(runtime.with_state(|s| s.execs.len()), 2);
    }
}
