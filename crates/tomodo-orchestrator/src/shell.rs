//! Mongo shell execution inside node containers.
//!
//! Commands run through whichever shell the image ships: `mongosh` when
//! present, otherwise the legacy `mongo`. Server log lines that leak into
//! the shell's stdout are stripped before the output is interpreted.

use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::config::Credentials;
use crate::error::{OrchestratorError, Result};
use crate::runtime::{ContainerRuntime, ExecOutput};
use crate::topology::Node;

/// Shells tried in order.
pub const SHELLS: [&str; 2] = ["mongosh", "mongo"];

fn log_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}\+\d{4}\s+[A-Z]\s+.*$")
            .expect("valid regex")
    })
}

/// Removes server log lines and surrounding whitespace from shell output.
pub fn clean_output(output: &str) -> String {
    let re = log_line_regex();
    output
        .lines()
        .filter(|line| !re.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Runs JavaScript against nodes through the container's mongo shell.
pub struct MongoShell {
    runtime: Arc<dyn ContainerRuntime>,
    credentials: Option<Credentials>,
}

impl MongoShell {
    /// Creates a shell runner. Credentials are passed to every node that
    /// accepts them.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, credentials: Option<Credentials>) -> Self {
        Self {
            runtime,
            credentials,
        }
    }

    /// Finds the shell binary available in a container.
    pub async fn detect(&self, container_id: &str) -> Result<&'static str> {
        for shell in SHELLS {
            let probe = ["which".to_string(), shell.to_string()];
            let output = self.runtime.exec(container_id, &probe).await?;
            if output.success() && !output.stdout.trim().is_empty() {
                return Ok(shell);
            }
            debug!(container = %container_id, shell, "Shell not available");
        }
        Err(OrchestratorError::no_usable_shell(container_id))
    }

    /// Builds the argument vector that evaluates `js` against `node`.
    pub fn command_line(&self, shell: &str, node: &Node, js: &str) -> Vec<String> {
        let mut command = vec![
            shell.to_string(),
            node.uri(),
            "--quiet".to_string(),
            "--norc".to_string(),
            "--eval".to_string(),
            js.to_string(),
        ];
        if let Some(credentials) = &self.credentials {
            if !node.role.skips_shell_auth() {
                command.extend([
                    "--username".to_string(),
                    credentials.username.clone(),
                    "--password".to_string(),
                    credentials.password.clone(),
                ]);
            }
        }
        command
    }

    /// Evaluates `js` on `node` and returns the raw result with cleaned
    /// stdout, whatever the exit code.
    pub async fn eval(&self, node: &Node, js: &str) -> Result<ExecOutput> {
        let container_id = node
            .container_id
            .as_deref()
            .ok_or_else(|| OrchestratorError::container_not_found(&node.name))?;
        let shell = self.detect(container_id).await?;
        let command = self.command_line(shell, node, js);

        debug!(container = %node.name, shell, js, "Evaluating");
        let mut output = self.runtime.exec(container_id, &command).await?;
        output.stdout = clean_output(&output.stdout);
        Ok(output)
    }

    /// Evaluates an administrative command on `node`.
    ///
    /// # Errors
    ///
    /// A non-zero exit code is [`OrchestratorError::ShellCommandFailed`].
    pub async fn run_command(&self, node: &Node, js: &str) -> Result<String> {
        let output = self.eval(node, js).await?;
        if !output.success() {
            return Err(OrchestratorError::ShellCommandFailed {
                name: node.name.clone(),
                command: js.to_string(),
                exit_code: output.exit_code,
                output: clean_output(&output.combined_output()),
            });
        }
        Ok(output.stdout)
    }
}
