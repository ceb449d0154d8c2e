//! tomodo - local MongoDB deployments on Docker.
//!
//! Provisions standalone nodes, replica sets and sharded clusters as
//! containers, and describes, starts, stops or removes them later. Nothing
//! is stored outside Docker: every command rediscovers deployments from
//! container labels.
//!
//! # Usage
//!
//! ```bash
//! # Three-member replica set on ports 27017-27019
//! tomodo provision --replica-set --name rs0
//!
//! # Two shards of three members, with authentication
//! tomodo provision --sharded --shards 2 --username admin --password secret
//!
//! # Inspect and tear down
//! tomodo describe rs0 --output yaml
//! tomodo list
//! tomodo remove --all
//! ```

mod config;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use config::TomodoConfig;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tomodo_orchestrator::{
    deployments_markdown_table, ContainerRuntime, Deployment, DockerRuntime, Lifecycle,
    ProvisionSpec, Provisioner, Reader,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI arguments for tomodo.
#[derive(Parser, Debug)]
#[command(
    name = "tomodo",
    about = "Provision, describe and tear down local MongoDB deployments",
    version,
    author
)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON log output.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print the default configuration and exit.
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision a new deployment.
    Provision(ProvisionArgs),

    /// Describe one deployment, or all of them.
    Describe {
        /// Deployment name.
        name: Option<String>,

        /// Leave out stopped containers.
        #[arg(long)]
        exclude_stopped: bool,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// List all deployments.
    List {
        /// Leave out stopped containers.
        #[arg(long)]
        exclude_stopped: bool,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Start a stopped deployment.
    Start {
        /// Deployment name.
        name: String,
    },

    /// Stop a deployment, or all of them.
    Stop(TargetArgs),

    /// Remove a deployment and its data, or all of them.
    Remove(TargetArgs),
}

/// Arguments of `provision`.
#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Provision a standalone mongod.
    #[arg(long, conflicts_with_all = ["replica_set", "sharded"])]
    standalone: bool,

    /// Provision a replica set.
    #[arg(long, conflicts_with = "sharded")]
    replica_set: bool,

    /// Provision a sharded cluster.
    #[arg(long)]
    sharded: bool,

    /// Deployment name. Generated when omitted.
    #[arg(short, long)]
    name: Option<String>,

    /// Members per replica set (and per shard).
    #[arg(long, default_value_t = 3)]
    replicas: u16,

    /// Number of shards.
    #[arg(long, default_value_t = 2)]
    shards: u16,

    /// Make the last member of each replica set an arbiter.
    #[arg(long)]
    arbiter: bool,

    /// First port of the deployment.
    #[arg(short, long, default_value_t = 27017)]
    port: u16,

    /// Number of config servers.
    #[arg(long, default_value_t = 1)]
    config_servers: u16,

    /// Number of mongos routers.
    #[arg(long, default_value_t = 1)]
    mongos: u16,

    /// Root user name.
    #[arg(long, requires = "password")]
    username: Option<String>,

    /// Root password.
    #[arg(long, requires = "username")]
    password: Option<String>,

    /// Image repository.
    #[arg(long)]
    image_repo: Option<String>,

    /// Image tag.
    #[arg(long)]
    image_tag: Option<String>,

    /// Docker network name.
    #[arg(long)]
    network_name: Option<String>,

    /// Do not keep data on the host.
    #[arg(long)]
    ephemeral: bool,
}

/// Target of `stop` and `remove`.
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Deployment name.
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    name: Option<String>,

    /// Act on every deployment.
    #[arg(long)]
    all: bool,
}

/// Output format of `describe` and `list`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Markdown table.
    Table,
    /// Pretty-printed JSON.
    Json,
    /// YAML.
    Yaml,
}

impl ProvisionArgs {
    fn to_spec(&self, config: &TomodoConfig) -> ProvisionSpec {
        ProvisionSpec {
            name: self.name.clone(),
            standalone: self.standalone,
            replica_set: self.replica_set,
            sharded: self.sharded,
            replicas: self.replicas,
            shards: self.shards,
            arbiter: self.arbiter,
            port: self.port,
            config_servers: self.config_servers,
            mongos: self.mongos,
            username: self.username.clone(),
            password: self.password.clone(),
            image_repo: config.docker.image_repo.clone(),
            image_tag: config.docker.image_tag.clone(),
            network_name: config.docker.network_name.clone(),
            ephemeral: self.ephemeral,
        }
    }
}

/// Renders one deployment.
fn render_one(deployment: &Deployment, output: OutputFormat) -> Result<String> {
    Ok(match output {
        OutputFormat::Table => deployment.as_markdown_table(),
        OutputFormat::Json => deployment.to_json(true)?,
        OutputFormat::Yaml => deployment.to_yaml(true)?,
    })
}

/// Renders a set of deployments.
fn render_all(
    deployments: &BTreeMap<String, Deployment>,
    output: OutputFormat,
    detailed: bool,
) -> Result<String> {
    let as_map = || {
        deployments
            .iter()
            .map(|(name, d)| (name.clone(), d.as_dict(detailed)))
            .collect::<Map<String, Value>>()
    };
    Ok(match output {
        OutputFormat::Table if detailed => deployments
            .values()
            .map(Deployment::as_markdown_table)
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Table => deployments_markdown_table(deployments),
        OutputFormat::Json => serde_json::to_string_pretty(&as_map())?,
        OutputFormat::Yaml => serde_yaml::to_string(&as_map())?,
    })
}

async fn run(command: Command, config: &TomodoConfig) -> Result<()> {
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(
        DockerRuntime::connect()
            .await
            .context("Failed to connect to Docker")?,
    );
    let storage = config.storage()?;
    let reader = Reader::new(runtime.clone());
    let lifecycle = Lifecycle::new(runtime.clone(), storage.clone());

    match command {
        Command::Provision(args) => {
            let spec = args.to_spec(config);
            let provisioner = Provisioner::new(runtime, storage)
                .with_readiness(config.readiness.clone());
            let deployment = provisioner
                .provision(&spec)
                .await
                .context("Provisioning failed")?;
            info!(
                deployment = %deployment.name(),
                ports = %deployment.port_range(),
                "Deployment ready"
            );
            println!("{}", deployment.as_markdown_table());
        }
        Command::Describe {
            name: Some(name),
            exclude_stopped,
            output,
        } => {
            let deployment = reader.get_by_name(&name, !exclude_stopped).await?;
            println!("{}", render_one(&deployment, output)?);
        }
        Command::Describe {
            name: None,
            exclude_stopped,
            output,
        } => {
            let deployments = reader.get_all(!exclude_stopped).await?;
            println!("{}", render_all(&deployments, output, true)?);
        }
        Command::List {
            exclude_stopped,
            output,
        } => {
            let deployments = reader.get_all(!exclude_stopped).await?;
            println!("{}", render_all(&deployments, output, false)?);
        }
        Command::Start { name } => {
            let deployment = lifecycle.start(&name).await?;
            println!("{}", deployment.as_markdown_table());
        }
        Command::Stop(target) => match target.name {
            Some(name) => {
                let stopped = lifecycle.stop(&name).await?;
                println!("Stopped {stopped} container(s) of {name}");
            }
            None => {
                for (name, stopped) in lifecycle.stop_all().await? {
                    println!("Stopped {stopped} container(s) of {name}");
                }
            }
        },
        Command::Remove(target) => match target.name {
            Some(name) => {
                let removed = lifecycle.remove(&name).await?;
                println!("Removed {removed} container(s) of {name}");
            }
            None => {
                for (name, removed) in lifecycle.remove_all().await? {
                    println!("Removed {removed} container(s) of {name}");
                }
            }
        },
    }

    Ok(())
}

/// Initialize tracing/logging.
fn init_tracing(config: &config::LoggingConfig, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    let format = if json_logs || config.format == "json" {
        "json"
    } else {
        &config.format
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    if args.print_config {
        let config = TomodoConfig::default();
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut config = if let Some(ref config_path) = args.config {
        TomodoConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        TomodoConfig::default()
    };

    config.merge_cli_args(&args);
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging, args.json_logs)?;

    let Some(command) = args.command else {
        CliArgs::command().print_help()?;
        return Ok(());
    };

    if let Err(e) = run(command, &config).await {
        error!(error = %e, "Command failed");
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args_parsing() {
        let args = CliArgs::parse_from(["tomodo"]);
        assert!(args.config.is_none());
        assert!(args.command.is_none());
        assert!(!args.json_logs);
        assert!(!args.print_config);
    }

    #[test]
    fn test_provision_args() {
        let args = CliArgs::parse_from([
            "tomodo",
            "provision",
            "--sharded",
            "--name",
            "lab",
            "--shards",
            "3",
            "--replicas",
            "2",
            "--arbiter",
            "--port",
            "30000",
            "--username",
            "admin",
            "--password",
            "secret",
        ]);

        let Some(Command::Provision(provision)) = args.command else {
            panic!("expected provision");
        };
        let spec = provision.to_spec(&TomodoConfig::default());
        assert!(spec.sharded);
        assert_eq!(spec.name.as_deref(), Some("lab"));
        assert_eq!(spec.shards, 3);
        assert_eq!(spec.replicas, 2);
        assert!(spec.arbiter);
        assert_eq!(spec.port, 30000);
        assert_eq!(spec.config_servers, 1);
        assert_eq!(spec.mongos, 1);
        assert_eq!(spec.image(), "mongo:latest");
        assert!(spec.credentials().is_some());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_conflicting_topologies_rejected() {
        let result =
            CliArgs::try_parse_from(["tomodo", "provision", "--standalone", "--replica-set"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_username_requires_password() {
        let result = CliArgs::try_parse_from(["tomodo", "provision", "--username", "admin"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_describe_and_list() {
        let args = CliArgs::parse_from(["tomodo", "describe", "rs0", "--output", "yaml"]);
        match args.command {
            Some(Command::Describe {
                name,
                exclude_stopped,
                output,
            }) => {
                assert_eq!(name.as_deref(), Some("rs0"));
                assert!(!exclude_stopped);
                assert_eq!(output, OutputFormat::Yaml);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let args = CliArgs::parse_from(["tomodo", "list", "--exclude-stopped"]);
        assert!(matches!(
            args.command,
            Some(Command::List {
                exclude_stopped: true,
                output: OutputFormat::Table
            })
        ));
    }

    #[test]
    fn test_stop_and_remove_targets() {
        let args = CliArgs::parse_from(["tomodo", "stop", "--all"]);
        match args.command {
            Some(Command::Stop(target)) => {
                assert!(target.all);
                assert!(target.name.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let args = CliArgs::parse_from(["tomodo", "remove", "rs0"]);
        match args.command {
            Some(Command::Remove(target)) => assert_eq!(target.name.as_deref(), Some("rs0")),
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(CliArgs::try_parse_from(["tomodo", "remove"]).is_err());
        assert!(CliArgs::try_parse_from(["tomodo", "stop", "rs0", "--all"]).is_err());
    }

    #[test]
    fn test_render_empty() {
        let deployments = BTreeMap::new();
        let json = render_all(&deployments, OutputFormat::Json, false).unwrap();
        assert_eq!(json, "{}");
    }
}
