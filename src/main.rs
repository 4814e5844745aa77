//! Command-line front-end for the cluster provisioner.
//!
//! ```bash
//! nomad-lab cluster create dev --worker-count 2 --ports 8080
//! nomad-lab cluster stop dev
//! nomad-lab cluster start dev
//! nomad-lab cluster delete dev
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nomad_lab::{Cluster, ClusterConfig, DockerRuntime};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(
    name = "nomad-lab",
    about = "Local ephemeral Nomad clusters on a container engine",
    version
)]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage clusters.
    Cluster {
        #[command(subcommand)]
        command: ClusterCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ClusterCommand {
    /// Provision a new cluster.
    Create {
        /// Cluster name.
        name: String,

        /// Number of Nomad clients.
        #[arg(long, default_value_t = 1, value_name = "N")]
        worker_count: u32,

        /// Extra CA certificates to install into Nomad nodes.
        #[arg(long = "extra-certs", value_name = "PATH")]
        extra_certs: Vec<PathBuf>,

        /// Extra ports to expose on the host, forwarded to all Nomad clients.
        #[arg(long = "ports", value_name = "PORT")]
        ports: Vec<u16>,
    },

    /// Delete a cluster and its volumes.
    Delete {
        /// Cluster name.
        name: String,
    },

    /// Start a stopped cluster.
    Start {
        /// Cluster name.
        name: String,
    },

    /// Stop a running cluster.
    Stop {
        /// Cluster name.
        name: String,
    },
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    Ok(())
}

async fn run(args: CliArgs) -> Result<()> {
    let runtime = DockerRuntime::connect()
        .await
        .context("unable to connect to the container engine")?;

    let Command::Cluster { command } = args.command;

    match command {
        ClusterCommand::Create {
            name,
            worker_count,
            extra_certs,
            ports,
        } => {
            if Cluster::get(&runtime, &name).await?.is_some() {
                error!(cluster = %name, "cluster already exists");
                bail!("cluster {name} already exists");
            }

            let config = ClusterConfig {
                name,
                worker_count,
                extra_certs,
                ports_to_expose: ports,
            };

            let cluster = Cluster::create(&runtime, &config).await?;

            if let Some(vault) = &cluster.vault {
                info!(
                    unseal_key = %vault.unseal_key,
                    root_token = %vault.root_token,
                    "vault credentials (also recoverable via discovery)"
                );
            }
        }

        ClusterCommand::Delete { name } => {
            let Some(cluster) = Cluster::get(&runtime, &name).await? else {
                error!(cluster = %name, "cluster not found");
                bail!("cluster {name} not found");
            };

            cluster.delete(&runtime).await;
        }

        ClusterCommand::Start { name } => {
            let Some(cluster) = Cluster::get(&runtime, &name).await? else {
                error!(cluster = %name, "cluster not found");
                bail!("cluster {name} not found");
            };

            cluster.start(&runtime).await;
        }

        ClusterCommand::Stop { name } => {
            let Some(cluster) = Cluster::get(&runtime, &name).await? else {
                error!(cluster = %name, "cluster not found");
                bail!("cluster {name} not found");
            };

            cluster.stop(&runtime).await;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing()?;

    if let Err(e) = run(args).await {
        error!(error = %e, "command failed");
        return Err(e);
    }

    Ok(())
}
