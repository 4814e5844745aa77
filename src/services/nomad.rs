//! Nomad server and client factories.
//!
//! Both roles deliver their configuration through the `NOMAD_LOCAL_CONFIG`
//! environment variable understood by the images' entrypoint. Clients
//! advertise themselves by container name so peers and the servers reach
//! them across restarts.

use std::path::PathBuf;

use tracing::debug;

use crate::error::Result;
use crate::labels::{self, NodeType, VolumeType};
use crate::runtime::{ContainerRuntime, Node, NodeConfig, VolumeSpec};

const SERVER_IMAGE: &str = "multani/nomad:1.6.3";
const CLIENT_IMAGE: &str = "mahammad/nomad:1.6.3";

const DATA_DIR: &str = "/nomad/data";

const LOCAL_CONFIG_ENV: &str = "NOMAD_LOCAL_CONFIG";

/// Nomad factory input, shared by server and client roles.
#[derive(Debug, Clone)]
pub struct NomadConfig {
    /// Owning cluster name.
    pub cluster_name: String,

    /// Cluster network to attach to.
    pub network: String,

    /// Consul address (`{consul-name}:8500`).
    pub consul_addr: String,

    /// Vault address (`http://{vault-name}:8200`).
    pub vault_addr: String,

    /// Vault root token captured during bootstrap.
    pub vault_token: String,

    /// Instance id within the cluster.
    pub id: u32,

    /// Host paths of extra CA certificates to install in the node.
    pub extra_certs: Vec<PathBuf>,
}

/// Returns the deterministic node name for a Nomad server.
pub fn server_node_name(cluster_name: &str, id: u32) -> String {
    format!("{cluster_name}-nomad-server-{id}")
}

/// Returns the deterministic node name for a Nomad client.
pub fn client_node_name(cluster_name: &str, id: u32) -> String {
    format!("{cluster_name}-nomad-client-{id}")
}

/// Returns the name of a Nomad server data volume.
pub fn server_volume_name(cluster_name: &str, id: u32) -> String {
    format!("{cluster_name}-nomad-server-vol-{id}")
}

/// Returns the name of a Nomad client data volume.
pub fn client_volume_name(cluster_name: &str, id: u32) -> String {
    format!("{cluster_name}-nomad-client-vol-{id}")
}

fn render_server_config(config: &NomadConfig) -> String {
    format!(
        r#"server {{
  enabled          = true
  bootstrap_expect = 1
}}

data_dir  = "{DATA_DIR}/"
bind_addr = "0.0.0.0"

consul {{
  address = "{consul}"
}}

vault {{
  enabled = true
  address = "{vault}"
  token   = "{token}"
}}
"#,
        consul = config.consul_addr,
        vault = config.vault_addr,
        token = config.vault_token,
    )
}

fn render_client_config(config: &NomadConfig, node_name: &str) -> String {
    format!(
        r#"client {{
  enabled = true
}}

data_dir  = "{DATA_DIR}/"
bind_addr = "0.0.0.0"

advertise {{
  http = "{node_name}"
  rpc  = "{node_name}"
  serf = "{node_name}"
}}

consul {{
  address = "{consul}"
}}

vault {{
  enabled = true
  address = "{vault}"
  token   = "{token}"
}}
"#,
        consul = config.consul_addr,
        vault = config.vault_addr,
        token = config.vault_token,
    )
}

fn server_node_config(config: &NomadConfig) -> NodeConfig {
    NodeConfig::builder(
        SERVER_IMAGE,
        server_node_name(&config.cluster_name, config.id),
        &config.network,
    )
    .command(["agent"])
    .env(LOCAL_CONFIG_ENV, render_server_config(config))
    .volume(VolumeSpec::named(
        server_volume_name(&config.cluster_name, config.id),
        DATA_DIR,
    ))
    .extra_certs(config.extra_certs.iter().cloned())
    .labels(labels::node_labels(&config.cluster_name, NodeType::NomadServer))
    .build()
}

fn client_node_config(config: &NomadConfig) -> NodeConfig {
    let name = client_node_name(&config.cluster_name, config.id);
    let local_config = render_client_config(config, &name);

    NodeConfig::builder(CLIENT_IMAGE, name, &config.network)
        .command(["agent"])
        .env(LOCAL_CONFIG_ENV, local_config)
        .privileged()
        .tmpfs("/var/run")
        .tmpfs("/run")
        .volume(VolumeSpec::named(
            client_volume_name(&config.cluster_name, config.id),
            DATA_DIR,
        ))
        .extra_certs(config.extra_certs.iter().cloned())
        .labels(labels::node_labels(&config.cluster_name, NodeType::NomadClient))
        .build()
}

/// Creates the server data volume and runs a Nomad server node.
pub async fn provision_server(
    runtime: &dyn ContainerRuntime,
    config: &NomadConfig,
) -> Result<Node> {
    let name = server_node_name(&config.cluster_name, config.id);

    runtime
        .create_volume(
            &server_volume_name(&config.cluster_name, config.id),
            &labels::volume_labels(&config.cluster_name, VolumeType::NomadServer, &name),
        )
        .await?;

    let node = runtime.run_node(server_node_config(config)).await?;

    debug!(name = %node.name, "nomad server running");

    Ok(node)
}

/// Creates the client data volume and runs a Nomad client node.
pub async fn provision_client(
    runtime: &dyn ContainerRuntime,
    config: &NomadConfig,
) -> Result<Node> {
    let name = client_node_name(&config.cluster_name, config.id);

    runtime
        .create_volume(
            &client_volume_name(&config.cluster_name, config.id),
            &labels::volume_labels(&config.cluster_name, VolumeType::NomadClient, &name),
        )
        .await?;

    let node = runtime.run_node(client_node_config(config)).await?;

    debug!(name = %node.name, "nomad client running");

    Ok(node)
}
