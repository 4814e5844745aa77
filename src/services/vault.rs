//! Vault factory and bootstrap protocol.
//!
//! Vault is the only service that needs post-start interaction: after the
//! node is running, the bootstrap waits for readiness by scanning the log
//! stream, runs `operator init` inside the node, and captures the unseal key
//! and root token from the JSON response. The credentials feed every Nomad
//! factory invocation that follows.

use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::error::{RuntimeError, VaultError};
use crate::labels::{self, NodeType};
use crate::runtime::{ContainerRuntime, Node, NodeConfig, NodeFile};

const IMAGE: &str = "vault:1.13.3";

const CONFIG_PATH: &str = "/vault/config/vault.hcl";

/// Log line Vault emits once its core is ready for `operator init`.
const READY_LOG_LINE: &str = "core: Initializing version history cache for core";

/// Deadline for the readiness log scan.
const READY_TIMEOUT: Duration = Duration::from_secs(30);

const INIT_CMD: [&str; 7] = [
    "vault",
    "operator",
    "init",
    "-key-shares=1",
    "-key-threshold=1",
    "-format=json",
    "-address=http://127.0.0.1:8200",
];

/// Vault factory input.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Owning cluster name.
    pub cluster_name: String,

    /// Cluster network to attach to.
    pub network: String,

    /// Consul storage backend address (`{consul-name}:8500`).
    pub consul_addr: String,

    /// Instance id within the cluster.
    pub id: u32,
}

/// A Vault node together with its captured credentials.
///
/// The credentials are only present right after a successful bootstrap;
/// rediscovery restores them from the credentials volume labels.
#[derive(Debug, Clone)]
pub struct VaultNode {
    /// The underlying node.
    pub node: Node,

    /// First unseal key from `operator init`.
    pub unseal_key: String,

    /// Root token from `operator init`.
    pub root_token: String,
}

#[derive(Debug, Deserialize)]
struct InitResponse {
    unseal_keys_b64: Vec<String>,
    root_token: String,
}

/// Returns the deterministic node name for a Vault instance.
pub fn node_name(cluster_name: &str, id: u32) -> String {
    format!("{cluster_name}-vault-{id}")
}

fn render_config(cluster_name: &str, consul_addr: &str) -> String {
    format!(
        r#"ui            = true
log_level     = "trace"
cluster_addr  = "http://127.0.0.1:8201"
api_addr      = "http://127.0.0.1:8200"
cluster_name  = "{cluster_name}"

storage "consul" {{
  address = "{consul_addr}"
  path    = "vault/"
}}

listener "tcp" {{
  address         = "0.0.0.0:8200"
  cluster_address = "0.0.0.0:8201"
  tls_disable     = 1
}}

max_lease_ttl     = "9000h"
default_lease_ttl = "10h"
"#
    )
}

fn node_config(config: &VaultConfig) -> NodeConfig {
    NodeConfig::builder(IMAGE, node_name(&config.cluster_name, config.id), &config.network)
        .command(["server"])
        .privileged()
        .file(NodeFile::new(
            render_config(&config.cluster_name, &config.consul_addr),
            CONFIG_PATH,
            0o644,
        ))
        .labels(labels::node_labels(&config.cluster_name, NodeType::Vault))
        .build()
}

/// Runs a Vault node and drives the bootstrap protocol against it.
pub async fn provision(
    runtime: &dyn ContainerRuntime,
    config: &VaultConfig,
) -> Result<VaultNode, VaultError> {
    let node = runtime.run_node(node_config(config)).await?;

    wait_until_ready(runtime, &node).await?;

    let output = runtime.exec(&node, &INIT_CMD).await?;
    let (unseal_key, root_token) = parse_init_output(&output)?;

    debug!(name = %node.name, "vault initialized");

    Ok(VaultNode {
        node,
        unseal_key,
        root_token,
    })
}

/// Scans the follow-stream of the node's logs for the readiness line, under
/// a fixed deadline.
async fn wait_until_ready(
    runtime: &dyn ContainerRuntime,
    node: &Node,
) -> Result<(), VaultError> {
    let mut logs = runtime.logs(&node.name, true).await?;

    let scan = async {
        while let Some(chunk) = logs.next().await {
            if chunk?.contains(READY_LOG_LINE) {
                return Ok(true);
            }
        }
        Ok::<bool, RuntimeError>(false)
    };

    match tokio::time::timeout(READY_TIMEOUT, scan).await {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) | Err(_) => Err(VaultError::NotReady {
            timeout_secs: READY_TIMEOUT.as_secs(),
        }),
        Ok(Err(e)) => Err(e.into()),
    }
}

fn parse_init_output(output: &str) -> Result<(String, String), VaultError> {
    let response: InitResponse =
        serde_json::from_str(output.trim()).map_err(|e| VaultError::InitParse {
            output: output.to_string(),
            reason: e.to_string(),
        })?;

    let unseal_key = response
        .unseal_keys_b64
        .into_iter()
        .next()
        .ok_or_else(|| VaultError::InitParse {
            output: output.to_string(),
            reason: "response contains no unseal keys".to_string(),
        })?;

    Ok((unseal_key, response.root_token))
}
