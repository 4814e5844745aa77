//! Load balancer factory.
//!
//! A single reverse-proxy container publishes cluster endpoints on the host
//! and forwards to upstream containers by name. The proxy image watches a
//! YAML values file; the factory marshals it from the declared port mappings
//! and injects it before start.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::labels::{self, NodeType};
use crate::runtime::{ContainerRuntime, Node, NodeConfig, NodeFile, PortPublication, Protocol};

const IMAGE: &str = "ghcr.io/k3d-io/k3d-proxy:latest";

const CONFIG_PATH: &str = "/etc/confd/values.yaml";

const WORKER_CONNECTIONS_PER_PORT: u32 = 1024;

const DEFAULT_PROXY_TIMEOUT: u32 = 300;

/// One forwarded port: traffic arriving on the container port is balanced
/// over the named upstream servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// Port the proxy listens on (and publishes to the host).
    pub container_port: u16,

    /// Protocol.
    pub protocol: Protocol,

    /// Upstream container names.
    pub upstreams: Vec<String>,
}

impl PortMapping {
    /// Creates a TCP port mapping.
    pub fn tcp<I, S>(container_port: u16, upstreams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            container_port,
            protocol: Protocol::Tcp,
            upstreams: upstreams.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the proxy config key for this mapping, e.g. `4646/tcp`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// Load balancer factory input.
#[derive(Debug, Clone)]
pub struct LoadBalancerConfig {
    /// Owning cluster name.
    pub cluster_name: String,

    /// Cluster network to attach to.
    pub network: String,

    /// Ports to forward, in declaration order.
    pub port_mappings: Vec<PortMapping>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProxyValues {
    ports: BTreeMap<String, Vec<String>>,
    settings: ProxySettings,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProxySettings {
    #[serde(rename = "workerConnections")]
    worker_connections: u32,
    #[serde(rename = "defaultProxyTimeout")]
    default_proxy_timeout: u32,
}

/// Returns the deterministic node name for the load balancer.
pub fn node_name(cluster_name: &str) -> String {
    format!("{cluster_name}-default-lb")
}

fn render_values(mappings: &[PortMapping]) -> Result<String> {
    let ports: BTreeMap<String, Vec<String>> = mappings
        .iter()
        .map(|m| (m.key(), m.upstreams.clone()))
        .collect();

    let values = ProxyValues {
        settings: ProxySettings {
            worker_connections: WORKER_CONNECTIONS_PER_PORT * ports.len() as u32,
            default_proxy_timeout: DEFAULT_PROXY_TIMEOUT,
        },
        ports,
    };

    serde_yaml::to_string(&values).map_err(|e| RuntimeError::Serialization(e.to_string()))
}

fn node_config(config: &LoadBalancerConfig) -> Result<NodeConfig> {
    let name = node_name(&config.cluster_name);
    let values = render_values(&config.port_mappings)?;

    let mut builder = NodeConfig::builder(IMAGE, &name, &config.network)
        .file(NodeFile::new(values, CONFIG_PATH, 0o644))
        .labels(labels::node_labels(&config.cluster_name, NodeType::LoadBalancer))
        .label(labels::NODE_NAME, &name);

    for mapping in &config.port_mappings {
        builder = builder.port(PortPublication {
            container_port: mapping.container_port,
            host_port: mapping.container_port,
            protocol: mapping.protocol,
        });
    }

    Ok(builder.build())
}

/// Runs the reverse-proxy node with the generated values file injected.
pub async fn provision(
    runtime: &dyn ContainerRuntime,
    config: &LoadBalancerConfig,
) -> Result<Node> {
    let node = runtime.run_node(node_config(config)?).await?;

    debug!(name = %node.name, ports = config.port_mappings.len(), "load balancer running");

    Ok(node)
}
