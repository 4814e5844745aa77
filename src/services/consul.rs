//! Consul server factory.

use tracing::debug;

use crate::error::Result;
use crate::labels::{self, NodeType, VolumeType};
use crate::runtime::{ContainerRuntime, Node, NodeConfig, VolumeSpec};

const IMAGE: &str = "consul:1.15.4";

const DATA_DIR: &str = "/consul/data";

/// Consul server factory input.
#[derive(Debug, Clone)]
pub struct ConsulConfig {
    /// Owning cluster name.
    pub cluster_name: String,

    /// Cluster network to attach to.
    pub network: String,

    /// Instance id within the cluster.
    pub id: u32,
}

/// Returns the deterministic node name for a Consul server.
pub fn node_name(cluster_name: &str, id: u32) -> String {
    format!("{cluster_name}-consul-server-{id}")
}

/// Returns the name of the Consul data volume.
pub fn volume_name(cluster_name: &str) -> String {
    format!("{cluster_name}-consul-vol")
}

fn node_config(config: &ConsulConfig) -> NodeConfig {
    NodeConfig::builder(IMAGE, node_name(&config.cluster_name, config.id), &config.network)
        .command([
            "agent",
            "-server",
            "-ui",
            "-bootstrap-expect=1",
            "-client=0.0.0.0",
            "-hcl=connect { enabled = true }",
            "-hcl=ports { grpc = 8502 serf_lan = 28301 }",
        ])
        .volume(VolumeSpec::named(
            volume_name(&config.cluster_name),
            DATA_DIR,
        ))
        .labels(labels::node_labels(&config.cluster_name, NodeType::Consul))
        .build()
}

/// Creates the Consul data volume and runs the Consul server node.
pub async fn provision(runtime: &dyn ContainerRuntime, config: &ConsulConfig) -> Result<Node> {
    let name = node_name(&config.cluster_name, config.id);

    runtime
        .create_volume(
            &volume_name(&config.cluster_name),
            &labels::volume_labels(&config.cluster_name, VolumeType::Consul, &name),
        )
        .await?;

    let node = runtime.run_node(node_config(config)).await?;

    debug!(name = %node.name, "consul server running");

    Ok(node)
}
