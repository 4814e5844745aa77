//! Label vocabulary shared by every engine object the provisioner creates.
//!
//! Labels are the persistence layer: a cluster exists iff at least one node
//! carries `ClusterName={cluster}`, and discovery classifies nodes purely by
//! their `NodeType` label. No state file exists outside the engine.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Label key holding the owning cluster's name.
pub const CLUSTER_NAME: &str = "ClusterName";

/// Label key holding a node's role in the cluster.
pub const NODE_TYPE: &str = "NodeType";

/// Label key holding the canonical node name.
pub const NODE_NAME: &str = "NodeName";

/// Label key holding a volume's role in the cluster.
pub const VOLUME_TYPE: &str = "VolumeType";

/// Label key holding the captured Vault unseal key.
pub const UNSEAL_KEY: &str = "UnsealKey";

/// Label key holding the captured Vault root token.
pub const VAULT_ROOT_TOKEN: &str = "VaultRootToken";

/// The role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Consul server (service discovery and KV).
    Consul,

    /// Vault server (secrets).
    Vault,

    /// Nomad server (scheduler control plane).
    NomadServer,

    /// Nomad client (workload executor).
    NomadClient,

    /// Reverse-proxy load balancer exposing cluster ports on the host.
    LoadBalancer,
}

impl NodeType {
    /// Returns the label value for this node type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consul => "Consul",
            Self::Vault => "Vault",
            Self::NomadServer => "NomadServer",
            Self::NomadClient => "NomadClient",
            Self::LoadBalancer => "LoadBalancer",
        }
    }

    /// Parses a `NodeType` label value.
    pub fn from_label(value: &str) -> Option<Self> {
        match value {
            "Consul" => Some(Self::Consul),
            "Vault" => Some(Self::Vault),
            "NomadServer" => Some(Self::NomadServer),
            "NomadClient" => Some(Self::NomadClient),
            "LoadBalancer" => Some(Self::LoadBalancer),
            _ => None,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The role a named volume plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeType {
    /// Consul data volume.
    Consul,

    /// Nomad server data volume.
    NomadServer,

    /// Nomad client data volume.
    NomadClient,
}

impl VolumeType {
    /// Returns the label value for this volume type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consul => "Consul",
            Self::NomadServer => "NomadServer",
            Self::NomadClient => "NomadClient",
        }
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the label selector matching every object of a cluster.
pub fn cluster_selector(cluster_name: &str) -> HashMap<String, String> {
    HashMap::from([(CLUSTER_NAME.to_string(), cluster_name.to_string())])
}

/// Returns the label set for a node of the given type.
pub fn node_labels(cluster_name: &str, node_type: NodeType) -> HashMap<String, String> {
    HashMap::from([
        (CLUSTER_NAME.to_string(), cluster_name.to_string()),
        (NODE_TYPE.to_string(), node_type.as_str().to_string()),
    ])
}

/// Returns the label set for a named volume of the given type.
pub fn volume_labels(
    cluster_name: &str,
    volume_type: VolumeType,
    node_name: &str,
) -> HashMap<String, String> {
    HashMap::from([
        (CLUSTER_NAME.to_string(), cluster_name.to_string()),
        (VOLUME_TYPE.to_string(), volume_type.as_str().to_string()),
        (NODE_NAME.to_string(), node_name.to_string()),
    ])
}
