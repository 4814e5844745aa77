//! Error types for cluster provisioning.
//!
//! Two layers mirror the crate's architecture: [`RuntimeError`] covers the
//! container-engine chokepoint, [`ClusterError`] covers orchestration steps
//! and wraps the engine error that caused them.

use thiserror::Error;

/// Result type for runtime operations.
pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;

/// Errors raised by the container runtime abstraction.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Engine API error.
    #[error("engine API error: {0}")]
    Api(#[from] bollard::errors::Error),

    /// Failed to pull an image.
    #[error("failed to pull image {image}: {reason}")]
    ImagePullFailed {
        /// The image that failed to pull.
        image: String,
        /// The reason for the failure.
        reason: String,
    },

    /// A started node has no address on the cluster network.
    #[error("node {name} has no address on network {network}")]
    MissingAddress {
        /// The node name.
        name: String,
        /// The network it was expected to join.
        network: String,
    },

    /// Command execution inside a node did not finish in time.
    #[error("exec in node {node} did not complete within {timeout_secs}s")]
    ExecTimeout {
        /// The node the command ran in.
        node: String,
        /// The deadline that elapsed.
        timeout_secs: u64,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RuntimeError {
    /// Creates an image pull failed error.
    pub fn image_pull_failed(image: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImagePullFailed {
            image: image.into(),
            reason: reason.into(),
        }
    }

    /// Creates a missing address error.
    pub fn missing_address(name: impl Into<String>, network: impl Into<String>) -> Self {
        Self::MissingAddress {
            name: name.into(),
            network: network.into(),
        }
    }

    /// Creates an exec timeout error.
    pub fn exec_timeout(node: impl Into<String>, timeout_secs: u64) -> Self {
        Self::ExecTimeout {
            node: node.into(),
            timeout_secs,
        }
    }
}

/// Errors raised while driving the Vault bootstrap protocol.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Underlying runtime failure.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Vault never reported readiness in its logs.
    #[error("vault did not become ready within {timeout_secs}s")]
    NotReady {
        /// The deadline that elapsed.
        timeout_secs: u64,
    },

    /// `operator init` produced output that is not the expected JSON.
    #[error("unable to parse vault init response ({reason}): {output}")]
    InitParse {
        /// Raw stdout of the init command.
        output: String,
        /// Why parsing failed.
        reason: String,
    },
}

/// Errors raised by cluster lifecycle operations.
///
/// Each provisioning step maps to its own variant so callers can tell which
/// service failed; the engine-level cause travels along as the source.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Cluster network creation failed.
    #[error("unable to create cluster network")]
    Network(#[source] RuntimeError),

    /// Consul server provisioning failed.
    #[error("unable to provision consul server")]
    ProvisionConsul(#[source] RuntimeError),

    /// Vault provisioning or bootstrap failed.
    #[error("unable to provision vault")]
    ProvisionVault(#[source] VaultError),

    /// Nomad server provisioning failed.
    #[error("unable to provision nomad server")]
    ProvisionNomadServer(#[source] RuntimeError),

    /// A Nomad worker failed to provision.
    #[error("unable to provision nomad worker {index}")]
    ProvisionNomadWorker {
        /// Index of the worker that failed.
        index: u32,
        /// The engine-level cause.
        #[source]
        source: RuntimeError,
    },

    /// Load balancer provisioning failed.
    #[error("unable to provision load balancer")]
    LoadBalancer(#[source] RuntimeError),

    /// The network label query failed during discovery.
    #[error("unable to query cluster network")]
    GetNetwork(#[source] RuntimeError),

    /// A node or volume label query failed during discovery.
    #[error("unable to discover cluster state")]
    Discovery(#[source] RuntimeError),
}
