//! Runtime capability trait and engine-agnostic handle types.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::runtime::config::NodeConfig;

/// A live stream of log chunks from a node.
///
/// With `follow = true` the stream stays open until the node stops or the
/// caller drops it; callers own the lifetime.
pub type LogStream = BoxStream<'static, Result<String>>;

/// A container playing one role in a cluster.
///
/// The handle is deliberately thin: the runtime owns the node's lifecycle,
/// the cluster only references it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Opaque engine identifier.
    pub id: String,

    /// Human-readable node name (also the engine DNS name on the network).
    pub name: String,

    /// Address assigned on the cluster network, when known.
    pub ip: Option<String>,

    /// Labels attached at creation time.
    pub labels: HashMap<String, String>,
}

/// A cluster network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    /// Opaque engine identifier.
    pub id: String,

    /// Network name.
    pub name: String,

    /// Labels attached at creation time.
    pub labels: HashMap<String, String>,
}

/// A named volume discovered in the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeHandle {
    /// Engine-scoped volume name.
    pub name: String,

    /// Mountpoint reported by the engine.
    pub mountpoint: String,

    /// Labels attached at creation time.
    pub labels: HashMap<String, String>,
}

/// Capability set over a container engine.
///
/// The trait is complete enough that the orchestrator and the service
/// factories never touch the engine directly, which keeps them testable
/// against an in-memory fake. A single production implementation exists
/// ([`DockerRuntime`](crate::runtime::DockerRuntime)); no engine type leaks
/// through this surface.
///
/// # Ordering and failure
///
/// All operations are sequential awaits into the engine; cancellation of the
/// surrounding future propagates to the in-flight engine request. Bulk
/// teardown callers are expected to log-and-swallow individual failures.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates a network, succeeding without error if one with the same name
    /// already exists.
    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<()>;

    /// Creates and starts a node from the given config.
    ///
    /// Ensures the image is present (pulling when missing), injects extra CA
    /// certificates and declared files before start, and resolves the node's
    /// address on the configured network.
    async fn run_node(&self, config: NodeConfig) -> Result<Node>;

    /// Starts a stopped node.
    async fn start_node(&self, node: &Node) -> Result<()>;

    /// Stops a running node.
    async fn stop_node(&self, node: &Node) -> Result<()>;

    /// Removes a node. The node should be stopped first.
    async fn remove_node(&self, node: &Node) -> Result<()>;

    /// Opens a log stream for the named node.
    async fn logs(&self, node_name: &str, follow: bool) -> Result<LogStream>;

    /// Runs a command inside a node and returns captured stdout.
    ///
    /// Bounded by a fixed 30-second deadline; stderr is discarded.
    async fn exec(&self, node: &Node, cmd: &[&str]) -> Result<String>;

    /// Returns all nodes (including stopped ones) matching every given label.
    async fn nodes_by_label(&self, labels: &HashMap<String, String>) -> Result<Vec<Node>>;

    /// Returns all networks matching every given label.
    async fn networks_by_label(&self, labels: &HashMap<String, String>) -> Result<Vec<Network>>;

    /// Returns all volumes matching every given label.
    async fn volumes_by_label(&self, labels: &HashMap<String, String>) -> Result<Vec<VolumeHandle>>;

    /// Creates a named volume, succeeding without error if one with the same
    /// name already exists.
    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()>;

    /// Removes a named volume.
    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Removes a network. Fails while containers are still attached.
    async fn remove_network(&self, network: &Network) -> Result<()>;
}
