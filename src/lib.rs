//! Local, ephemeral Nomad clusters on a single container engine.
//!
//! This crate provisions a self-contained HashiCorp stack — Consul (service
//! discovery and KV), Vault (secrets, initialized with captured
//! credentials), a Nomad server and one or more Nomad clients — plus a
//! reverse-proxy load balancer that exposes the cluster endpoints on the
//! host. Everything runs as containers on a dedicated per-cluster network
//! with persistent named volumes.
//!
//! # Overview
//!
//! The provisioner is a deterministic, ordered, failure-aware lifecycle
//! engine:
//!
//! - **Runtime abstraction**: networks, volumes, nodes, log streams, exec,
//!   and file injection behind a single capability trait
//! - **Service factories**: per-role node construction with pinned images,
//!   deterministic names, and injected configuration
//! - **Vault bootstrap**: wait-for-ready, `operator init`, credential capture
//! - **Load balancer**: proxy config generation from declared port exposures
//! - **Orchestrator**: create / get / start / stop / delete with label-based
//!   discovery instead of any on-host state file
//!
//! # Example
//!
//! ```ignore
//! use nomad_lab::{Cluster, ClusterConfig, DockerRuntime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = DockerRuntime::connect().await?;
//!
//!     let mut config = ClusterConfig::new("dev");
//!     config.worker_count = 2;
//!     config.ports_to_expose = vec![8080];
//!
//!     let cluster = Cluster::create(&runtime, &config).await?;
//!     let vault = cluster.vault.as_ref().unwrap();
//!     println!("root token: {}", vault.root_token);
//!
//!     // Later, from a fresh process:
//!     if let Some(cluster) = Cluster::get(&runtime, "dev").await? {
//!         cluster.delete(&runtime).await;
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Discovery
//!
//! Engine labels are the persistence layer. Every object of cluster `C`
//! carries `ClusterName=C`; nodes additionally carry their role in
//! `NodeType`. Discovery classifies label query results back into a
//! [`Cluster`], which makes the lifecycle operations safe across restarts of
//! the provisioning process.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cluster;
pub mod error;
pub mod labels;
pub mod runtime;
pub mod services;

// Re-export commonly used types at the crate root
pub use cluster::{Cluster, ClusterConfig};
pub use error::{ClusterError, RuntimeError, VaultError};
pub use runtime::{
    ContainerRuntime, DockerRuntime, LogStream, Network, Node, NodeConfig, NodeFile,
    PortPublication, Protocol, VolumeHandle, VolumeSpec,
};
pub use services::vault::VaultNode;
