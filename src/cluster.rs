//! Cluster lifecycle orchestration.
//!
//! The orchestrator composes the dependency chain between services and
//! drives the five lifecycle operations: [`Cluster::create`],
//! [`Cluster::get`], [`Cluster::start`], [`Cluster::stop`] and
//! [`Cluster::delete`]. Provisioning is strictly sequential: Consul must be
//! running before Vault stores into it, Vault credentials must exist before
//! any Nomad node is configured, and the load balancer goes last so every
//! upstream resolves by name.
//!
//! Discovery relies on engine labels alone; there is no state file. A
//! cluster exists iff at least one node carries its `ClusterName` label.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::{ClusterError, RuntimeError};
use crate::labels::{self, NodeType};
use crate::runtime::{ContainerRuntime, Network, Node, VolumeHandle};
use crate::services::consul::{self, ConsulConfig};
use crate::services::loadbalancer::{self, LoadBalancerConfig, PortMapping};
use crate::services::nomad::{self, NomadConfig};
use crate::services::vault::{self, VaultConfig, VaultNode};

// Well-known HTTP ports always exposed through the load balancer.
const NOMAD_HTTP_PORT: u16 = 4646;
const CONSUL_HTTP_PORT: u16 = 8500;
const VAULT_HTTP_PORT: u16 = 8200;

/// Cluster creation parameters.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Cluster name; every engine object is labelled with it.
    pub name: String,

    /// Number of Nomad clients to provision.
    pub worker_count: u32,

    /// Host paths of extra CA certificates installed into Nomad nodes.
    pub extra_certs: Vec<PathBuf>,

    /// Extra container ports exposed on the host through the load balancer,
    /// forwarded to all Nomad clients.
    pub ports_to_expose: Vec<u16>,
}

impl ClusterConfig {
    /// Creates a config with one worker and no extra ports or certificates.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            worker_count: 1,
            extra_certs: Vec::new(),
            ports_to_expose: Vec::new(),
        }
    }
}

/// Returns the name of the cluster network.
pub fn network_name(cluster_name: &str) -> String {
    format!("{cluster_name}-net")
}

/// Returns the name of the volume carrying the Vault credentials labels.
pub fn credentials_volume_name(cluster_name: &str) -> String {
    format!("{cluster_name}-vault-credentials")
}

/// A provisioned or discovered cluster.
///
/// The struct is transient: it is derived on each invocation, either from a
/// completed `create` or from label-based discovery. Slots are optional so a
/// partially-failed create can still be inspected and deleted.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Cluster name.
    pub name: String,

    /// The cluster network, when discovered.
    pub network: Option<Network>,

    /// Consul server node.
    pub consul: Option<Node>,

    /// Vault node with captured credentials.
    pub vault: Option<VaultNode>,

    /// Nomad server node.
    pub nomad_server: Option<Node>,

    /// Nomad client nodes, in discovery order.
    pub nomad_clients: Vec<Node>,

    /// Load balancer node.
    pub load_balancer: Option<Node>,

    /// Named volumes owned by the cluster.
    pub volumes: Vec<VolumeHandle>,
}

impl Cluster {
    fn empty(name: &str) -> Self {
        Self {
            name: name.to_string(),
            network: None,
            consul: None,
            vault: None,
            nomad_server: None,
            nomad_clients: Vec::new(),
            load_balancer: None,
            volumes: Vec::new(),
        }
    }

    /// Provisions a new cluster in dependency order.
    ///
    /// There is no rollback: on failure, already-created nodes stay in place
    /// for inspection, and the next `delete` cleans them up.
    pub async fn create(
        runtime: &dyn ContainerRuntime,
        config: &ClusterConfig,
    ) -> Result<Self, ClusterError> {
        let network = network_name(&config.name);

        runtime
            .create_network(&network, &labels::cluster_selector(&config.name))
            .await
            .map_err(ClusterError::Network)?;

        let consul = consul::provision(
            runtime,
            &ConsulConfig {
                cluster_name: config.name.clone(),
                network: network.clone(),
                id: 0,
            },
        )
        .await
        .map_err(ClusterError::ProvisionConsul)?;

        info!(name = %consul.name, "consul started");

        let vault = vault::provision(
            runtime,
            &VaultConfig {
                cluster_name: config.name.clone(),
                network: network.clone(),
                consul_addr: format!("{}:{}", consul.name, CONSUL_HTTP_PORT),
                id: 0,
            },
        )
        .await
        .map_err(ClusterError::ProvisionVault)?;

        persist_vault_credentials(runtime, &config.name, &vault)
            .await
            .map_err(|e| ClusterError::ProvisionVault(e.into()))?;

        info!(name = %vault.node.name, "vault started");

        let nomad_config = NomadConfig {
            cluster_name: config.name.clone(),
            network: network.clone(),
            consul_addr: format!("{}:{}", consul.name, CONSUL_HTTP_PORT),
            vault_addr: format!("http://{}:{}", vault.node.name, VAULT_HTTP_PORT),
            vault_token: vault.root_token.clone(),
            id: 0,
            extra_certs: config.extra_certs.clone(),
        };

        let nomad_server = nomad::provision_server(runtime, &nomad_config)
            .await
            .map_err(ClusterError::ProvisionNomadServer)?;

        info!(name = %nomad_server.name, "nomad server started");

        let mut nomad_clients = Vec::with_capacity(config.worker_count as usize);
        for index in 0..config.worker_count {
            let client = nomad::provision_client(
                runtime,
                &NomadConfig {
                    id: index,
                    ..nomad_config.clone()
                },
            )
            .await
            .map_err(|source| ClusterError::ProvisionNomadWorker { index, source })?;

            info!(name = %client.name, "nomad worker started");
            nomad_clients.push(client);
        }

        let port_mappings =
            build_port_mappings(config, &consul, &vault.node, &nomad_server, &nomad_clients);

        let load_balancer = loadbalancer::provision(
            runtime,
            &LoadBalancerConfig {
                cluster_name: config.name.clone(),
                network,
                port_mappings,
            },
        )
        .await
        .map_err(ClusterError::LoadBalancer)?;

        info!(name = %load_balancer.name, "load balancer started");

        let selector = labels::cluster_selector(&config.name);
        let network = runtime
            .networks_by_label(&selector)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "unable to query cluster network");
                Vec::new()
            })
            .into_iter()
            .next();
        let volumes = runtime.volumes_by_label(&selector).await.unwrap_or_else(|e| {
            warn!(error = %e, "unable to query cluster volumes");
            Vec::new()
        });

        info!(cluster = %config.name, "cluster provisioned");

        Ok(Self {
            name: config.name.clone(),
            network,
            consul: Some(consul),
            vault: Some(vault),
            nomad_server: Some(nomad_server),
            nomad_clients,
            load_balancer: Some(load_balancer),
            volumes,
        })
    }

    /// Discovers an existing cluster from engine labels.
    ///
    /// Returns `None` when no node carries the cluster's label. Vault
    /// credentials are restored from the credentials volume labels when
    /// present.
    pub async fn get(
        runtime: &dyn ContainerRuntime,
        name: &str,
    ) -> Result<Option<Self>, ClusterError> {
        let selector = labels::cluster_selector(name);

        let nodes = runtime
            .nodes_by_label(&selector)
            .await
            .map_err(ClusterError::Discovery)?;

        if nodes.is_empty() {
            return Ok(None);
        }

        let mut cluster = Self::empty(name);

        for node in nodes {
            let node_type = node
                .labels
                .get(labels::NODE_TYPE)
                .and_then(|value| NodeType::from_label(value));

            match node_type {
                Some(NodeType::Consul) => cluster.consul = Some(node),
                Some(NodeType::Vault) => {
                    cluster.vault = Some(VaultNode {
                        node,
                        unseal_key: String::new(),
                        root_token: String::new(),
                    })
                }
                Some(NodeType::NomadServer) => cluster.nomad_server = Some(node),
                Some(NodeType::NomadClient) => cluster.nomad_clients.push(node),
                Some(NodeType::LoadBalancer) => cluster.load_balancer = Some(node),
                None => warn!(node = %node.name, "node carries no recognized NodeType label"),
            }
        }

        cluster.network = runtime
            .networks_by_label(&selector)
            .await
            .map_err(ClusterError::GetNetwork)?
            .into_iter()
            .next();

        cluster.volumes = runtime
            .volumes_by_label(&selector)
            .await
            .map_err(ClusterError::Discovery)?;

        if let Some(vault) = cluster.vault.as_mut() {
            if let Some(credentials) = cluster
                .volumes
                .iter()
                .find(|v| v.labels.contains_key(labels::UNSEAL_KEY))
            {
                vault.unseal_key = credentials
                    .labels
                    .get(labels::UNSEAL_KEY)
                    .cloned()
                    .unwrap_or_default();
                vault.root_token = credentials
                    .labels
                    .get(labels::VAULT_ROOT_TOKEN)
                    .cloned()
                    .unwrap_or_default();
            }
        }

        Ok(Some(cluster))
    }

    /// Starts every node in dependency order, best-effort.
    pub async fn start(&self, runtime: &dyn ContainerRuntime) {
        info!(cluster = %self.name, "starting cluster");

        for node in self.nodes_in_dependency_order() {
            if let Err(e) = runtime.start_node(node).await {
                warn!(node = %node.name, error = %e, "unable to start node");
            }
        }
    }

    /// Stops every node, dependents first, best-effort.
    pub async fn stop(&self, runtime: &dyn ContainerRuntime) {
        info!(cluster = %self.name, "stopping cluster");

        for node in self.nodes_in_teardown_order() {
            if let Err(e) = runtime.stop_node(node).await {
                warn!(node = %node.name, error = %e, "unable to stop node");
            }
        }
    }

    /// Removes every node, volume, and finally the network, best-effort.
    ///
    /// Teardown is maximal-effort: each failure is logged and swallowed so a
    /// single broken object never blocks the rest of the cleanup. The
    /// network removal is refused by the engine while foreign containers are
    /// attached, which is the intended safety net.
    pub async fn delete(&self, runtime: &dyn ContainerRuntime) {
        info!(cluster = %self.name, "deleting cluster");

        for node in self.nodes_in_teardown_order() {
            if let Err(e) = runtime.stop_node(node).await {
                warn!(node = %node.name, error = %e, "unable to stop node");
            }
            if let Err(e) = runtime.remove_node(node).await {
                warn!(node = %node.name, error = %e, "unable to remove node");
            }
        }

        for volume in &self.volumes {
            if let Err(e) = runtime.remove_volume(&volume.name).await {
                warn!(volume = %volume.name, error = %e, "unable to remove volume");
            }
        }

        if let Some(network) = &self.network {
            if let Err(e) = runtime.remove_network(network).await {
                warn!(network = %network.name, error = %e, "unable to remove network");
            }
        }

        info!(cluster = %self.name, "cluster deleted");
    }

    /// Dependency order: Consul, Vault, Nomad server, clients, load balancer.
    fn nodes_in_dependency_order(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = Vec::new();
        nodes.extend(self.consul.as_ref());
        nodes.extend(self.vault.as_ref().map(|v| &v.node));
        nodes.extend(self.nomad_server.as_ref());
        nodes.extend(self.nomad_clients.iter());
        nodes.extend(self.load_balancer.as_ref());
        nodes
    }

    /// Teardown order: clients, server, Vault, Consul, load balancer.
    fn nodes_in_teardown_order(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.nomad_clients.iter().collect();
        nodes.extend(self.nomad_server.as_ref());
        nodes.extend(self.vault.as_ref().map(|v| &v.node));
        nodes.extend(self.consul.as_ref());
        nodes.extend(self.load_balancer.as_ref());
        nodes
    }
}

/// Persists the captured Vault credentials as labels on a dedicated named
/// volume so rediscovery can restore them after this process exits.
async fn persist_vault_credentials(
    runtime: &dyn ContainerRuntime,
    cluster_name: &str,
    vault: &VaultNode,
) -> Result<(), RuntimeError> {
    let mut volume_labels = labels::cluster_selector(cluster_name);
    volume_labels.insert(labels::NODE_NAME.to_string(), vault.node.name.clone());
    volume_labels.insert(labels::UNSEAL_KEY.to_string(), vault.unseal_key.clone());
    volume_labels.insert(
        labels::VAULT_ROOT_TOKEN.to_string(),
        vault.root_token.clone(),
    );

    runtime
        .create_volume(&credentials_volume_name(cluster_name), &volume_labels)
        .await
}

/// Assembles the load balancer port list: the three well-known endpoints,
/// then each user-declared port forwarded to every Nomad client.
fn build_port_mappings(
    config: &ClusterConfig,
    consul: &Node,
    vault: &Node,
    nomad_server: &Node,
    nomad_clients: &[Node],
) -> Vec<PortMapping> {
    let mut mappings = vec![
        PortMapping::tcp(NOMAD_HTTP_PORT, [nomad_server.name.clone()]),
        PortMapping::tcp(CONSUL_HTTP_PORT, [consul.name.clone()]),
        PortMapping::tcp(VAULT_HTTP_PORT, [vault.name.clone()]),
    ];

    for port in &config.ports_to_expose {
        mappings.push(PortMapping::tcp(
            *port,
            nomad_clients.iter().map(|c| c.name.clone()),
        ));
    }

    mappings
}
