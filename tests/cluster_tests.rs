//! Cluster lifecycle tests against an in-memory runtime.
//!
//! The fake engine records every mutation so tests can assert what a real
//! engine would have been asked to do: which objects exist, their labels,
//! the injected files, and the published ports.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use nomad_lab::error::{Result, RuntimeError};
use nomad_lab::labels;
use nomad_lab::runtime::{
    ContainerRuntime, LogStream, Network, Node, NodeConfig, VolumeHandle,
};
use nomad_lab::{Cluster, ClusterConfig, ClusterError, VaultError};

const VAULT_READY_LINE: &str = "core: Initializing version history cache for core";
const VAULT_INIT_JSON: &str = r#"{"unseal_keys_b64":["abc"],"root_token":"s.xyz"}"#;

#[derive(Debug, Clone)]
struct FakeNode {
    node: Node,
    network: String,
    running: bool,
}

#[derive(Debug, Default)]
struct EngineState {
    next_id: u32,
    networks: Vec<Network>,
    volumes: Vec<VolumeHandle>,
    nodes: Vec<FakeNode>,
    run_configs: Vec<NodeConfig>,
}

/// In-memory engine implementing the runtime capability set.
struct FakeRuntime {
    state: Mutex<EngineState>,
    /// Scripted stdout for successive exec calls; when exhausted, exec
    /// returns a canned successful vault init response.
    exec_outputs: Mutex<VecDeque<String>>,
    /// Node names whose creation must fail.
    fail_creates: Mutex<Vec<String>>,
    /// Whether log streams carry the vault readiness line.
    vault_ready: bool,
}

impl FakeRuntime {
    fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            exec_outputs: Mutex::new(VecDeque::new()),
            fail_creates: Mutex::new(Vec::new()),
            vault_ready: true,
        }
    }

    fn with_exec_output(self, output: &str) -> Self {
        self.exec_outputs
            .lock()
            .unwrap()
            .push_back(output.to_string());
        self
    }

    fn with_failing_create(self, node_name: &str) -> Self {
        self.fail_creates.lock().unwrap().push(node_name.to_string());
        self
    }

    fn without_vault_readiness(mut self) -> Self {
        self.vault_ready = false;
        self
    }

    fn nodes(&self) -> Vec<FakeNode> {
        self.state.lock().unwrap().nodes.clone()
    }

    fn networks(&self) -> Vec<Network> {
        self.state.lock().unwrap().networks.clone()
    }

    fn volumes(&self) -> Vec<VolumeHandle> {
        self.state.lock().unwrap().volumes.clone()
    }

    fn run_config_for(&self, node_name: &str) -> Option<NodeConfig> {
        self.state
            .lock()
            .unwrap()
            .run_configs
            .iter()
            .find(|c| c.name == node_name)
            .cloned()
    }
}

fn matches(labels: &HashMap<String, String>, selector: &HashMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        if state.networks.iter().any(|n| n.name == name) {
            return Ok(());
        }

        state.next_id += 1;
        let network = Network {
            id: format!("net-{}", state.next_id),
            name: name.to_string(),
            labels: labels.clone(),
        };
        state.networks.push(network);

        Ok(())
    }

    async fn run_node(&self, config: NodeConfig) -> Result<Node> {
        if self
            .fail_creates
            .lock()
            .unwrap()
            .iter()
            .any(|n| n == &config.name)
        {
            return Err(RuntimeError::Serialization(format!(
                "injected failure creating {}",
                config.name
            )));
        }

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;

        let node = Node {
            id: format!("node-{}", state.next_id),
            name: config.name.clone(),
            ip: Some(format!("172.28.0.{}", state.next_id)),
            labels: config.labels.clone(),
        };

        state.nodes.push(FakeNode {
            node: node.clone(),
            network: config.network.clone(),
            running: true,
        });
        state.run_configs.push(config);

        Ok(node)
    }

    async fn start_node(&self, node: &Node) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let fake = state
            .nodes
            .iter_mut()
            .find(|n| n.node.id == node.id)
            .ok_or_else(|| RuntimeError::Serialization(format!("no such node: {}", node.name)))?;
        fake.running = true;
        Ok(())
    }

    async fn stop_node(&self, node: &Node) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let fake = state
            .nodes
            .iter_mut()
            .find(|n| n.node.id == node.id)
            .ok_or_else(|| RuntimeError::Serialization(format!("no such node: {}", node.name)))?;
        fake.running = false;
        Ok(())
    }

    async fn remove_node(&self, node: &Node) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.nodes.retain(|n| n.node.id != node.id);
        Ok(())
    }

    async fn logs(&self, _node_name: &str, _follow: bool) -> Result<LogStream> {
        let lines: Vec<Result<String>> = if self.vault_ready {
            vec![
                Ok("==> Vault server started!".to_string()),
                Ok(format!("2023-01-01T00:00:00.000Z [TRACE] {VAULT_READY_LINE}")),
            ]
        } else {
            vec![Ok("==> Vault server started!".to_string())]
        };

        Ok(Box::pin(stream::iter(lines)))
    }

    async fn exec(&self, _node: &Node, _cmd: &[&str]) -> Result<String> {
        let scripted = self.exec_outputs.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| VAULT_INIT_JSON.to_string()))
    }

    async fn nodes_by_label(&self, labels: &HashMap<String, String>) -> Result<Vec<Node>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .nodes
            .iter()
            .filter(|n| matches(&n.node.labels, labels))
            .map(|n| n.node.clone())
            .collect())
    }

    async fn networks_by_label(&self, labels: &HashMap<String, String>) -> Result<Vec<Network>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .networks
            .iter()
            .filter(|n| matches(&n.labels, labels))
            .cloned()
            .collect())
    }

    async fn volumes_by_label(
        &self,
        labels: &HashMap<String, String>,
    ) -> Result<Vec<VolumeHandle>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .volumes
            .iter()
            .filter(|v| matches(&v.labels, labels))
            .cloned()
            .collect())
    }

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        if state.volumes.iter().any(|v| v.name == name) {
            return Ok(());
        }

        let volume = VolumeHandle {
            name: name.to_string(),
            mountpoint: format!("/var/lib/engine/volumes/{name}"),
            labels: labels.clone(),
        };
        state.volumes.push(volume);

        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.volumes.retain(|v| v.name != name);
        Ok(())
    }

    async fn remove_network(&self, network: &Network) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        if state.nodes.iter().any(|n| n.network == network.name) {
            return Err(RuntimeError::Serialization(format!(
                "network {} has active endpoints",
                network.name
            )));
        }

        state.networks.retain(|n| n.id != network.id);
        Ok(())
    }
}

fn config(name: &str, worker_count: u32, ports: Vec<u16>) -> ClusterConfig {
    ClusterConfig {
        name: name.to_string(),
        worker_count,
        extra_certs: Vec::new(),
        ports_to_expose: ports,
    }
}

#[tokio::test]
async fn test_create_provisions_full_cluster() {
    let runtime = FakeRuntime::new();

    let cluster = Cluster::create(&runtime, &config("devA", 2, vec![8080]))
        .await
        .unwrap();

    assert!(cluster.consul.is_some());
    assert!(cluster.nomad_server.is_some());
    assert!(cluster.load_balancer.is_some());
    assert_eq!(cluster.nomad_clients.len(), 2);

    let vault = cluster.vault.as_ref().unwrap();
    assert_eq!(vault.unseal_key, "abc");
    assert_eq!(vault.root_token, "s.xyz");

    // One network, six containers.
    let networks = runtime.networks();
    assert_eq!(networks.len(), 1);
    assert_eq!(networks[0].name, "devA-net");
    assert_eq!(runtime.nodes().len(), 6);

    // Four data volumes plus the credentials volume.
    let mut volume_names: Vec<String> =
        runtime.volumes().iter().map(|v| v.name.clone()).collect();
    volume_names.sort();
    assert_eq!(
        volume_names,
        vec![
            "devA-consul-vol",
            "devA-nomad-client-vol-0",
            "devA-nomad-client-vol-1",
            "devA-nomad-server-vol-0",
            "devA-vault-credentials",
        ]
    );

    // Host ports are exactly the load balancer's published set.
    let lb = runtime.run_config_for("devA-default-lb").unwrap();
    let mut published: Vec<u16> = lb.ports.iter().map(|p| p.host_port).collect();
    published.sort();
    assert_eq!(published, vec![4646, 8080, 8200, 8500]);

    // Nothing but the load balancer publishes host ports.
    for node in runtime.nodes() {
        if node.node.name != "devA-default-lb" {
            let config = runtime.run_config_for(&node.node.name).unwrap();
            assert!(config.ports.is_empty(), "{} publishes ports", node.node.name);
        }
    }
}

#[tokio::test]
async fn test_created_nodes_carry_labels_and_template_names() {
    let runtime = FakeRuntime::new();

    Cluster::create(&runtime, &config("devA", 2, Vec::new()))
        .await
        .unwrap();

    for fake in runtime.nodes() {
        let node = &fake.node;
        assert_eq!(fake.network, "devA-net");
        assert_eq!(
            node.labels.get(labels::CLUSTER_NAME).map(String::as_str),
            Some("devA"),
            "{} lacks the cluster label",
            node.name
        );

        let node_type = node.labels.get(labels::NODE_TYPE).unwrap();
        let expected_name = match node_type.as_str() {
            "Consul" => "devA-consul-server-0".to_string(),
            "Vault" => "devA-vault-0".to_string(),
            "NomadServer" => "devA-nomad-server-0".to_string(),
            "NomadClient" => {
                assert!(node.name.starts_with("devA-nomad-client-"));
                continue;
            }
            "LoadBalancer" => "devA-default-lb".to_string(),
            other => panic!("unexpected NodeType {other}"),
        };
        assert_eq!(node.name, expected_name);
    }
}

#[tokio::test]
async fn test_load_balancer_values_file() {
    let runtime = FakeRuntime::new();

    Cluster::create(&runtime, &config("foo", 1, vec![9000]))
        .await
        .unwrap();

    let lb = runtime.run_config_for("foo-default-lb").unwrap();
    let file = &lb.files[0];
    assert_eq!(file.path, "/etc/confd/values.yaml");
    assert_eq!(file.mode, 0o644);

    let values: serde_yaml::Value =
        serde_yaml::from_slice(&file.content).expect("values file is YAML");
    let ports = values.get("ports").unwrap();

    let upstreams = |key: &str| -> Vec<String> {
        ports
            .get(key)
            .unwrap_or_else(|| panic!("missing port key {key}"))
            .as_sequence()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    };

    assert_eq!(upstreams("4646/tcp"), vec!["foo-nomad-server-0"]);
    assert_eq!(upstreams("8500/tcp"), vec!["foo-consul-server-0"]);
    assert_eq!(upstreams("8200/tcp"), vec!["foo-vault-0"]);
    assert_eq!(upstreams("9000/tcp"), vec!["foo-nomad-client-0"]);

    let settings = values.get("settings").unwrap();
    assert_eq!(
        settings.get("workerConnections").unwrap().as_u64(),
        Some(4096)
    );
    assert_eq!(
        settings.get("defaultProxyTimeout").unwrap().as_u64(),
        Some(300)
    );
}

#[tokio::test]
async fn test_get_returns_none_for_absent_cluster() {
    let runtime = FakeRuntime::new();

    assert!(Cluster::get(&runtime, "nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_classifies_discovered_nodes() {
    let runtime = FakeRuntime::new();

    let created = Cluster::create(&runtime, &config("devA", 2, Vec::new()))
        .await
        .unwrap();

    let discovered = Cluster::get(&runtime, "devA").await.unwrap().unwrap();

    assert_eq!(
        discovered.consul.as_ref().unwrap().id,
        created.consul.as_ref().unwrap().id
    );
    assert_eq!(
        discovered.nomad_server.as_ref().unwrap().id,
        created.nomad_server.as_ref().unwrap().id
    );
    assert_eq!(
        discovered.load_balancer.as_ref().unwrap().id,
        created.load_balancer.as_ref().unwrap().id
    );
    assert_eq!(discovered.nomad_clients.len(), 2);

    // Credentials are restored from the credentials volume labels.
    let vault = discovered.vault.as_ref().unwrap();
    assert_eq!(vault.unseal_key, "abc");
    assert_eq!(vault.root_token, "s.xyz");

    assert_eq!(discovered.network.as_ref().unwrap().name, "devA-net");
    assert_eq!(discovered.volumes.len(), 5);
}

#[tokio::test]
async fn test_stop_then_start_preserves_structure() {
    let runtime = FakeRuntime::new();

    Cluster::create(&runtime, &config("devA", 2, Vec::new()))
        .await
        .unwrap();

    let before = Cluster::get(&runtime, "devA").await.unwrap().unwrap();
    let volumes_before: Vec<String> =
        runtime.volumes().iter().map(|v| v.name.clone()).collect();

    before.stop(&runtime).await;
    assert!(runtime.nodes().iter().all(|n| !n.running));

    before.start(&runtime).await;
    assert!(runtime.nodes().iter().all(|n| n.running));

    let after = Cluster::get(&runtime, "devA").await.unwrap().unwrap();

    assert_eq!(
        before.consul.as_ref().unwrap().id,
        after.consul.as_ref().unwrap().id
    );
    assert_eq!(
        before.vault.as_ref().unwrap().node.id,
        after.vault.as_ref().unwrap().node.id
    );
    assert_eq!(
        before.nomad_server.as_ref().unwrap().id,
        after.nomad_server.as_ref().unwrap().id
    );

    let ids = |cluster: &Cluster| -> Vec<String> {
        cluster.nomad_clients.iter().map(|n| n.id.clone()).collect()
    };
    assert_eq!(ids(&before), ids(&after));

    let volumes_after: Vec<String> =
        runtime.volumes().iter().map(|v| v.name.clone()).collect();
    assert_eq!(volumes_before, volumes_after);
}

#[tokio::test]
async fn test_delete_removes_all_labelled_objects() {
    let runtime = FakeRuntime::new();

    Cluster::create(&runtime, &config("devA", 2, vec![8080]))
        .await
        .unwrap();

    let cluster = Cluster::get(&runtime, "devA").await.unwrap().unwrap();
    cluster.delete(&runtime).await;

    assert!(Cluster::get(&runtime, "devA").await.unwrap().is_none());
    assert!(runtime.nodes().is_empty());
    assert!(runtime.volumes().is_empty());
    assert!(runtime.networks().is_empty());
}

#[tokio::test]
async fn test_delete_leaves_busy_network_in_place() {
    let runtime = FakeRuntime::new();

    Cluster::create(&runtime, &config("devA", 1, Vec::new()))
        .await
        .unwrap();

    // A foreign container joins the cluster network.
    let foreign = nomad_lab::NodeConfig::builder("redis:7-alpine", "bystander", "devA-net")
        .label("ClusterName", "other")
        .build();
    runtime.run_node(foreign).await.unwrap();

    let cluster = Cluster::get(&runtime, "devA").await.unwrap().unwrap();
    cluster.delete(&runtime).await;

    // Delete succeeded for everything it owns; the busy network stays.
    assert!(Cluster::get(&runtime, "devA").await.unwrap().is_none());
    assert_eq!(runtime.networks().len(), 1);
}

#[tokio::test]
async fn test_worker_failure_aborts_create_without_rollback() {
    let runtime = FakeRuntime::new().with_failing_create("devB-nomad-client-1");

    let err = Cluster::create(&runtime, &config("devB", 3, Vec::new()))
        .await
        .unwrap_err();

    match err {
        ClusterError::ProvisionNomadWorker { index, .. } => assert_eq!(index, 1),
        other => panic!("unexpected error: {other}"),
    }

    // Consul, Vault, the server and worker 0 remain in place for inspection;
    // no further workers and no load balancer were attempted.
    let names: Vec<String> = runtime
        .nodes()
        .iter()
        .map(|n| n.node.name.clone())
        .collect();
    assert_eq!(names.len(), 4);
    assert!(names.contains(&"devB-consul-server-0".to_string()));
    assert!(names.contains(&"devB-vault-0".to_string()));
    assert!(names.contains(&"devB-nomad-server-0".to_string()));
    assert!(names.contains(&"devB-nomad-client-0".to_string()));
}

#[tokio::test]
async fn test_vault_init_parse_failure_surfaces_raw_output() {
    let runtime = FakeRuntime::new().with_exec_output("Error: server gave up");

    let err = Cluster::create(&runtime, &config("devC", 1, Vec::new()))
        .await
        .unwrap_err();

    let ClusterError::ProvisionVault(vault_err) = err else {
        panic!("unexpected error: {err}");
    };
    match &vault_err {
        VaultError::InitParse { output, .. } => assert!(output.contains("server gave up")),
        other => panic!("unexpected vault error: {other}"),
    }

    // The wreckage stays in place and a later delete clears it.
    let partial = Cluster::get(&runtime, "devC").await.unwrap().unwrap();
    assert!(partial.consul.is_some());
    assert!(partial.vault.is_some());
    assert!(partial.nomad_server.is_none());

    partial.delete(&runtime).await;
    assert!(Cluster::get(&runtime, "devC").await.unwrap().is_none());
    assert!(runtime.volumes().is_empty());
}

#[tokio::test]
async fn test_vault_readiness_failure_aborts_create() {
    let runtime = FakeRuntime::new().without_vault_readiness();

    let err = Cluster::create(&runtime, &config("devD", 1, Vec::new()))
        .await
        .unwrap_err();

    let ClusterError::ProvisionVault(vault_err) = err else {
        panic!("unexpected error: {err}");
    };
    assert!(matches!(vault_err, VaultError::NotReady { .. }));
}

#[tokio::test]
async fn test_consul_failure_maps_to_provision_consul() {
    let runtime = FakeRuntime::new().with_failing_create("devE-consul-server-0");

    let err = Cluster::create(&runtime, &config("devE", 1, Vec::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, ClusterError::ProvisionConsul(_)));
    assert_eq!(err.to_string(), "unable to provision consul server");
}

#[tokio::test]
async fn test_nomad_nodes_receive_vault_credentials() {
    let runtime = FakeRuntime::new();

    Cluster::create(&runtime, &config("devF", 1, Vec::new()))
        .await
        .unwrap();

    for name in ["devF-nomad-server-0", "devF-nomad-client-0"] {
        let config = runtime.run_config_for(name).unwrap();
        let local_config = config
            .env
            .iter()
            .find(|e| e.starts_with("NOMAD_LOCAL_CONFIG="))
            .unwrap();

        assert!(local_config.contains("devF-consul-server-0:8500"));
        assert!(local_config.contains("http://devF-vault-0:8200"));
        assert!(local_config.contains("s.xyz"));
    }
}
