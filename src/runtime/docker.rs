//! Docker implementation of the runtime abstraction.
//!
//! Talks to the engine through its environment-derived configuration (socket
//! path, API version) via bollard. Configuration payloads are tar-streamed
//! into containers before start so no host bind-mount is needed for them.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::service::{HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info};

use crate::error::{Result, RuntimeError};
use crate::runtime::config::{NodeConfig, NodeFile};
use crate::runtime::r#trait::{ContainerRuntime, LogStream, Network, Node, VolumeHandle};

/// Fixed deadline for command execution inside a node.
const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Stop grace period before the engine kills a container.
const STOP_TIMEOUT_SECS: i64 = 10;

/// Container runtime backed by the Docker API.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using the environment-derived engine configuration and
    /// verifies the connection with a ping.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;

        info!("connected to container engine");

        Ok(Self { docker })
    }

    /// Wraps an existing client.
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(image = %image, "pulling image");

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(progress) = stream.next().await {
            match progress {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "pull progress");
                    }
                }
                Err(e) => {
                    return Err(RuntimeError::image_pull_failed(image, e.to_string()));
                }
            }
        }

        Ok(())
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_err() {
            info!(image = %image, "image not present locally");
            self.pull_image(image).await?;
        }
        Ok(())
    }

    /// Tar-streams one in-memory payload to its absolute path, extracting at
    /// the container root so absolute destinations work.
    async fn write_file_to_node(&self, container_id: &str, file: &NodeFile) -> Result<()> {
        let payload = tar_payload(file.path.trim_start_matches('/'), &file.content, file.mode)?;
        self.upload_tar(container_id, payload).await
    }

    /// Copies a host certificate into `/etc/ssl/certs/` inside the container.
    async fn copy_cert_to_node(&self, container_id: &str, cert: &Path) -> Result<()> {
        let content = tokio::fs::read(cert).await?;
        let file_name = cert
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "extra-ca.pem".to_string());

        let payload = tar_payload(&format!("etc/ssl/certs/{file_name}"), &content, 0o644)?;
        self.upload_tar(container_id, payload).await
    }

    async fn upload_tar(&self, container_id: &str, payload: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions {
            path: "/".to_string(),
            ..Default::default()
        };

        self.docker
            .upload_to_container(container_id, Some(options), payload.into())
            .await?;

        Ok(())
    }

    async fn node_ip(&self, container_id: &str, network: &str, name: &str) -> Result<String> {
        let inspect = self.docker.inspect_container(container_id, None).await?;

        inspect
            .network_settings
            .and_then(|settings| settings.networks)
            .and_then(|mut networks| networks.remove(network))
            .and_then(|endpoint| endpoint.ip_address)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| RuntimeError::missing_address(name, network))
    }
}

/// Builds `key=value` label filters with AND semantics.
fn label_filters(labels: &HashMap<String, String>) -> HashMap<String, Vec<String>> {
    let filter = labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>();

    HashMap::from([("label".to_string(), filter)])
}

/// Builds a single-entry tar archive for in-container file injection.
fn tar_payload(path: &str, content: &[u8], mode: u32) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());

    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    builder.append_data(&mut header, path, content)?;

    Ok(builder.into_inner()?)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_network(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        let filters = HashMap::from([("name".to_string(), vec![name.to_string()])]);
        let existing = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await?;

        // The name filter matches substrings; check for an exact hit.
        if existing.iter().any(|n| n.name.as_deref() == Some(name)) {
            debug!(network = %name, "network already exists");
            return Ok(());
        }

        let labels: HashMap<&str, &str> = labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let response = self
            .docker
            .create_network(CreateNetworkOptions {
                name,
                driver: "bridge",
                labels,
                ..Default::default()
            })
            .await?;

        info!(network = %name, id = ?response.id, "network created");
        Ok(())
    }

    async fn run_node(&self, config: NodeConfig) -> Result<Node> {
        self.ensure_image(&config.image).await?;

        let exposed_ports: HashMap<String, HashMap<(), ()>> = config
            .ports
            .iter()
            .map(|p| (p.container_key(), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = config
            .ports
            .iter()
            .map(|p| {
                let binding = PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(p.host_port.to_string()),
                };
                (p.container_key(), Some(vec![binding]))
            })
            .collect();

        let mut mounts: Vec<Mount> = config
            .volumes
            .iter()
            .map(|v| Mount {
                source: Some(v.source.clone()),
                target: Some(v.target.clone()),
                typ: Some(if v.bind {
                    MountTypeEnum::BIND
                } else {
                    MountTypeEnum::VOLUME
                }),
                ..Default::default()
            })
            .collect();

        for target in &config.tmpfs {
            mounts.push(Mount {
                target: Some(target.clone()),
                typ: Some(MountTypeEnum::TMPFS),
                ..Default::default()
            });
        }

        let host_config = HostConfig {
            network_mode: Some(config.network.clone()),
            privileged: Some(config.privileged),
            port_bindings: Some(port_bindings),
            mounts: Some(mounts),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: (!config.command.is_empty()).then(|| config.command.clone()),
            env: (!config.env.is_empty()).then(|| config.env.clone()),
            user: config.user.clone(),
            tty: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            labels: Some(config.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: config.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), container_config)
            .await?;

        for cert in &config.extra_certs {
            self.copy_cert_to_node(&response.id, cert).await?;
        }

        for file in &config.files {
            self.write_file_to_node(&response.id, file).await?;
        }

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await?;

        let ip = self.node_ip(&response.id, &config.network, &config.name).await?;

        debug!(container = %response.id, name = %config.name, ip = %ip, "node started");

        Ok(Node {
            id: response.id,
            name: config.name,
            ip: Some(ip),
            labels: config.labels,
        })
    }

    async fn start_node(&self, node: &Node) -> Result<()> {
        self.docker
            .start_container(&node.id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_node(&self, node: &Node) -> Result<()> {
        self.docker
            .stop_container(&node.id, Some(StopContainerOptions { t: STOP_TIMEOUT_SECS }))
            .await?;
        Ok(())
    }

    async fn remove_node(&self, node: &Node) -> Result<()> {
        self.docker
            .remove_container(&node.id, None::<RemoveContainerOptions>)
            .await?;
        Ok(())
    }

    async fn logs(&self, node_name: &str, follow: bool) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow,
            ..Default::default()
        };

        let stream = self
            .docker
            .logs(node_name, Some(options))
            .map(|chunk| chunk.map(|c| c.to_string()).map_err(RuntimeError::from));

        Ok(Box::pin(stream))
    }

    async fn exec(&self, node: &Node, cmd: &[&str]) -> Result<String> {
        debug!(node = %node.name, cmd = ?cmd, "executing command");

        let options = CreateExecOptions {
            cmd: Some(cmd.iter().map(|s| s.to_string()).collect()),
            attach_stdout: Some(true),
            attach_stderr: Some(false),
            ..Default::default()
        };

        let exec = self.docker.create_exec(&node.id, options).await?;
        let started = self.docker.start_exec(&exec.id, None).await?;

        let stdout = match started {
            StartExecResults::Attached { mut output, .. } => {
                let collect = async {
                    let mut buf = String::new();
                    while let Some(chunk) = output.next().await {
                        if let LogOutput::StdOut { message } = chunk? {
                            buf.push_str(&String::from_utf8_lossy(&message));
                        }
                    }
                    Ok::<String, bollard::errors::Error>(buf)
                };

                tokio::time::timeout(EXEC_TIMEOUT, collect)
                    .await
                    .map_err(|_| RuntimeError::exec_timeout(&node.name, EXEC_TIMEOUT.as_secs()))??
            }
            StartExecResults::Detached => String::new(),
        };

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        if inspect.running == Some(true) {
            return Err(RuntimeError::exec_timeout(&node.name, EXEC_TIMEOUT.as_secs()));
        }

        Ok(stdout)
    }

    async fn nodes_by_label(&self, labels: &HashMap<String, String>) -> Result<Vec<Node>> {
        let options = ListContainersOptions {
            all: true,
            filters: label_filters(labels),
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;

        let nodes = containers
            .into_iter()
            .map(|c| {
                let name = c
                    .names
                    .unwrap_or_default()
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();

                let ip = c
                    .network_settings
                    .and_then(|settings| settings.networks)
                    .and_then(|networks| {
                        networks
                            .into_values()
                            .find_map(|endpoint| endpoint.ip_address)
                    })
                    .filter(|ip| !ip.is_empty());

                Node {
                    id: c.id.unwrap_or_default(),
                    name,
                    ip,
                    labels: c.labels.unwrap_or_default(),
                }
            })
            .collect();

        Ok(nodes)
    }

    async fn networks_by_label(&self, labels: &HashMap<String, String>) -> Result<Vec<Network>> {
        let options = ListNetworksOptions {
            filters: label_filters(labels),
        };

        let networks = self.docker.list_networks(Some(options)).await?;

        Ok(networks
            .into_iter()
            .map(|n| Network {
                id: n.id.unwrap_or_default(),
                name: n.name.unwrap_or_default(),
                labels: n.labels.unwrap_or_default(),
            })
            .collect())
    }

    async fn volumes_by_label(&self, labels: &HashMap<String, String>) -> Result<Vec<VolumeHandle>> {
        let options = ListVolumesOptions {
            filters: label_filters(labels),
        };

        let response = self.docker.list_volumes(Some(options)).await?;

        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| VolumeHandle {
                name: v.name,
                mountpoint: v.mountpoint,
                labels: v.labels,
            })
            .collect())
    }

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>) -> Result<()> {
        let filters = HashMap::from([("name".to_string(), vec![name.to_string()])]);
        let existing = self
            .docker
            .list_volumes(Some(ListVolumesOptions { filters }))
            .await?;

        if existing
            .volumes
            .unwrap_or_default()
            .iter()
            .any(|v| v.name == name)
        {
            debug!(volume = %name, "volume already exists");
            return Ok(());
        }

        let options = CreateVolumeOptions {
            name: name.to_string(),
            labels: labels.clone(),
            ..Default::default()
        };

        self.docker.create_volume(options).await?;

        debug!(volume = %name, "volume created");
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker.remove_volume(name, None).await?;
        Ok(())
    }

    async fn remove_network(&self, network: &Network) -> Result<()> {
        self.docker.remove_network(&network.id).await?;
        info!(network = %network.name, "network removed");
        Ok(())
    }
}
