//! Node creation requests.
//!
//! A [`NodeConfig`] is what a service factory hands to the runtime: image,
//! name, network, command, mounts, port publications, labels, and any files
//! to inject before start. Configuration travels inside the container as
//! injected files rather than host bind-mounts, so the provisioner has no
//! host-filesystem dependency beyond extra CA certificates.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Port protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// TCP protocol.
    Tcp,
    /// UDP protocol.
    Udp,
}

impl Protocol {
    /// Returns the engine protocol string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::Tcp
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A container-port to host-port publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPublication {
    /// Port inside the container.
    pub container_port: u16,

    /// Port bound on the host (all interfaces).
    pub host_port: u16,

    /// Protocol.
    pub protocol: Protocol,
}

impl PortPublication {
    /// Publishes a TCP container port on the same host port.
    pub fn tcp(port: u16) -> Self {
        Self {
            container_port: port,
            host_port: port,
            protocol: Protocol::Tcp,
        }
    }

    /// Returns the engine port key, e.g. `4646/tcp`.
    pub fn container_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// A volume mount request: either a named volume or a host bind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Volume name (named volume) or host path (bind mount).
    pub source: String,

    /// Mount destination inside the container.
    pub target: String,

    /// Whether this is a host bind mount rather than a named volume.
    pub bind: bool,
}

impl VolumeSpec {
    /// Creates a named volume mount.
    pub fn named(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: name.into(),
            target: target.into(),
            bind: false,
        }
    }

    /// Creates a host bind mount.
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            bind: true,
        }
    }
}

/// An in-memory file injected into a node before it starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFile {
    /// File content.
    pub content: Vec<u8>,

    /// Absolute in-container path.
    pub path: String,

    /// Unix file mode.
    pub mode: u32,
}

impl NodeFile {
    /// Creates a file payload.
    pub fn new(content: impl Into<Vec<u8>>, path: impl Into<String>, mode: u32) -> Self {
        Self {
            content: content.into(),
            path: path.into(),
            mode,
        }
    }
}

/// Everything the runtime needs to create and start one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Container image reference.
    pub image: String,

    /// Node name (deterministic per cluster and role).
    pub name: String,

    /// Cluster network to attach to.
    pub network: String,

    /// Command override; empty keeps the image default.
    pub command: Vec<String>,

    /// Environment entries in `KEY=value` form.
    pub env: Vec<String>,

    /// User to run as, when the image default is not wanted.
    pub user: Option<String>,

    /// Volume mounts.
    pub volumes: Vec<VolumeSpec>,

    /// Tmpfs mount targets.
    pub tmpfs: Vec<String>,

    /// Whether the container runs privileged.
    pub privileged: bool,

    /// Host port publications.
    pub ports: Vec<PortPublication>,

    /// Labels to attach.
    pub labels: HashMap<String, String>,

    /// Host paths of extra CA certificates to copy into `/etc/ssl/certs/`.
    pub extra_certs: Vec<PathBuf>,

    /// Files to inject before start.
    pub files: Vec<NodeFile>,
}

impl NodeConfig {
    /// Creates a new node config builder.
    pub fn builder(
        image: impl Into<String>,
        name: impl Into<String>,
        network: impl Into<String>,
    ) -> NodeConfigBuilder {
        NodeConfigBuilder::new(image, name, network)
    }
}

/// Builder for [`NodeConfig`].
#[derive(Debug)]
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    /// Creates a builder with the required fields set.
    pub fn new(
        image: impl Into<String>,
        name: impl Into<String>,
        network: impl Into<String>,
    ) -> Self {
        Self {
            config: NodeConfig {
                image: image.into(),
                name: name.into(),
                network: network.into(),
                command: Vec::new(),
                env: Vec::new(),
                user: None,
                volumes: Vec::new(),
                tmpfs: Vec::new(),
                privileged: false,
                ports: Vec::new(),
                labels: HashMap::new(),
                extra_certs: Vec::new(),
                files: Vec::new(),
            },
        }
    }

    /// Sets the command.
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an environment entry.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .env
            .push(format!("{}={}", key.into(), value.into()));
        self
    }

    /// Sets the user.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = Some(user.into());
        self
    }

    /// Adds a volume mount.
    pub fn volume(mut self, volume: VolumeSpec) -> Self {
        self.config.volumes.push(volume);
        self
    }

    /// Adds a tmpfs mount target.
    pub fn tmpfs(mut self, target: impl Into<String>) -> Self {
        self.config.tmpfs.push(target.into());
        self
    }

    /// Marks the node privileged.
    pub fn privileged(mut self) -> Self {
        self.config.privileged = true;
        self
    }

    /// Adds a port publication.
    pub fn port(mut self, port: PortPublication) -> Self {
        self.config.ports.push(port);
        self
    }

    /// Sets the label map.
    pub fn labels(mut self, labels: HashMap<String, String>) -> Self {
        self.config.labels = labels;
        self
    }

    /// Adds one label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.labels.insert(key.into(), value.into());
        self
    }

    /// Adds host paths of extra CA certificates.
    pub fn extra_certs<I>(mut self, certs: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.config.extra_certs.extend(certs);
        self
    }

    /// Adds a file to inject.
    pub fn file(mut self, file: NodeFile) -> Self {
        self.config.files.push(file);
        self
    }

    /// Builds the node config.
    pub fn build(self) -> NodeConfig {
        self.config
    }
}
