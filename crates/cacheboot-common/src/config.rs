//! Configuration types for cacheboot
//!
//! This module defines the bootstrap tuning knobs and the node identity used
//! by the daemon. Every field has a default so partial TOML files load.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Root configuration for a cacheboot node
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node configuration
    pub node: NodeConfig,
    /// Bootstrap configuration
    pub bootstrap: BootstrapConfig,
}

impl Config {
    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.node.validate()?;
        self.bootstrap.validate()
    }
}

/// Node identity and control-plane configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name (human-readable identifier)
    pub name: String,
    /// Address the control-plane RPC listener binds to
    pub rpc_listen: SocketAddr,
    /// Control-plane addresses of the other cluster members
    pub peers: Vec<SocketAddr>,
    /// Caches created when the node starts
    pub caches: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "cacheboot-node".to_string(),
            rpc_listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 7700),
            peers: Vec::new(),
            caches: Vec::new(),
        }
    }
}

impl NodeConfig {
    fn validate(&self) -> Result<()> {
        if self.peers.contains(&self.rpc_listen) {
            return Err(Error::configuration(format!(
                "node.peers must not contain the node's own address {}",
                self.rpc_listen
            )));
        }
        if self.caches.iter().any(String::is_empty) {
            return Err(Error::configuration("node.caches contains an empty name"));
        }
        Ok(())
    }
}

/// Bootstrap transfer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Address the transient transfer listeners bind to
    pub bind_addr: IpAddr,
    /// Host handed out in endpoints (defaults to `bind_addr`)
    pub advertise_host: Option<IpAddr>,
    /// First port tried for a transfer listener (0 = any ephemeral port)
    pub socket_start_port: u16,
    /// Number of consecutive ports tried before giving up
    pub port_scan_limit: u16,
    /// How long a transfer listener waits for its single client (milliseconds)
    pub accept_timeout_ms: u64,
    /// How long a requester waits for the first peer response (milliseconds)
    pub node_bootup_response_timeout_ms: u64,
    /// Connect timeout for the transfer socket (milliseconds)
    pub connect_timeout_ms: u64,
    /// Per-read timeout on the transfer socket (milliseconds, none = unbounded)
    pub socket_read_timeout_ms: Option<u64>,
    /// Largest single name, key or value accepted on the wire
    pub max_frame_bytes: u32,
    /// Run cache-creation bootstraps in the background
    pub bootstrap_asynchronously: bool,
    /// Pull unknown caches from the cluster when the node starts
    pub synchronize_on_start: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            advertise_host: None,
            socket_start_port: 7800,
            port_scan_limit: 100,
            accept_timeout_ms: 10_000,
            node_bootup_response_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            socket_read_timeout_ms: None,
            max_frame_bytes: 64 * 1024 * 1024, // 64 MB
            bootstrap_asynchronously: true,
            synchronize_on_start: true,
        }
    }
}

impl BootstrapConfig {
    /// Accept timeout of a transfer listener
    #[must_use]
    pub const fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    /// Wait bound for the first cluster response
    #[must_use]
    pub const fn node_bootup_response_timeout(&self) -> Duration {
        Duration::from_millis(self.node_bootup_response_timeout_ms)
    }

    /// Connect timeout of the transfer socket
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-read timeout of the transfer socket, if any
    #[must_use]
    pub fn socket_read_timeout(&self) -> Option<Duration> {
        self.socket_read_timeout_ms.map(Duration::from_millis)
    }

    /// Host written into the endpoints this node hands out
    #[must_use]
    pub fn endpoint_host(&self) -> IpAddr {
        self.advertise_host.unwrap_or(self.bind_addr)
    }

    /// Check the values for consistency
    pub fn validate(&self) -> Result<()> {
        if self.accept_timeout_ms == 0 {
            return Err(Error::configuration("bootstrap.accept_timeout_ms must be positive"));
        }
        if self.node_bootup_response_timeout_ms == 0 {
            return Err(Error::configuration(
                "bootstrap.node_bootup_response_timeout_ms must be positive",
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::configuration("bootstrap.connect_timeout_ms must be positive"));
        }
        if self.socket_read_timeout_ms == Some(0) {
            return Err(Error::configuration(
                "bootstrap.socket_read_timeout_ms must be positive when set",
            ));
        }
        if self.port_scan_limit == 0 {
            return Err(Error::configuration("bootstrap.port_scan_limit must be positive"));
        }
        if self.max_frame_bytes == 0 {
            return Err(Error::configuration("bootstrap.max_frame_bytes must be positive"));
        }
        if self.endpoint_host().is_unspecified() {
            return Err(Error::configuration(
                "bootstrap.advertise_host is required when bind_addr is unspecified",
            ));
        }
        Ok(())
    }
}
