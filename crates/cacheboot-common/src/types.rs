//! Core type definitions for cacheboot
//!
//! This module defines the identifiers and messages exchanged between cluster
//! members while negotiating a cache bootstrap.

use derive_more::{From, Into};
use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a cluster member
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, From, Into)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a new random node ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a cluster member, as reported by the cluster transport
///
/// Only used for diagnostics and for counting live members.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    /// Member identity
    pub id: NodeId,
    /// Human-readable member name
    pub name: String,
}

impl NodeAddress {
    /// Create a new address with a fresh identity
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.id)
    }
}

/// How a requester wants its caches filled
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootstrapMode {
    /// Fill exactly these freshly created caches
    Targeted(Vec<String>),
    /// These are the caches I hold; send me every other cache you have
    FullSynchronize(Vec<String>),
}

impl BootstrapMode {
    /// Short label for logs
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Targeted(_) => "targeted",
            Self::FullSynchronize(_) => "full-synchronize",
        }
    }
}

/// Negotiation parameters multicast to the cluster
///
/// Built once per bootstrap attempt and never modified afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheSnapshotRequest {
    discover_all: bool,
    known_cache_names: BTreeSet<String>,
    to_load_cache_names: Vec<String>,
}

impl CacheSnapshotRequest {
    /// Build the request for a bootstrap mode
    #[must_use]
    pub fn from_mode(mode: &BootstrapMode) -> Self {
        match mode {
            BootstrapMode::Targeted(names) => Self {
                discover_all: false,
                known_cache_names: BTreeSet::new(),
                to_load_cache_names: names.clone(),
            },
            BootstrapMode::FullSynchronize(names) => Self {
                discover_all: true,
                known_cache_names: names.iter().cloned().collect(),
                to_load_cache_names: Vec::new(),
            },
        }
    }

    /// Rebuild a request received from another member
    #[must_use]
    pub fn from_parts<I>(discover_all: bool, known_cache_names: I, to_load_cache_names: Vec<String>) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            discover_all,
            known_cache_names: known_cache_names.into_iter().collect(),
            to_load_cache_names,
        }
    }

    /// Whether the responder should reveal caches the requester does not know
    #[must_use]
    pub const fn discover_all(&self) -> bool {
        self.discover_all
    }

    /// Names the requester already holds
    #[must_use]
    pub const fn known_cache_names(&self) -> &BTreeSet<String> {
        &self.known_cache_names
    }

    /// Names the requester explicitly asked for
    #[must_use]
    pub fn to_load_cache_names(&self) -> &[String] {
        &self.to_load_cache_names
    }

    /// Compute the names a responder holding `local_names` should stream
    ///
    /// Targeted requests get exactly the named caches, whether or not the
    /// responder holds them. Discovery requests get the named caches plus
    /// every local cache, minus whatever the requester already knows.
    /// Duplicates are dropped and first-seen order is kept.
    #[must_use]
    pub fn send_set<I>(&self, local_names: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut seen = BTreeSet::new();
        let mut send_set = Vec::new();

        let mut offer = |name: String| {
            if !self.discover_all || !self.known_cache_names.contains(&name) {
                if seen.insert(name.clone()) {
                    send_set.push(name);
                }
            }
        };

        for name in &self.to_load_cache_names {
            offer(name.clone());
        }
        if self.discover_all {
            for name in local_names {
                offer(name);
            }
        }

        send_set
    }
}

/// Address of a transient transfer listener
///
/// Valid for a single connection attempt; the client consumes it by value.
#[derive(Debug, PartialEq, Eq)]
pub struct BootstrapEndpoint {
    addr: SocketAddr,
}

impl BootstrapEndpoint {
    /// Wrap a listener address
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Socket address to connect to
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for BootstrapEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// One member's answer to a bootstrap request
#[derive(Debug)]
pub struct NodeResponse {
    /// Member that answered
    pub node: NodeAddress,
    /// Endpoint to stream from, or `None` when the member had nothing to serve
    pub endpoint: Option<BootstrapEndpoint>,
}
