//! cacheboot Stream
//!
//! Warms the caches of a joining node by streaming them from a peer that
//! already holds them. A requester multicasts what it wants, commits to the
//! first peer that answers with an endpoint, and reads a single tagged stream
//! of cache blocks from a one-shot server the peer opened for it.
//!
//! # Architecture
//!
//! ```text
//!   requester                                   peer
//! ┌────────────────────┐  CacheSnapshotRequest ┌────────────────────┐
//! │ BootstrapCoordinator│─────multicast────────▶│ BootstrapResponder │
//! │                    │◀───NodeResponse───────│  send-set, bind    │
//! └─────────┬──────────┘  (first one wins)     └─────────┬──────────┘
//!           │                                            │ spawn
//! ┌─────────▼──────────┐   magic/version, blocks ┌───────▼──────────┐
//! │  BootstrapClient   │◀────────────────────────│ BootstrapServer  │
//! │  (guarded puts)    │        End tag          │ (one connection) │
//! └────────────────────┘                         └──────────────────┘
//! ```
//!
//! Membership and multicast go through [`ClusterTransport`]: in-process with
//! [`LocalCluster`], over TCP with [`TcpClusterTransport`].

pub mod client;
pub mod codec;
pub mod coordinator;
pub mod error;
pub mod loader;
pub mod responder;
pub mod rpc;
pub mod server;
pub mod transport;

pub use client::{BootstrapClient, LoadSummary};
pub use coordinator::{AbandonReason, BootstrapCoordinator, BootstrapOutcome};
pub use error::{BootstrapError, BootstrapResult};
pub use loader::BootstrapCacheLoader;
pub use responder::BootstrapResponder;
pub use rpc::{RpcServer, TcpClusterTransport};
pub use server::{BootstrapServer, ServeOutcome, StreamSummary};
pub use transport::{BootstrapHandler, ClusterTransport, LocalCluster, LocalTransport};
