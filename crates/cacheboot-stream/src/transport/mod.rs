//! Cluster transport seam
//!
//! The bootstrap protocol only needs two things from cluster membership: the
//! list of live members and a way to multicast a request and collect the
//! answers as they arrive. [`local`] wires members together in-process;
//! [`crate::rpc`] does it over TCP.

pub mod local;

use crate::error::BootstrapResult;

use async_trait::async_trait;
use cacheboot_common::{BootstrapEndpoint, CacheSnapshotRequest, NodeAddress, NodeResponse};
use tokio::sync::mpsc;

pub use local::{LocalCluster, LocalTransport};

/// Membership and multicast facility used by the coordinator
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// This member's own address
    fn local_address(&self) -> NodeAddress;

    /// Live members, this one included
    async fn cluster_node_addresses(&self) -> BootstrapResult<Vec<NodeAddress>>;

    /// Send `request` to every other member
    ///
    /// Responses are delivered as they complete. Dropping the receiver
    /// discards whatever is still in flight.
    async fn multicast(
        &self,
        request: CacheSnapshotRequest,
    ) -> BootstrapResult<mpsc::Receiver<NodeResponse>>;
}

/// Answers bootstrap requests arriving from other members
#[async_trait]
pub trait BootstrapHandler: Send + Sync {
    /// Start serving `request` and return where to connect, if anywhere
    async fn create_bootstrap_endpoint(
        &self,
        request: &CacheSnapshotRequest,
    ) -> Option<BootstrapEndpoint>;
}
