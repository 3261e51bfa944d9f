//! In-process cluster
//!
//! Members of a [`LocalCluster`] live in the same process and reach each
//! other's [`BootstrapHandler`] directly. Used to embed several nodes in one
//! process and to exercise the protocol end to end over real sockets.

use super::{BootstrapHandler, ClusterTransport};
use crate::error::BootstrapResult;

use async_trait::async_trait;
use cacheboot_common::{CacheSnapshotRequest, NodeAddress, NodeId, NodeResponse};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

struct LocalMember {
    address: NodeAddress,
    handler: Arc<dyn BootstrapHandler>,
}

/// Registry of in-process members
#[derive(Default)]
pub struct LocalCluster {
    members: RwLock<Vec<LocalMember>>,
}

impl LocalCluster {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a member answering requests with `handler`
    pub fn join(
        self: &Arc<Self>,
        name: impl Into<String>,
        handler: Arc<dyn BootstrapHandler>,
    ) -> LocalTransport {
        let address = NodeAddress::new(name);
        self.members.write().push(LocalMember {
            address: address.clone(),
            handler,
        });
        debug!(node = %address, "joined local cluster");

        LocalTransport {
            cluster: Arc::clone(self),
            address,
        }
    }

    /// Remove a member
    pub fn leave(&self, id: NodeId) {
        self.members.write().retain(|member| member.address.id != id);
    }

    /// Number of members
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One member's view of a [`LocalCluster`]
#[derive(Clone)]
pub struct LocalTransport {
    cluster: Arc<LocalCluster>,
    address: NodeAddress,
}

#[async_trait]
impl ClusterTransport for LocalTransport {
    fn local_address(&self) -> NodeAddress {
        self.address.clone()
    }

    async fn cluster_node_addresses(&self) -> BootstrapResult<Vec<NodeAddress>> {
        Ok(self
            .cluster
            .members
            .read()
            .iter()
            .map(|member| member.address.clone())
            .collect())
    }

    async fn multicast(
        &self,
        request: CacheSnapshotRequest,
    ) -> BootstrapResult<mpsc::Receiver<NodeResponse>> {
        let peers: Vec<(NodeAddress, Arc<dyn BootstrapHandler>)> = self
            .cluster
            .members
            .read()
            .iter()
            .filter(|member| member.address.id != self.address.id)
            .map(|member| (member.address.clone(), Arc::clone(&member.handler)))
            .collect();

        let (tx, rx) = mpsc::channel(peers.len().max(1));
        let request = Arc::new(request);

        for (node, handler) in peers {
            let tx = tx.clone();
            let request = Arc::clone(&request);
            tokio::spawn(async move {
                let endpoint = handler.create_bootstrap_endpoint(&request).await;
                // the requester may have stopped listening already
                let _ = tx.send(NodeResponse { node, endpoint }).await;
            });
        }

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cacheboot_common::{BootstrapEndpoint, BootstrapMode};
    use std::net::{Ipv4Addr, SocketAddr};

    struct FixedHandler(Option<SocketAddr>);

    #[async_trait]
    impl BootstrapHandler for FixedHandler {
        async fn create_bootstrap_endpoint(
            &self,
            _request: &CacheSnapshotRequest,
        ) -> Option<BootstrapEndpoint> {
            self.0.map(BootstrapEndpoint::new)
        }
    }

    fn request() -> CacheSnapshotRequest {
        CacheSnapshotRequest::from_mode(&BootstrapMode::Targeted(vec!["A".into()]))
    }

    #[tokio::test]
    async fn test_multicast_skips_self() {
        let cluster = LocalCluster::new();
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 9));
        let a = cluster.join("a", Arc::new(FixedHandler(None)));
        let b = cluster.join("b", Arc::new(FixedHandler(Some(addr))));

        assert_eq!(a.cluster_node_addresses().await.unwrap().len(), 2);

        let mut rx = a.multicast(request()).await.unwrap();
        let response = rx.recv().await.unwrap();
        assert_eq!(response.node, b.local_address());
        assert_eq!(response.endpoint.unwrap().addr(), addr);
        // only one other member, so the channel closes
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_leave() {
        let cluster = LocalCluster::new();
        let a = cluster.join("a", Arc::new(FixedHandler(None)));
        let b = cluster.join("b", Arc::new(FixedHandler(None)));
        cluster.leave(b.local_address().id);

        assert_eq!(cluster.len(), 1);
        let mut rx = a.multicast(request()).await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
