//! gRPC control plane
//!
//! Statically configured members find each other with `Ping` and ask for
//! bootstrap endpoints with `RequestBootstrapEndpoint`. Bulk cache data never
//! travels here; it goes over the one-shot transfer sockets.

use crate::error::{BootstrapError, BootstrapResult};
use crate::transport::{BootstrapHandler, ClusterTransport};

use async_trait::async_trait;
use cacheboot_common::{
    BootstrapConfig, BootstrapEndpoint, CacheSnapshotRequest, NodeAddress, NodeId, NodeResponse,
};
use cacheboot_proto::control::control_plane_client::ControlPlaneClient;
use cacheboot_proto::control::control_plane_server::{ControlPlane, ControlPlaneServer};
use cacheboot_proto::control::{
    BootstrapEndpointRequest, BootstrapEndpointResponse, NodeInfo, PingRequest, PingResponse,
};
use futures::future::join_all;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Endpoint, Server};
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

fn node_info(node: &NodeAddress) -> NodeInfo {
    NodeInfo {
        id: node.id.to_string(),
        name: node.name.clone(),
    }
}

fn node_address(info: Option<NodeInfo>) -> BootstrapResult<NodeAddress> {
    let info = info.ok_or_else(|| BootstrapError::protocol("response without node identity"))?;
    let id: NodeId = info
        .id
        .parse()
        .map_err(|e| BootstrapError::protocol(format!("bad node id {:?}: {e}", info.id)))?;
    Ok(NodeAddress {
        id,
        name: info.name,
    })
}

fn endpoint_request(request: &CacheSnapshotRequest) -> BootstrapEndpointRequest {
    BootstrapEndpointRequest {
        discover_all: request.discover_all(),
        known_cache_names: request.known_cache_names().iter().cloned().collect(),
        to_load_cache_names: request.to_load_cache_names().to_vec(),
    }
}

fn snapshot_request(request: BootstrapEndpointRequest) -> CacheSnapshotRequest {
    CacheSnapshotRequest::from_parts(
        request.discover_all,
        request.known_cache_names,
        request.to_load_cache_names,
    )
}

fn node_response(response: BootstrapEndpointResponse) -> BootstrapResult<NodeResponse> {
    let node = node_address(response.node)?;
    let endpoint = response
        .endpoint
        .map(|addr| {
            addr.parse::<SocketAddr>()
                .map(BootstrapEndpoint::new)
                .map_err(|_| BootstrapError::protocol(format!("bad endpoint address {addr:?}")))
        })
        .transpose()?;
    Ok(NodeResponse { node, endpoint })
}

/// Answers control-plane calls for the local member
pub struct RpcServer {
    local: NodeAddress,
    handler: Arc<dyn BootstrapHandler>,
}

impl RpcServer {
    pub fn new(local: NodeAddress, handler: Arc<dyn BootstrapHandler>) -> Self {
        Self { local, handler }
    }

    /// Serve the control plane on `listener` until the task is dropped
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> BootstrapResult<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(node = %self.local, addr = %addr, "control plane listening");
        }

        Server::builder()
            .add_service(ControlPlaneServer::from_arc(self))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .map_err(|e| BootstrapError::rpc(format!("control plane server: {e}")))
    }
}

#[tonic::async_trait]
impl ControlPlane for RpcServer {
    async fn ping(&self, _request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        Ok(Response::new(PingResponse {
            node: Some(node_info(&self.local)),
        }))
    }

    async fn request_bootstrap_endpoint(
        &self,
        request: Request<BootstrapEndpointRequest>,
    ) -> Result<Response<BootstrapEndpointResponse>, Status> {
        let request = snapshot_request(request.into_inner());
        let endpoint = self.handler.create_bootstrap_endpoint(&request).await;
        debug!(endpoint = ?endpoint, "answered bootstrap request");

        Ok(Response::new(BootstrapEndpointResponse {
            node: Some(node_info(&self.local)),
            endpoint: endpoint.map(|endpoint| endpoint.addr().to_string()),
        }))
    }
}

/// Cluster transport over the gRPC control plane with a static peer list
pub struct TcpClusterTransport {
    local: NodeAddress,
    peers: Vec<(SocketAddr, ControlPlaneClient<Channel>)>,
}

impl TcpClusterTransport {
    /// Create lazily connected clients for every peer
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        local: NodeAddress,
        peers: Vec<SocketAddr>,
        config: &BootstrapConfig,
    ) -> BootstrapResult<Self> {
        let peers = peers
            .into_iter()
            .map(|addr| {
                let channel = Endpoint::from_shared(format!("http://{addr}"))
                    .map_err(|e| BootstrapError::rpc(format!("invalid peer address {addr}: {e}")))?
                    .connect_timeout(config.connect_timeout())
                    .timeout(config.node_bootup_response_timeout())
                    .connect_lazy();
                Ok((addr, ControlPlaneClient::new(channel)))
            })
            .collect::<BootstrapResult<Vec<_>>>()?;

        Ok(Self { local, peers })
    }
}

#[async_trait]
impl ClusterTransport for TcpClusterTransport {
    fn local_address(&self) -> NodeAddress {
        self.local.clone()
    }

    async fn cluster_node_addresses(&self) -> BootstrapResult<Vec<NodeAddress>> {
        let pings = self.peers.iter().map(|(addr, client)| {
            let mut client = client.clone();
            async move { (*addr, client.ping(PingRequest {}).await) }
        });

        let mut members = vec![self.local.clone()];
        for (addr, result) in join_all(pings).await {
            match result.map(|response| node_address(response.into_inner().node)) {
                Ok(Ok(node)) => members.push(node),
                Ok(Err(e)) => warn!(peer = %addr, error = %e, "unexpected ping response"),
                Err(status) => debug!(peer = %addr, status = %status, "peer unreachable"),
            }
        }
        Ok(members)
    }

    async fn multicast(
        &self,
        request: CacheSnapshotRequest,
    ) -> BootstrapResult<mpsc::Receiver<NodeResponse>> {
        let (tx, rx) = mpsc::channel(self.peers.len().max(1));
        let request = endpoint_request(&request);

        for (addr, client) in &self.peers {
            let (addr, mut client) = (*addr, client.clone());
            let tx = tx.clone();
            let request = request.clone();
            tokio::spawn(async move {
                match client.request_bootstrap_endpoint(request).await {
                    Ok(response) => match node_response(response.into_inner()) {
                        Ok(response) => {
                            // the requester may have stopped listening already
                            let _ = tx.send(response).await;
                        }
                        Err(e) => warn!(peer = %addr, error = %e, "unexpected bootstrap response"),
                    },
                    Err(status) => debug!(peer = %addr, status = %status, "bootstrap request failed"),
                }
            });
        }

        Ok(rx)
    }
}
