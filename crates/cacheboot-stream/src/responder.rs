//! Responder side of the negotiation
//!
//! Answering a bootstrap request starts a one-shot [`BootstrapServer`] for
//! the computed send-set and hands its endpoint back to the requester.

use crate::server::BootstrapServer;
use crate::transport::BootstrapHandler;

use async_trait::async_trait;
use cacheboot_cache::CacheManager;
use cacheboot_common::{BootstrapConfig, BootstrapEndpoint, CacheSnapshotRequest};
use std::sync::Arc;
use tracing::{debug, warn};

/// Serves bootstrap requests from the local cache manager
pub struct BootstrapResponder {
    manager: Arc<dyn CacheManager>,
    config: BootstrapConfig,
}

impl BootstrapResponder {
    pub fn new(manager: Arc<dyn CacheManager>, config: BootstrapConfig) -> Self {
        Self { manager, config }
    }
}

#[async_trait]
impl BootstrapHandler for BootstrapResponder {
    async fn create_bootstrap_endpoint(
        &self,
        request: &CacheSnapshotRequest,
    ) -> Option<BootstrapEndpoint> {
        let send_set = request.send_set(self.manager.cache_names());
        if send_set.is_empty() {
            debug!(
                known = request.known_cache_names().len(),
                "nothing to send for bootstrap request"
            );
            return None;
        }

        match BootstrapServer::bind(&self.config, Arc::clone(&self.manager), send_set).await {
            Ok(server) => {
                let endpoint = server.endpoint();
                // detached; the server logs its own failures
                drop(server.spawn());
                Some(endpoint)
            }
            Err(e) => {
                warn!(error = %e, "failed to open bootstrap server socket");
                None
            }
        }
    }
}
