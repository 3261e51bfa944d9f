//! Bootstrap request coordinator
//!
//! Asks the cluster who can serve a bootstrap, commits to the first member
//! that answers and streams from it. Every failure before the transfer starts
//! is an abandonment, not an error: the caller simply falls back to its
//! regular (slower) loader.

use crate::client::{BootstrapClient, LoadSummary};
use crate::error::BootstrapResult;
use crate::transport::ClusterTransport;

use cacheboot_common::{BootstrapMode, CacheSnapshotRequest, NodeAddress};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Why an attempt ended before any transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    /// No member besides this one
    NoPeerAvailable,
    /// Nobody answered within the response timeout
    ResponseTimeout,
    /// The first member to answer had nothing to serve
    ResponderHadNothing { peer: NodeAddress },
    /// The wait was interrupted
    Interrupted,
}

/// Result of one bootstrap attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Gave up before connecting; nothing was changed locally
    Abandoned(AbandonReason),
    /// Streamed from a peer
    Loaded(LoadSummary),
}

impl BootstrapOutcome {
    /// Whether anything was transferred
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

/// Drives bootstrap attempts for the local node
pub struct BootstrapCoordinator {
    transport: Arc<dyn ClusterTransport>,
    client: BootstrapClient,
    response_timeout: Duration,
    interrupt: Notify,
}

impl BootstrapCoordinator {
    pub fn new(
        transport: Arc<dyn ClusterTransport>,
        client: BootstrapClient,
        response_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            client,
            response_timeout,
            interrupt: Notify::new(),
        }
    }

    /// Client the coordinator streams with
    #[must_use]
    pub const fn client(&self) -> &BootstrapClient {
        &self.client
    }

    /// Abandon every attempt currently waiting for a cluster response
    ///
    /// Attempts that are already streaming are not affected.
    pub fn interrupt(&self) {
        self.interrupt.notify_waiters();
    }

    /// Run one bootstrap attempt
    pub async fn request_bootstrap(&self, mode: BootstrapMode) -> BootstrapResult<BootstrapOutcome> {
        let members = self.transport.cluster_node_addresses().await?;
        info!(members = ?members, "cluster node addresses");

        if members.len() <= 1 {
            debug!("no cluster peer found, skip loading caches from cluster");
            return Ok(BootstrapOutcome::Abandoned(AbandonReason::NoPeerAvailable));
        }

        let request = CacheSnapshotRequest::from_mode(&mode);
        debug!(mode = mode.label(), request = ?request, "requesting bootstrap endpoint");

        // Register for interruption before the request goes out
        let interrupted = self.interrupt.notified();
        tokio::pin!(interrupted);

        let mut responses = self.transport.multicast(request).await?;

        let first = tokio::select! {
            () = &mut interrupted => {
                debug!("bootstrap wait interrupted");
                return Ok(BootstrapOutcome::Abandoned(AbandonReason::Interrupted));
            }
            first = tokio::time::timeout(self.response_timeout, responses.recv()) => first,
        };
        // Later answers are not needed; their servers time out unused
        drop(responses);

        let response = match first {
            Ok(Some(response)) => response,
            Ok(None) | Err(_) => {
                warn!(
                    timeout = ?self.response_timeout,
                    "load cache from cluster timed out, no peer responded"
                );
                return Ok(BootstrapOutcome::Abandoned(AbandonReason::ResponseTimeout));
            }
        };

        let Some(endpoint) = response.endpoint else {
            // routine for a full synchronize when the cluster holds nothing new
            debug!(peer = %response.node, "cluster peer had nothing to send");
            return Ok(BootstrapOutcome::Abandoned(
                AbandonReason::ResponderHadNothing {
                    peer: response.node,
                },
            ));
        };

        debug!(peer = %response.node, endpoint = %endpoint, "streaming caches from peer");
        let summary = self.client.load(endpoint).await?;
        Ok(BootstrapOutcome::Loaded(summary))
    }
}
