//! Cache-creation hook that fills new caches from the cluster
//!
//! Registered as a [`CacheCreationListener`], the loader asks the cluster for
//! the contents of every cache created through the normal path. Caches that
//! a bootstrap creates itself are skipped, see [`cacheboot_cache::guard`].
//! Bootstrap is an accelerator only: failures are logged and never reach the
//! code that created the cache.

use crate::coordinator::{BootstrapCoordinator, BootstrapOutcome};
use crate::error::BootstrapResult;

use cacheboot_cache::{CacheCreationListener, CacheManager, is_skipping};
use cacheboot_common::BootstrapMode;
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

/// Bootstraps caches as they are created
pub struct BootstrapCacheLoader {
    coordinator: Arc<BootstrapCoordinator>,
    runtime: Handle,
    asynchronous: bool,
}

impl BootstrapCacheLoader {
    /// Create a loader that runs bootstraps on `runtime`
    pub fn new(coordinator: Arc<BootstrapCoordinator>, runtime: Handle, asynchronous: bool) -> Self {
        Self {
            coordinator,
            runtime,
            asynchronous,
        }
    }

    /// Pull every cache this node does not know about yet
    pub async fn synchronize(&self, manager: &dyn CacheManager) -> Option<BootstrapOutcome> {
        let known = manager.cache_names();
        debug!(known = ?known, "synchronizing caches with cluster");
        report(
            "*",
            self.coordinator
                .request_bootstrap(BootstrapMode::FullSynchronize(known))
                .await,
        )
    }

    /// Fill one freshly created cache
    pub async fn load(&self, cache_name: &str) -> Option<BootstrapOutcome> {
        report(
            cache_name,
            self.coordinator
                .request_bootstrap(BootstrapMode::Targeted(vec![cache_name.to_string()]))
                .await,
        )
    }

    fn load_blocking(&self, cache_name: &str) {
        let fut = self.load(cache_name);
        match Handle::try_current() {
            // Inside a runtime: park this worker while the bootstrap runs
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| current.block_on(fut));
            }
            Ok(_) => {
                warn!(
                    cache = cache_name,
                    "cannot block a current-thread runtime, loading in the background"
                );
                drop(fut);
                self.spawn_load(cache_name);
            }
            Err(_) => {
                self.runtime.block_on(fut);
            }
        }
    }

    fn spawn_load(&self, cache_name: &str) {
        let coordinator = Arc::clone(&self.coordinator);
        let cache_name = cache_name.to_string();
        self.runtime.spawn(async move {
            let mode = BootstrapMode::Targeted(vec![cache_name.clone()]);
            report(&cache_name, coordinator.request_bootstrap(mode).await);
        });
    }
}

impl CacheCreationListener for BootstrapCacheLoader {
    fn cache_created(&self, cache_name: &str) {
        if is_skipping() {
            debug!(cache = cache_name, "cache created by bootstrap, not loading it");
            return;
        }

        if self.asynchronous {
            self.spawn_load(cache_name);
        } else {
            self.load_blocking(cache_name);
        }
    }
}

fn report(scope: &str, result: BootstrapResult<BootstrapOutcome>) -> Option<BootstrapOutcome> {
    match result {
        Ok(outcome) => {
            match &outcome {
                BootstrapOutcome::Loaded(summary) => info!(
                    scope,
                    caches = ?summary.caches,
                    records = summary.records_applied,
                    "bootstrapped caches from cluster"
                ),
                BootstrapOutcome::Abandoned(reason) => {
                    debug!(scope, reason = ?reason, "bootstrap abandoned");
                }
            }
            Some(outcome)
        }
        Err(e) => {
            warn!(scope, error = %e, "failed to bootstrap caches from cluster");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BootstrapClient;
    use crate::responder::BootstrapResponder;
    use crate::transport::{ClusterTransport, LocalCluster, LocalTransport};
    use async_trait::async_trait;
    use cacheboot_cache::MemoryCacheManager;
    use cacheboot_common::{BootstrapConfig, CacheSnapshotRequest, NodeAddress, NodeResponse};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config() -> BootstrapConfig {
        BootstrapConfig {
            socket_start_port: 0,
            accept_timeout_ms: 2_000,
            ..BootstrapConfig::default()
        }
    }

    /// Local transport that remembers every request it multicasts
    struct RecordingTransport {
        inner: LocalTransport,
        requests: Mutex<Vec<CacheSnapshotRequest>>,
    }

    #[async_trait]
    impl ClusterTransport for RecordingTransport {
        fn local_address(&self) -> NodeAddress {
            self.inner.local_address()
        }

        async fn cluster_node_addresses(&self) -> BootstrapResult<Vec<NodeAddress>> {
            self.inner.cluster_node_addresses().await
        }

        async fn multicast(
            &self,
            request: CacheSnapshotRequest,
        ) -> BootstrapResult<mpsc::Receiver<NodeResponse>> {
            self.requests.lock().push(request.clone());
            self.inner.multicast(request).await
        }
    }

    struct Node {
        manager: Arc<MemoryCacheManager>,
        loader: Arc<BootstrapCacheLoader>,
        transport: Arc<RecordingTransport>,
    }

    fn join(cluster: &Arc<LocalCluster>, name: &str, asynchronous: bool) -> Node {
        let manager = Arc::new(MemoryCacheManager::new());
        let responder = Arc::new(BootstrapResponder::new(manager.clone(), config()));
        let transport = Arc::new(RecordingTransport {
            inner: cluster.join(name, responder),
            requests: Mutex::new(Vec::new()),
        });
        let coordinator = Arc::new(BootstrapCoordinator::new(
            transport.clone(),
            BootstrapClient::new(manager.clone(), config()),
            Duration::from_secs(2),
        ));
        let loader = Arc::new(BootstrapCacheLoader::new(
            coordinator,
            Handle::current(),
            asynchronous,
        ));
        manager.register_listener(loader.clone());
        Node {
            manager,
            loader,
            transport,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_synchronous_load_on_creation() {
        let cluster = LocalCluster::new();
        let server = join(&cluster, "server", false);

        // alone in the cluster; this load is abandoned
        let a = server.manager.add_cache("A").unwrap();
        a.put("k1".into(), "v1".into());

        // creating the cache on a new member fills it before returning
        let requester = join(&cluster, "requester", false);
        let local = requester.manager.add_cache("A").unwrap();
        assert_eq!(local.get(&"k1".into()), Some("v1".into()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_asynchronous_load_on_creation() {
        let cluster = LocalCluster::new();
        // synchronous here so its own abandoned load finishes before anyone joins
        let server = join(&cluster, "server", false);
        server.manager.add_cache("A").unwrap().put("k1".into(), "v1".into());

        let requester = join(&cluster, "requester", true);
        let local = requester.manager.add_cache("A").unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while local.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "cache never filled");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(local.get(&"k1".into()), Some("v1".into()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bootstrap_created_caches_do_not_recurse() {
        let cluster = LocalCluster::new();
        let server = join(&cluster, "server", false);
        server.manager.add_cache("A").unwrap().put("k1".into(), "v1".into());
        server.manager.add_cache("B").unwrap().put("k2".into(), "v2".into());
        let requester = join(&cluster, "requester", false);

        // "A" and "B" are created on the requester by the transfer itself
        let outcome = requester
            .loader
            .synchronize(requester.manager.as_ref())
            .await
            .unwrap();
        let BootstrapOutcome::Loaded(summary) = outcome else {
            panic!("expected a transfer, got {outcome:?}");
        };
        assert_eq!(summary.caches.len(), 2);
        assert_eq!(requester.manager.cache_names().len(), 2);
        assert!(!is_skipping());

        // only the synchronize itself went out; no targeted load per created cache
        let requests = requester.transport.requests.lock();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].discover_all());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_user_created_cache_sends_one_targeted_request() {
        let cluster = LocalCluster::new();
        let server = join(&cluster, "server", false);
        server.manager.add_cache("A").unwrap().put("k1".into(), "v1".into());
        let requester = join(&cluster, "requester", false);

        requester.manager.add_cache("A").unwrap();

        let requests = requester.transport.requests.lock();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].discover_all());
        assert_eq!(requests[0].to_load_cache_names(), ["A".to_string()]);
    }

    #[tokio::test]
    async fn test_lone_node_is_unaffected() {
        let cluster = LocalCluster::new();
        let node = join(&cluster, "alone", true);

        node.manager.add_cache("A").unwrap();
        let outcome = node.loader.load("A").await.unwrap();
        assert!(!outcome.is_loaded());
    }
}
