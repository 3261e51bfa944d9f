//! Bootstrap client
//!
//! Connects to a peer's one-shot endpoint and applies the streamed records to
//! the local cache manager. Records already applied stay applied when the
//! transfer fails part way; the regular loader fills any gaps later.

use crate::codec::{StreamReader, WireItem};
use crate::error::{BootstrapError, BootstrapResult};

use cacheboot_cache::{Cache, CacheKey, CacheManager, CacheValue, with_skip};
use cacheboot_common::{BootstrapConfig, BootstrapEndpoint};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Client lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Opening the transfer socket
    Connecting,
    /// Applying items as they arrive
    Streaming,
    /// Terminator received; terminal
    Done,
    /// Transfer aborted; records applied so far are kept
    Failed,
}

/// What a completed transfer applied locally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Caches named by the server, in arrival order
    pub caches: Vec<String>,
    /// Records put into local caches
    pub records_applied: u64,
}

/// Receives one bootstrap stream into the local cache manager
pub struct BootstrapClient {
    manager: Arc<dyn CacheManager>,
    config: BootstrapConfig,
}

impl BootstrapClient {
    /// Create a client writing into `manager`
    pub fn new(manager: Arc<dyn CacheManager>, config: BootstrapConfig) -> Self {
        Self { manager, config }
    }

    /// Local cache manager
    #[must_use]
    pub fn manager(&self) -> &Arc<dyn CacheManager> {
        &self.manager
    }

    /// Stream every cache offered at `endpoint`
    ///
    /// The endpoint is consumed: it is good for one connection only.
    pub async fn load(&self, endpoint: BootstrapEndpoint) -> BootstrapResult<LoadSummary> {
        let addr = endpoint.addr();
        let mut state = ClientState::Connecting;
        debug!(endpoint = %addr, state = ?state, "bootstrap client");

        let result = self.connect_and_receive(addr, &mut state).await;

        match &result {
            Ok(summary) => {
                state = ClientState::Done;
                info!(
                    endpoint = %addr,
                    caches = ?summary.caches,
                    records = summary.records_applied,
                    "loaded caches from cluster peer"
                );
            }
            Err(e) => {
                state = ClientState::Failed;
                warn!(endpoint = %addr, error = %e, "bootstrap transfer aborted");
            }
        }
        debug!(endpoint = %addr, state = ?state, "bootstrap client");

        result
    }

    async fn connect_and_receive(
        &self,
        addr: std::net::SocketAddr,
        state: &mut ClientState,
    ) -> BootstrapResult<LoadSummary> {
        let mut stream = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| BootstrapError::ConnectTimeout(addr))??;

        // Nothing is ever sent to the server
        stream.shutdown().await?;

        *state = ClientState::Streaming;
        debug!(endpoint = %addr, state = ?*state, "bootstrap client");

        let mut reader = StreamReader::begin(
            BufReader::new(stream),
            self.config.max_frame_bytes,
            self.config.socket_read_timeout(),
        )
        .await?;

        // The socket closes when `reader` drops, on every path out of here
        self.receive(&mut reader).await
    }

    async fn receive<R>(&self, reader: &mut StreamReader<R>) -> BootstrapResult<LoadSummary>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut summary = LoadSummary::default();
        let mut current: Option<Arc<dyn Cache>> = None;

        loop {
            match reader.next_item().await? {
                WireItem::End => return Ok(summary),
                WireItem::CacheName(name) => {
                    let cache = with_skip(|| self.manager.add_cache_if_absent(&name))?;
                    debug!(cache = %name, "receiving cache");
                    summary.caches.push(name);
                    current = Some(cache);
                }
                WireItem::Record { key, value } => {
                    let Some(cache) = current.as_ref() else {
                        return Err(BootstrapError::protocol(
                            "record received before any cache name",
                        ));
                    };
                    cache.put(CacheKey::Serialized(key), CacheValue::Serialized(value));
                    summary.records_applied += 1;
                }
            }
        }
    }
}
