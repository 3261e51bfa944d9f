//! One-shot bootstrap server
//!
//! Each server owns a listener bound for a single requester. It accepts one
//! connection (or gives up after the accept timeout), drops the listener,
//! streams the requested caches and closes the socket.
//!
//! ```text
//! Listening ──accept──▶ Accepted ──▶ Streaming ──▶ Closed
//!     │
//!     └──timeout──▶ TimedOut ──▶ Closed
//! ```

use crate::codec::StreamWriter;
use crate::error::{BootstrapError, BootstrapResult};

use cacheboot_cache::{CacheManager, with_skip};
use cacheboot_common::{BootstrapConfig, BootstrapEndpoint};
use std::io::ErrorKind;
use std::net::{IpAddr, Shutdown, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Server lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for the single requester
    Listening,
    /// Requester connected; listener dropped
    Accepted,
    /// Nobody connected before the accept timeout
    TimedOut,
    /// Writing cache blocks
    Streaming,
    /// Socket closed; terminal
    Closed,
}

/// What a server did before closing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Cache blocks written
    pub caches_sent: usize,
    /// Requested caches that did not exist locally and were created empty
    pub caches_created: usize,
    /// Records written
    pub records_sent: u64,
    /// Entries left out because their key or value cannot be transferred
    pub entries_skipped: u64,
}

/// Result of a server run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The requester never connected
    TimedOut,
    /// The send-set was streamed
    Streamed(StreamSummary),
}

/// Single-use transfer server
pub struct BootstrapServer {
    listener: TcpListener,
    endpoint_addr: SocketAddr,
    manager: Arc<dyn CacheManager>,
    cache_names: Vec<String>,
    accept_timeout: Duration,
    max_frame_bytes: u32,
}

impl BootstrapServer {
    /// Bind a listener for streaming `cache_names`
    ///
    /// Tries `socket_start_port` first and walks upward past ports in use.
    pub async fn bind(
        config: &BootstrapConfig,
        manager: Arc<dyn CacheManager>,
        cache_names: Vec<String>,
    ) -> BootstrapResult<Self> {
        let listener = bind_listener(
            config.bind_addr,
            config.socket_start_port,
            config.port_scan_limit,
        )
        .await?;
        let endpoint_addr = SocketAddr::new(config.endpoint_host(), listener.local_addr()?.port());

        debug!(
            endpoint = %endpoint_addr,
            caches = ?cache_names,
            "bootstrap server listening"
        );

        Ok(Self {
            listener,
            endpoint_addr,
            manager,
            cache_names,
            accept_timeout: config.accept_timeout(),
            max_frame_bytes: config.max_frame_bytes,
        })
    }

    /// Endpoint a requester connects to
    #[must_use]
    pub const fn endpoint(&self) -> BootstrapEndpoint {
        BootstrapEndpoint::new(self.endpoint_addr)
    }

    /// Run the server on a background task
    ///
    /// Failures are logged here as well as returned through the handle, so
    /// detaching the handle loses nothing.
    pub fn spawn(self) -> JoinHandle<BootstrapResult<ServeOutcome>> {
        let endpoint = self.endpoint_addr;
        tokio::spawn(async move {
            let result = self.run().await;
            if let Err(e) = &result {
                error!(endpoint = %endpoint, error = %e, "bootstrap server failed");
            }
            result
        })
    }

    async fn run(self) -> BootstrapResult<ServeOutcome> {
        let Self {
            listener,
            endpoint_addr,
            manager,
            cache_names,
            accept_timeout,
            max_frame_bytes,
        } = self;
        let mut state = ServerState::Listening;

        let accepted = tokio::time::timeout(accept_timeout, listener.accept()).await;
        // no further connections, whatever happened
        drop(listener);

        let (stream, peer) = match accepted {
            Err(_) => {
                transition(&mut state, ServerState::TimedOut, endpoint_addr);
                debug!(
                    endpoint = %endpoint_addr,
                    caches = ?cache_names,
                    "terminating bootstrap server that the requester never used"
                );
                transition(&mut state, ServerState::Closed, endpoint_addr);
                return Ok(ServeOutcome::TimedOut);
            }
            Ok(accept) => accept?,
        };
        transition(&mut state, ServerState::Accepted, endpoint_addr);

        // Nothing is expected from the requester
        let stream = shutdown_read(stream)?;

        transition(&mut state, ServerState::Streaming, endpoint_addr);
        let result = stream_caches(
            stream,
            manager.as_ref(),
            &cache_names,
            max_frame_bytes,
        )
        .await;
        transition(&mut state, ServerState::Closed, endpoint_addr);

        let summary = result?;
        info!(
            peer = %peer,
            caches_sent = summary.caches_sent,
            caches_created = summary.caches_created,
            records_sent = summary.records_sent,
            entries_skipped = summary.entries_skipped,
            "bootstrap stream completed"
        );
        Ok(ServeOutcome::Streamed(summary))
    }
}

fn transition(state: &mut ServerState, next: ServerState, endpoint: SocketAddr) {
    debug!(endpoint = %endpoint, from = ?*state, to = ?next, "bootstrap server state");
    *state = next;
}

fn shutdown_read(stream: TcpStream) -> std::io::Result<TcpStream> {
    let stream = stream.into_std()?;
    stream.shutdown(Shutdown::Read)?;
    TcpStream::from_std(stream)
}

async fn stream_caches(
    stream: TcpStream,
    manager: &dyn CacheManager,
    cache_names: &[String],
    max_frame_bytes: u32,
) -> BootstrapResult<StreamSummary> {
    let mut summary = StreamSummary::default();
    let mut writer = StreamWriter::begin(BufWriter::new(stream)).await?;

    for cache_name in cache_names {
        let Some(cache) = manager.cache(cache_name) else {
            // Absent here: create it quietly and send nothing for it
            with_skip(|| manager.add_cache_if_absent(cache_name))?;
            summary.caches_created += 1;
            continue;
        };

        writer.write_cache_name(cache_name).await?;
        summary.caches_sent += 1;

        for key in cache.keys() {
            let Some(key_bytes) = key.as_wire() else {
                warn!(cache = %cache_name, key = %key, "Key is not serializable");
                summary.entries_skipped += 1;
                continue;
            };

            // Evicted since the key snapshot was taken
            let Some(value) = cache.get(&key) else {
                continue;
            };

            let Some(value_bytes) = value.as_wire() else {
                warn!(cache = %cache_name, key = %key, "Value is not serializable");
                summary.entries_skipped += 1;
                continue;
            };

            if exceeds_frame(key_bytes.len(), max_frame_bytes)
                || exceeds_frame(value_bytes.len(), max_frame_bytes)
            {
                warn!(
                    cache = %cache_name,
                    key = %key,
                    value_len = value_bytes.len(),
                    "Entry exceeds the transfer frame limit"
                );
                summary.entries_skipped += 1;
                continue;
            }

            writer.write_record(key_bytes, value_bytes).await?;
            summary.records_sent += 1;
        }
    }

    let mut stream = writer.finish().await?.into_inner();
    stream.shutdown().await?;
    Ok(summary)
}

fn exceeds_frame(len: usize, max_frame_bytes: u32) -> bool {
    u32::try_from(len).map_or(true, |len| len > max_frame_bytes)
}

async fn bind_listener(addr: IpAddr, start_port: u16, scan_limit: u16) -> BootstrapResult<TcpListener> {
    if start_port == 0 {
        return Ok(TcpListener::bind(SocketAddr::new(addr, 0)).await?);
    }

    let end_port = start_port.saturating_add(scan_limit.saturating_sub(1));
    for port in start_port..=end_port {
        match TcpListener::bind(SocketAddr::new(addr, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {}
            Err(e) => return Err(BootstrapError::from(e)),
        }
    }

    Err(BootstrapError::NoFreePort {
        addr,
        start: start_port,
        end: end_port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{StreamReader, WireItem};
    use cacheboot_cache::{CacheCreationListener, CacheValue, MemoryCacheManager, is_skipping};
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, BufReader};

    fn test_config() -> BootstrapConfig {
        BootstrapConfig {
            socket_start_port: 0,
            accept_timeout_ms: 2_000,
            ..BootstrapConfig::default()
        }
    }

    #[derive(Default)]
    struct SkipRecorder {
        seen: Mutex<Vec<(String, bool)>>,
    }

    impl CacheCreationListener for SkipRecorder {
        fn cache_created(&self, cache_name: &str) {
            self.seen.lock().push((cache_name.to_string(), is_skipping()));
        }
    }

    async fn read_all(endpoint: BootstrapEndpoint) -> Vec<WireItem> {
        let stream = TcpStream::connect(endpoint.addr()).await.unwrap();
        let mut reader = StreamReader::begin(BufReader::new(stream), 1024, None)
            .await
            .unwrap();
        let mut items = Vec::new();
        loop {
            let item = reader.next_item().await.unwrap();
            if item == WireItem::End {
                return items;
            }
            items.push(item);
        }
    }

    #[tokio::test]
    async fn test_streams_existing_and_creates_missing() {
        let manager = Arc::new(MemoryCacheManager::new());
        let recorder = Arc::new(SkipRecorder::default());
        manager.register_listener(recorder.clone());

        let cache = manager.add_cache("A").unwrap();
        cache.put("k1".into(), "v1".into());

        let server = BootstrapServer::bind(
            &test_config(),
            manager.clone(),
            vec!["B".into(), "A".into()],
        )
        .await
        .unwrap();
        let endpoint = server.endpoint();
        let handle = server.spawn();

        let items = read_all(endpoint).await;
        assert_eq!(
            items,
            vec![
                WireItem::CacheName("A".into()),
                WireItem::Record {
                    key: bytes::Bytes::from_static(b"k1"),
                    value: bytes::Bytes::from_static(b"v1"),
                },
            ]
        );

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            ServeOutcome::Streamed(StreamSummary {
                caches_sent: 1,
                caches_created: 1,
                records_sent: 1,
                entries_skipped: 0,
            })
        );

        // "B" was created under the guard, "A" by the test itself
        assert!(manager.cache("B").unwrap().is_empty());
        assert_eq!(
            *recorder.seen.lock(),
            vec![("A".to_string(), false), ("B".to_string(), true)]
        );
        assert!(!is_skipping());
    }

    #[tokio::test]
    async fn test_skips_local_entries() {
        let manager = Arc::new(MemoryCacheManager::new());
        let cache = manager.add_cache("A").unwrap();
        cache.put("k1".into(), "v1".into());
        cache.put("k2".into(), CacheValue::local(vec![1_u8, 2, 3]));
        cache.put(cacheboot_cache::CacheKey::Local("h".into()), "v3".into());

        let server = BootstrapServer::bind(&test_config(), manager.clone(), vec!["A".into()])
            .await
            .unwrap();
        let endpoint = server.endpoint();
        let handle = server.spawn();

        let items = read_all(endpoint).await;
        assert_eq!(items.len(), 2);

        let ServeOutcome::Streamed(summary) = handle.await.unwrap().unwrap() else {
            panic!("server timed out");
        };
        assert_eq!(summary.records_sent, 1);
        assert_eq!(summary.entries_skipped, 2);
    }

    #[tokio::test]
    async fn test_skips_entries_over_frame_limit() {
        let manager = Arc::new(MemoryCacheManager::new());
        let cache = manager.add_cache("A").unwrap();
        cache.put("small".into(), "v".into());
        cache.put("large".into(), vec![0u8; 128].into());

        let config = BootstrapConfig {
            max_frame_bytes: 64,
            ..test_config()
        };
        let server = BootstrapServer::bind(&config, manager.clone(), vec!["A".into()])
            .await
            .unwrap();
        let endpoint = server.endpoint();
        let handle = server.spawn();

        assert_eq!(read_all(endpoint).await.len(), 2);
        let ServeOutcome::Streamed(summary) = handle.await.unwrap().unwrap() else {
            panic!("server timed out");
        };
        assert_eq!(summary.entries_skipped, 1);
    }

    #[tokio::test]
    async fn test_accept_timeout_closes_listener() {
        let manager = Arc::new(MemoryCacheManager::new());
        let config = BootstrapConfig {
            accept_timeout_ms: 50,
            ..test_config()
        };
        let server = BootstrapServer::bind(&config, manager.clone(), vec!["A".into()])
            .await
            .unwrap();
        let endpoint = server.endpoint();

        let outcome = server.spawn().await.unwrap().unwrap();
        assert_eq!(outcome, ServeOutcome::TimedOut);
        assert!(TcpStream::connect(endpoint.addr()).await.is_err());
        // nothing was created for an unused endpoint
        assert!(manager.cache("A").is_none());
    }

    #[tokio::test]
    async fn test_single_connection_only() {
        let manager = Arc::new(MemoryCacheManager::new());
        manager.add_cache("A").unwrap();

        let server = BootstrapServer::bind(&test_config(), manager.clone(), vec!["A".into()])
            .await
            .unwrap();
        let endpoint = server.endpoint();
        let addr = endpoint.addr();
        let handle = server.spawn();

        read_all(endpoint).await;
        handle.await.unwrap().unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_client_disconnect_fails_the_stream() {
        let manager = Arc::new(MemoryCacheManager::new());
        let cache = manager.add_cache("A").unwrap();
        for i in 0..64 {
            cache.put(format!("k{i}").as_str().into(), vec![0u8; 1024 * 1024].into());
        }

        let server = BootstrapServer::bind(&test_config(), manager.clone(), vec!["A".into()])
            .await
            .unwrap();
        let endpoint = server.endpoint();
        let handle = server.spawn();

        // take the header, then hang up with the rest still in flight
        let mut stream = TcpStream::connect(endpoint.addr()).await.unwrap();
        let mut header = [0u8; 5];
        stream.read_exact(&mut header).await.unwrap();
        drop(stream);

        let result = handle.await.unwrap();
        assert!(
            matches!(result, Err(BootstrapError::ConnectionFailure(_))),
            "expected a connection failure, got {result:?}"
        );
    }

    #[tokio::test]
    async fn test_port_scan_skips_ports_in_use() {
        let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let start = taken.local_addr().unwrap().port();

        let listener = bind_listener(IpAddr::V4(Ipv4Addr::LOCALHOST), start, 1).await;
        assert!(matches!(listener, Err(BootstrapError::NoFreePort { .. })));

        if start < u16::MAX {
            let listener = bind_listener(IpAddr::V4(Ipv4Addr::LOCALHOST), start, 50)
                .await
                .unwrap();
            assert!(listener.local_addr().unwrap().port() > start);
        }
    }
}
