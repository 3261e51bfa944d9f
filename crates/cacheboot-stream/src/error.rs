//! Bootstrap error types

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Bootstrap transfer and negotiation error
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Socket I/O failed, including a stream cut short by the peer
    #[error("Connection failure: {0}")]
    ConnectionFailure(#[from] std::io::Error),

    /// The transfer endpoint did not accept in time
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(SocketAddr),

    /// The peer stopped sending mid-stream
    #[error("No data from peer for {0:?}")]
    ReadTimeout(Duration),

    /// Unexpected item on the wire; the stream cannot be resynchronized
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// No port in the configured range could be bound
    #[error("No free port in {start}..={end} on {addr}")]
    NoFreePort {
        addr: std::net::IpAddr,
        start: u16,
        end: u16,
    },

    /// Local cache manager rejected an operation
    #[error("Cache error: {0}")]
    Cache(#[from] cacheboot_common::Error),

    /// Control-plane call failed
    #[error("RPC error: {0}")]
    Rpc(String),
}

impl BootstrapError {
    /// Create a protocol violation error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Create an RPC error
    pub fn rpc(msg: impl Into<String>) -> Self {
        Self::Rpc(msg.into())
    }

    /// Whether the error aborted an in-progress transfer
    #[must_use]
    pub const fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure(_)
                | Self::ConnectTimeout(_)
                | Self::ReadTimeout(_)
                | Self::ProtocolViolation(_)
        )
    }

    /// Whether the peer sent something the framing does not allow
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }
}

/// Result type for bootstrap operations
pub type BootstrapResult<T> = Result<T, BootstrapError>;
