//! Error types for cacheboot
//!
//! This module defines the common error type shared by the cache manager and
//! the configuration layer. Transfer failures live in `cacheboot-stream`.

use thiserror::Error;

/// Common result type for cacheboot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for cacheboot
#[derive(Debug, Error)]
pub enum Error {
    // Cache manager errors
    #[error("cache already exists: {0}")]
    CacheExists(String),

    #[error("cache not found: {0}")]
    CacheNotFound(String),

    #[error("invalid cache name: {0:?}")]
    InvalidCacheName(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
