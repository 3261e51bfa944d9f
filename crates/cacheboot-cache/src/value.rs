//! Cache keys and values
//!
//! Entries hold either serialized bytes, which can be shipped to another
//! node, or process-local data that only makes sense inside this process.
//! Bootstrap transfers carry the former and skip the latter.

use bytes::Bytes;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Key of a cache entry
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Serialized key, transferable to peers
    Serialized(Bytes),
    /// Process-local key (e.g. an interned handle), never transferred
    Local(String),
}

impl CacheKey {
    /// Wire form of the key, if it has one
    #[must_use]
    pub const fn as_wire(&self) -> Option<&Bytes> {
        match self {
            Self::Serialized(bytes) => Some(bytes),
            Self::Local(_) => None,
        }
    }
}

impl From<Bytes> for CacheKey {
    fn from(bytes: Bytes) -> Self {
        Self::Serialized(bytes)
    }
}

impl From<Vec<u8>> for CacheKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Serialized(Bytes::from(bytes))
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::Serialized(Bytes::copy_from_slice(key.as_bytes()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialized(bytes) => write!(f, "0x{}", hex::encode(bytes)),
            Self::Local(handle) => write!(f, "local:{handle}"),
        }
    }
}

/// Value of a cache entry
#[derive(Clone)]
pub enum CacheValue {
    /// Serialized value, transferable to peers
    Serialized(Bytes),
    /// Live in-process object, never transferred
    Local(Arc<dyn Any + Send + Sync>),
}

impl CacheValue {
    /// Wrap a process-local object
    pub fn local<T: Any + Send + Sync>(value: T) -> Self {
        Self::Local(Arc::new(value))
    }

    /// Wire form of the value, if it has one
    #[must_use]
    pub const fn as_wire(&self) -> Option<&Bytes> {
        match self {
            Self::Serialized(bytes) => Some(bytes),
            Self::Local(_) => None,
        }
    }
}

impl PartialEq for CacheValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Serialized(a), Self::Serialized(b)) => a == b,
            (Self::Local(a), Self::Local(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serialized(bytes) => f.debug_tuple("Serialized").field(bytes).finish(),
            Self::Local(_) => f.write_str("Local(..)"),
        }
    }
}

impl From<Bytes> for CacheValue {
    fn from(bytes: Bytes) -> Self {
        Self::Serialized(bytes)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Serialized(Bytes::from(bytes))
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        Self::Serialized(Bytes::copy_from_slice(value.as_bytes()))
    }
}
