//! Cache manager seam
//!
//! The bootstrap machinery only needs a handful of operations from the local
//! cache manager. Implementations must be thread-safe and `add_cache_if_absent`
//! must be idempotent.

use crate::value::{CacheKey, CacheValue};
use cacheboot_common::Result;
use std::sync::Arc;

/// A named cache region
pub trait Cache: Send + Sync {
    /// Region name
    fn name(&self) -> &str;

    /// Snapshot of the keys currently held
    fn keys(&self) -> Vec<CacheKey>;

    /// Look up a value
    fn get(&self, key: &CacheKey) -> Option<CacheValue>;

    /// Insert or replace a value
    fn put(&self, key: CacheKey, value: CacheValue);

    /// Remove a value, returning it if present
    fn remove(&self, key: &CacheKey) -> Option<CacheValue>;

    /// Number of entries
    fn len(&self) -> usize;

    /// Whether the region holds no entries
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Local registry of cache regions
pub trait CacheManager: Send + Sync {
    /// Names of every region currently registered
    fn cache_names(&self) -> Vec<String>;

    /// Look up a region
    fn cache(&self, name: &str) -> Option<Arc<dyn Cache>>;

    /// Create a region, failing if it already exists
    fn add_cache(&self, name: &str) -> Result<Arc<dyn Cache>>;

    /// Return the existing region or create it
    fn add_cache_if_absent(&self, name: &str) -> Result<Arc<dyn Cache>>;

    /// Drop a region
    fn remove_cache(&self, name: &str) -> Result<()>;
}

/// Observer notified whenever a manager creates a region
///
/// Notifications run synchronously on the creating thread, after the region
/// is registered and before the creating call returns.
pub trait CacheCreationListener: Send + Sync {
    /// A region named `cache_name` was just created
    fn cache_created(&self, cache_name: &str);
}
