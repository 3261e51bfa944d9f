//! In-memory cache manager
//!
//! Regions are plain hash maps behind `parking_lot` locks. Creation listeners
//! are invoked outside the registry lock so a listener may look regions up
//! (or create more) without deadlocking.

use crate::manager::{Cache, CacheCreationListener, CacheManager};
use crate::value::{CacheKey, CacheValue};
use cacheboot_common::{Error, Result};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// In-memory cache region
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<CacheKey, CacheValue>>,
}

impl MemoryCache {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn keys(&self) -> Vec<CacheKey> {
        self.entries.read().keys().cloned().collect()
    }

    fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        self.entries.read().get(key).cloned()
    }

    fn put(&self, key: CacheKey, value: CacheValue) {
        self.entries.write().insert(key, value);
    }

    fn remove(&self, key: &CacheKey) -> Option<CacheValue> {
        self.entries.write().remove(key)
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Registry of in-memory regions
#[derive(Default)]
pub struct MemoryCacheManager {
    caches: RwLock<BTreeMap<String, Arc<MemoryCache>>>,
    listeners: RwLock<Vec<Arc<dyn CacheCreationListener>>>,
}

impl MemoryCacheManager {
    /// Create an empty manager
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a creation listener
    pub fn register_listener(&self, listener: Arc<dyn CacheCreationListener>) {
        self.listeners.write().push(listener);
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidCacheName(name.to_string()));
        }
        Ok(())
    }

    fn notify_created(&self, name: &str) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.cache_created(name);
        }
    }
}

impl CacheManager for MemoryCacheManager {
    fn cache_names(&self) -> Vec<String> {
        self.caches.read().keys().cloned().collect()
    }

    fn cache(&self, name: &str) -> Option<Arc<dyn Cache>> {
        self.caches
            .read()
            .get(name)
            .map(|cache| Arc::clone(cache) as Arc<dyn Cache>)
    }

    fn add_cache(&self, name: &str) -> Result<Arc<dyn Cache>> {
        Self::validate_name(name)?;

        let cache = {
            let mut caches = self.caches.write();
            if caches.contains_key(name) {
                return Err(Error::CacheExists(name.to_string()));
            }
            let cache = Arc::new(MemoryCache::new(name));
            caches.insert(name.to_string(), Arc::clone(&cache));
            cache
        };

        debug!(cache = name, "created cache");
        self.notify_created(name);
        Ok(cache)
    }

    fn add_cache_if_absent(&self, name: &str) -> Result<Arc<dyn Cache>> {
        Self::validate_name(name)?;

        // Fast path: region already registered
        if let Some(cache) = self.cache(name) {
            return Ok(cache);
        }

        let (cache, created) = {
            let mut caches = self.caches.write();
            if let Some(existing) = caches.get(name) {
                (Arc::clone(existing), false)
            } else {
                let cache = Arc::new(MemoryCache::new(name));
                caches.insert(name.to_string(), Arc::clone(&cache));
                (cache, true)
            }
        };

        if created {
            debug!(cache = name, "created cache");
            self.notify_created(name);
        }
        Ok(cache)
    }

    fn remove_cache(&self, name: &str) -> Result<()> {
        self.caches
            .write()
            .remove(name)
            .map(|_| debug!(cache = name, "removed cache"))
            .ok_or_else(|| Error::CacheNotFound(name.to_string()))
    }
}
