//! cacheboot Cache
//!
//! This crate defines the slice of the local cache manager that the bootstrap
//! machinery relies on, an in-memory implementation of it, and the reentrancy
//! guard that keeps bootstrap-created caches from bootstrapping themselves.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐  cache_created()  ┌──────────────────────────┐
//! │ CacheManager         │──────────────────▶│ CacheCreationListener    │
//! │  (MemoryCacheManager)│                   │  (bootstrap loader)      │
//! └──────────────────────┘                   └────────────┬─────────────┘
//!                                                         │ is_skipping()?
//!                                               ┌─────────▼─────────┐
//!                                               │   guard (per      │
//!                                               │   thread depth)   │
//!                                               └───────────────────┘
//! ```

pub mod guard;
pub mod manager;
pub mod memory;
pub mod value;

pub use guard::{SkipGuard, enter_skip, is_skipping, with_skip};
pub use manager::{Cache, CacheCreationListener, CacheManager};
pub use memory::{MemoryCache, MemoryCacheManager};
pub use value::{CacheKey, CacheValue};
