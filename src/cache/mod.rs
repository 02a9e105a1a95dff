//! Sub-tree instance cache.
//!
//! - [`TreeCache`] - bounded, concurrent cache with reference-counted pinning
//! - [`TreeLoader`] - storage-specific create/load hooks
//! - [`DiskTreeLoader`] - loader for [`SBTree`](crate::index::SBTree)s in a page storage
//! - [`CacheStats`] - hit/miss/eviction counters

mod entry;
mod loader;
mod stats;
mod tree_cache;

pub use entry::CacheEntry;
pub use loader::{CachedTree, DiskTree, DiskTreeLoader, TreeLoader};
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use tree_cache::TreeCache;
