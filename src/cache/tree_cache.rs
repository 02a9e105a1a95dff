//! TreeCache - bounded cache of live sub-tree instances.
//!
//! # Architecture
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         TreeCache<L>                         │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ DashMap<CollectionPointer, CacheEntry>  (sharded locks) │  │
//! │  │   entry: Arc<Tree> │ usage (pins) │ last_access (tick)  │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │  idle: Mutex<BTreeMap<tick, pointer>>  unpinned, oldest first │
//! │  eviction: Mutex<()>   only the eviction pass is serialized  │
//! │  loader: L             create_tree / load_tree hooks         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Pinning
//! Every successful [`load_tree`](TreeCache::load_tree) and
//! [`create_and_load_tree`](TreeCache::create_and_load_tree) pins the entry;
//! the caller owes exactly one [`release_tree`](TreeCache::release_tree).
//! Pinned entries are never evicted, so the cache can stay above its
//! configured maximum while many trees are in use.
//!
//! # Eviction order
//! An entry joins `idle` under its last access tick when its last pin is
//! released and leaves it when it is pinned again, so an eviction pass
//! takes its candidates from the front of `idle` without walking the map.
//! The shard lock is never held while `idle` is locked. A candidate that
//! went stale in between is recognised by its tick and skipped.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::cache::{CacheEntry, CacheStats, CachedTree, TreeLoader};
use crate::common::{CacheConfig, CollectionPointer, Result};

/// Concurrent, size-bounded cache of tree instances keyed by pointer.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use durabletree::cache::{DiskTreeLoader, TreeCache};
/// use durabletree::encoding::{EncoderProvider, SizePreference, ValueType};
/// use durabletree::index::{OrderedIndex, TreeConfig};
/// use durabletree::storage::{AtomicOperationsManager, DiskStorage, PageStorage};
/// use durabletree::CacheConfig;
///
/// # fn main() -> durabletree::Result<()> {
/// let storage: Arc<dyn PageStorage> = Arc::new(DiskStorage::open("data")?);
/// let atomic = Arc::new(AtomicOperationsManager::new(storage));
/// let config = TreeConfig::<i64, String>::resolve(
///     &EncoderProvider::new(),
///     ValueType::Long,
///     SizePreference::Auto,
/// )?;
/// let cache = TreeCache::new(DiskTreeLoader::new(atomic, "links", config), CacheConfig::default());
///
/// let pointer = cache.create_and_load_tree(1)?;
/// if let Some(tree) = cache.load_tree(&pointer)? {
///     tree.put(42, "answer".to_string())?;
///     cache.release_tree(&pointer);
/// }
/// cache.release_tree(&pointer);
/// # Ok(())
/// # }
/// ```
pub struct TreeCache<L: TreeLoader> {
    loader: L,
    map: DashMap<CollectionPointer, CacheEntry<L::Tree>>,
    /// Access clock used for least-recently-used ordering.
    tick: AtomicU64,
    /// Unpinned entries by last access tick.
    idle: Mutex<BTreeMap<u64, CollectionPointer>>,
    eviction: Mutex<()>,
    config: CacheConfig,
    stats: CacheStats,
}

impl<L: TreeLoader> TreeCache<L> {
    pub fn new(loader: L, config: CacheConfig) -> Self {
        Self {
            loader,
            map: DashMap::new(),
            tick: AtomicU64::new(0),
            idle: Mutex::new(BTreeMap::new()),
            eviction: Mutex::new(()),
            config,
            stats: CacheStats::new(),
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of cached trees, pinned or not.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, pointer: &CollectionPointer) -> bool {
        self.map.contains_key(pointer)
    }

    /// Outstanding loads of a cached tree.
    pub fn usage_count(&self, pointer: &CollectionPointer) -> Option<u32> {
        self.map.get(pointer).map(|entry| entry.usage())
    }

    /// Create a new tree without caching it.
    pub fn create_tree(&self, location_hint: u32) -> Result<CollectionPointer> {
        let tree = self.loader.create_tree(location_hint)?;
        self.stats.creations.fetch_add(1, Ordering::Relaxed);
        Ok(tree.collection_pointer())
    }

    /// Create a new tree and cache it pinned once.
    ///
    /// The caller owes one [`release_tree`](Self::release_tree).
    pub fn create_and_load_tree(&self, location_hint: u32) -> Result<CollectionPointer> {
        let tree = self.loader.create_tree(location_hint)?;
        self.stats.creations.fetch_add(1, Ordering::Relaxed);

        let pointer = tree.collection_pointer();
        self.insert_or_acquire(pointer, tree);
        self.evict_if_needed();

        debug!(%pointer, "created tree");
        Ok(pointer)
    }

    /// Get the tree for `pointer`, loading it on a miss, and pin it.
    ///
    /// Returns `Ok(None)` if the loader cannot find the tree; nothing is
    /// pinned in that case. Otherwise the caller owes one
    /// [`release_tree`](Self::release_tree).
    pub fn load_tree(&self, pointer: &CollectionPointer) -> Result<Option<Arc<L::Tree>>> {
        if let Some(tree) = self.acquire(pointer) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            trace!(%pointer, "tree cache hit");
            self.evict_if_needed();
            return Ok(Some(tree));
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        trace!(%pointer, "tree cache miss");

        let Some(tree) = self.loader.load_tree(pointer)? else {
            return Ok(None);
        };
        self.stats.loads.fetch_add(1, Ordering::Relaxed);

        let tree = self.insert_or_acquire(*pointer, tree);
        self.evict_if_needed();
        Ok(Some(tree))
    }

    /// Unpin a tree returned by a load.
    ///
    /// # Panics
    /// Panics if the tree is not cached or not pinned.
    pub fn release_tree(&self, pointer: &CollectionPointer) {
        let idle_since = {
            let Some(entry) = self.map.get(pointer) else {
                panic!("Cannot release tree {} because it is not loaded", pointer);
            };
            entry.release().then(|| entry.last_access())
        };
        if let Some(tick) = idle_since {
            self.idle.lock().insert(tick, *pointer);
        }
        self.stats.releases.fetch_add(1, Ordering::Relaxed);
        self.evict_if_needed();
    }

    /// Remove an unpinned tree from the cache.
    ///
    /// # Panics
    /// Panics if the tree is not cached or is still pinned.
    pub fn delete(&self, pointer: &CollectionPointer) {
        if let Some((_, entry)) = self.map.remove_if(pointer, |_, entry| !entry.is_pinned()) {
            self.idle.lock().remove(&entry.last_access());
            trace!(%pointer, "removed tree from cache");
            return;
        }

        if self.map.contains_key(pointer) {
            panic!("Cannot delete tree {} because it is used", pointer);
        }
        panic!("Cannot delete tree {} because it is not loaded", pointer);
    }

    /// Drop every entry, pinned or not.
    ///
    /// For shutdown paths only: handles held by callers stay valid but are
    /// no longer tracked.
    pub fn clear(&self) {
        self.map.clear();
        self.idle.lock().clear();
    }

    /// Empty the cache on shutdown.
    pub fn close(&self) {
        let count = self.map.len();
        self.clear();
        debug!(count, stats = %self.stats.snapshot(), "closed tree cache");
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Pin a cached entry. The shard guard is released on return.
    fn acquire(&self, pointer: &CollectionPointer) -> Option<Arc<L::Tree>> {
        let tick = self.next_tick();
        let (tree, idle_since) = {
            let entry = self.map.get(pointer)?;
            let idle_since = entry.acquire(tick);
            (Arc::clone(entry.tree()), idle_since)
        };
        self.leave_idle(idle_since);
        Some(tree)
    }

    fn leave_idle(&self, idle_since: Option<u64>) {
        if let Some(tick) = idle_since {
            self.idle.lock().remove(&tick);
        }
    }

    /// Insert `tree` pinned once, or pin the entry a concurrent loader
    /// inserted first and discard `tree`.
    fn insert_or_acquire(&self, pointer: CollectionPointer, tree: L::Tree) -> Arc<L::Tree> {
        let tick = self.next_tick();
        let (tree, idle_since) = match self.map.entry(pointer) {
            Entry::Occupied(occupied) => {
                let entry = occupied.get();
                let idle_since = entry.acquire(tick);
                (Arc::clone(entry.tree()), idle_since)
            }
            Entry::Vacant(vacant) => {
                let tree = Arc::new(tree);
                vacant.insert(CacheEntry::new(Arc::clone(&tree), 1, tick));
                (tree, None)
            }
        };
        self.leave_idle(idle_since);
        tree
    }

    /// Evict unpinned least-recently-used entries once the cache is too big.
    ///
    /// At most `eviction_threshold` of the oldest unpinned entries are
    /// inspected. Pinned entries are not candidates, so the cache may remain
    /// above `max_size`.
    fn evict_if_needed(&self) {
        if self.map.len() <= self.config.max_size {
            return;
        }

        let _guard = self.eviction.lock();
        let before = self.map.len();
        if before <= self.config.max_size {
            return;
        }

        let candidates: Vec<(u64, CollectionPointer)> = {
            let mut idle = self.idle.lock();
            std::iter::from_fn(|| idle.pop_first())
                .take(self.config.eviction_threshold)
                .collect()
        };

        let mut evicted = 0u64;
        for (tick, pointer) in candidates {
            if self
                .map
                .remove_if(&pointer, |_, entry| {
                    !entry.is_pinned() && entry.last_access() == tick
                })
                .is_some()
            {
                evicted += 1;
            }
        }
        self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);

        let after = self.map.len();
        debug!(before, after, evicted, "tree cache eviction pass");
        if after > self.config.max_size {
            warn!(
                size = after,
                max_size = self.config.max_size,
                "tree cache above its maximum: remaining entries are pinned"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Error, FileId, PageId};
    use std::collections::HashSet;

    /// In-memory trees; pointers in `known` can be loaded.
    struct MemoryLoader {
        known: parking_lot::Mutex<HashSet<CollectionPointer>>,
        next_file: AtomicU64,
    }

    #[derive(Debug)]
    struct MemoryTree(CollectionPointer);

    impl CachedTree for MemoryTree {
        fn collection_pointer(&self) -> CollectionPointer {
            self.0
        }
    }

    impl MemoryLoader {
        fn new() -> Self {
            Self {
                known: parking_lot::Mutex::new(HashSet::new()),
                next_file: AtomicU64::new(0),
            }
        }
    }

    impl TreeLoader for MemoryLoader {
        type Tree = MemoryTree;

        fn create_tree(&self, location_hint: u32) -> Result<MemoryTree> {
            if location_hint == u32::MAX {
                return Err(Error::Corrupted("no room".into()));
            }
            let file = self.next_file.fetch_add(1, Ordering::Relaxed) as u32;
            let pointer = CollectionPointer::new(FileId::new(file), PageId::new(0), location_hint);
            self.known.lock().insert(pointer);
            Ok(MemoryTree(pointer))
        }

        fn load_tree(&self, pointer: &CollectionPointer) -> Result<Option<MemoryTree>> {
            Ok(self
                .known
                .lock()
                .contains(pointer)
                .then(|| MemoryTree(*pointer)))
        }
    }

    fn cache(max_size: usize, threshold: usize) -> TreeCache<MemoryLoader> {
        TreeCache::new(MemoryLoader::new(), CacheConfig::new(max_size, threshold))
    }

    #[test]
    fn test_create_and_load_pins_once() {
        let cache = cache(10, 10);
        let pointer = cache.create_and_load_tree(3).unwrap();

        assert_eq!(pointer.generation, 3);
        assert_eq!(cache.usage_count(&pointer), Some(1));

        cache.release_tree(&pointer);
        assert_eq!(cache.usage_count(&pointer), Some(0));
    }

    #[test]
    fn test_create_tree_does_not_cache() {
        let cache = cache(10, 10);
        let pointer = cache.create_tree(0).unwrap();

        assert!(!cache.contains(&pointer));
        assert!(cache.load_tree(&pointer).unwrap().is_some());
        assert_eq!(cache.stats().snapshot().misses, 1);
    }

    #[test]
    fn test_failed_create_is_reported() {
        let cache = cache(10, 10);
        assert!(cache.create_and_load_tree(u32::MAX).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_load_hit_shares_instance() {
        let cache = cache(10, 10);
        let pointer = cache.create_tree(0).unwrap();

        let a = cache.load_tree(&pointer).unwrap().unwrap();
        let b = cache.load_tree(&pointer).unwrap().unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.usage_count(&pointer), Some(2));
        let stats = cache.stats().snapshot();
        assert_eq!((stats.hits, stats.misses, stats.loads), (1, 1, 1));
    }

    #[test]
    fn test_unknown_pointer_is_absent() {
        let cache = cache(10, 10);
        let pointer = CollectionPointer::new(FileId::new(77), PageId::new(0), 0);

        assert!(cache.load_tree(&pointer).unwrap().is_none());
        assert!(!cache.contains(&pointer));
    }

    #[test]
    #[should_panic(expected = "because it is used")]
    fn test_delete_pinned_panics() {
        let cache = cache(10, 10);
        let pointer = cache.create_and_load_tree(0).unwrap();
        cache.delete(&pointer);
    }

    #[test]
    #[should_panic(expected = "because it is not loaded")]
    fn test_release_unknown_panics() {
        let cache = cache(10, 10);
        cache.release_tree(&CollectionPointer::new(FileId::new(1), PageId::new(0), 0));
    }

    #[test]
    #[should_panic(expected = "usage counter underflow")]
    fn test_release_twice_panics() {
        let cache = cache(10, 10);
        let pointer = cache.create_and_load_tree(0).unwrap();
        cache.release_tree(&pointer);
        cache.release_tree(&pointer);
    }

    #[test]
    fn test_delete_after_release() {
        let cache = cache(10, 10);
        let pointer = cache.create_and_load_tree(0).unwrap();

        cache.release_tree(&pointer);
        cache.delete(&pointer);
        assert!(!cache.contains(&pointer));
    }

    #[test]
    fn test_eviction_prefers_oldest_unpinned() {
        let cache = cache(2, 1);
        let first = cache.create_and_load_tree(0).unwrap();
        let second = cache.create_and_load_tree(0).unwrap();
        cache.release_tree(&first);
        cache.release_tree(&second);

        // Third entry pushes the cache over its maximum; one entry is scanned
        let third = cache.create_and_load_tree(0).unwrap();

        assert!(!cache.contains(&first));
        assert!(cache.contains(&second));
        assert!(cache.contains(&third));
        assert_eq!(cache.stats().snapshot().evictions, 1);
    }

    #[test]
    fn test_pinned_entries_survive_eviction() {
        let cache = cache(4, 100);
        let pinned: Vec<_> = (0..4).map(|_| cache.create_and_load_tree(0).unwrap()).collect();

        let mut extra = Vec::new();
        for _ in 0..6 {
            let pointer = cache.create_and_load_tree(1).unwrap();
            cache.release_tree(&pointer);
            extra.push(pointer);
        }

        for pointer in &pinned {
            assert!(cache.contains(pointer));
            assert_eq!(cache.usage_count(pointer), Some(1));
        }
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_reloaded_entry_is_not_evicted() {
        let cache = cache(1, 10);
        let first = cache.create_and_load_tree(0).unwrap();
        cache.release_tree(&first);
        let _tree = cache.load_tree(&first).unwrap().unwrap();

        let second = cache.create_and_load_tree(0).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().snapshot().evictions, 0);

        cache.release_tree(&second);
        assert!(cache.contains(&first));
        assert!(!cache.contains(&second));
        assert_eq!(cache.stats().snapshot().evictions, 1);
    }

    #[test]
    fn test_repinned_entry_survives_later_passes() {
        let cache = cache(2, 10);
        let pointers: Vec<_> = (0..3)
            .map(|_| {
                let pointer = cache.create_and_load_tree(0).unwrap();
                cache.release_tree(&pointer);
                pointer
            })
            .collect();

        // The third creation evicted both idle entries
        assert_eq!(cache.len(), 1);

        // Pin, release and pin again: the entry's old position is stale
        let kept = cache.create_and_load_tree(0).unwrap();
        cache.release_tree(&kept);
        cache.load_tree(&kept).unwrap().unwrap();
        for _ in 0..3 {
            let pointer = cache.create_and_load_tree(0).unwrap();
            cache.release_tree(&pointer);
        }
        assert!(cache.contains(&kept));
        assert!(cache.len() <= 2);
        assert!(pointers.iter().all(|p| !cache.contains(p)));
    }

    #[test]
    fn test_cache_may_exceed_maximum_when_all_pinned() {
        let cache = cache(2, 10);
        for _ in 0..5 {
            cache.create_and_load_tree(0).unwrap();
        }
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn test_clear_ignores_pins() {
        let cache = cache(10, 10);
        cache.create_and_load_tree(0).unwrap();
        cache.create_and_load_tree(0).unwrap();

        cache.close();
        assert!(cache.is_empty());
    }
}
