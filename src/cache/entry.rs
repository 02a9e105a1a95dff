//! Cache entry - one cached tree and its pin count.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// A cached tree instance.
///
/// # Pinning
/// `usage` counts loads not yet released. An entry with `usage > 0` is never
/// evicted or deleted. Counter changes happen while the cache map's shard is
/// locked, so they cannot interleave with an eviction's check-and-remove.
#[derive(Debug)]
pub struct CacheEntry<T> {
    tree: Arc<T>,
    usage: AtomicU32,
    /// Cache tick of the most recent load.
    last_access: AtomicU64,
}

impl<T> CacheEntry<T> {
    pub fn new(tree: Arc<T>, usage: u32, tick: u64) -> Self {
        Self {
            tree,
            usage: AtomicU32::new(usage),
            last_access: AtomicU64::new(tick),
        }
    }

    #[inline]
    pub fn tree(&self) -> &Arc<T> {
        &self.tree
    }

    #[inline]
    pub fn usage(&self) -> u32 {
        self.usage.load(Ordering::Acquire)
    }

    #[inline]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.usage() > 0
    }

    /// Pin the entry and record an access.
    ///
    /// Returns the previous access tick if the entry was unpinned.
    pub fn acquire(&self, tick: u64) -> Option<u64> {
        let previous = self.last_access.fetch_max(tick, Ordering::Relaxed);
        let was_unpinned = self.usage.fetch_add(1, Ordering::AcqRel) == 0;
        was_unpinned.then_some(previous)
    }

    /// Unpin the entry. Returns whether this was the last pin.
    ///
    /// # Panics
    /// Panics if the entry is not pinned.
    pub fn release(&self) -> bool {
        let released = self
            .usage
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |usage| {
                usage.checked_sub(1)
            });
        assert!(released.is_ok(), "usage counter underflow");
        released == Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release() {
        let entry = CacheEntry::new(Arc::new("tree"), 1, 5);
        assert!(entry.is_pinned());

        assert_eq!(entry.acquire(9), None);
        assert_eq!(entry.usage(), 2);
        assert_eq!(entry.last_access(), 9);

        assert!(!entry.release());
        assert!(entry.release());
        assert!(!entry.is_pinned());
        assert_eq!(entry.acquire(12), Some(9));
    }

    #[test]
    fn test_access_tick_never_goes_back() {
        let entry = CacheEntry::new(Arc::new(()), 0, 10);
        entry.acquire(4);
        assert_eq!(entry.last_access(), 10);
    }

    #[test]
    #[should_panic(expected = "usage counter underflow")]
    fn test_release_unpinned_panics() {
        let entry = CacheEntry::new(Arc::new(()), 0, 0);
        entry.release();
    }
}
