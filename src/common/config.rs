//! Configuration constants and settings for durabletree.

/// Size of a page in bytes (4KB).
///
/// Matches the OS page size on most systems. Every tree record must fit in
/// the payload area of a single page.
pub const PAGE_SIZE: usize = 4096;

/// Extension appended to a tree's name to form its backing file name.
pub const TREE_FILE_EXTENSION: &str = ".sbc";

/// Name of the file that persists the file-id → file-name map of a
/// [`DiskStorage`](crate::storage::DiskStorage) directory.
pub const FILE_MAP_NAME: &str = "files.map";

/// Default upper bound on the number of cached tree instances.
pub const DEFAULT_CACHE_MAX_SIZE: usize = 10_000;

/// Default number of least-recently-used entries scanned per eviction pass.
pub const DEFAULT_EVICTION_THRESHOLD: usize = 1_000;

/// Number of entries a range cursor fetches per batch.
pub const DEFAULT_CURSOR_PREFETCH: usize = 64;

/// Settings for the [`TreeCache`](crate::cache::TreeCache).
///
/// # Example
/// ```
/// use durabletree::CacheConfig;
///
/// let config = CacheConfig::new(128, 16);
/// assert_eq!(config.max_size, 128);
/// assert_eq!(CacheConfig::default().eviction_threshold, 1_000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Cache size above which eviction passes run.
    pub max_size: usize,
    /// How many least-recently-used entries one eviction pass inspects.
    pub eviction_threshold: usize,
}

impl CacheConfig {
    /// Create a cache configuration.
    ///
    /// # Panics
    /// Panics if either value is 0.
    pub fn new(max_size: usize, eviction_threshold: usize) -> Self {
        assert!(max_size > 0, "max_size must be > 0");
        assert!(eviction_threshold > 0, "eviction_threshold must be > 0");

        Self {
            max_size,
            eviction_threshold,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_MAX_SIZE, DEFAULT_EVICTION_THRESHOLD)
    }
}
