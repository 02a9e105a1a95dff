//! Storage-specific tree creation and loading for the cache.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::common::config::TREE_FILE_EXTENSION;
use crate::common::{CollectionPointer, Error, PageId, Result};
use crate::index::{SBTree, TreeConfig};
use crate::storage::AtomicOperationsManager;

/// A tree instance that knows where it is persisted.
pub trait CachedTree: Send + Sync {
    fn collection_pointer(&self) -> CollectionPointer;
}

/// Creates and locates trees for a [`TreeCache`](super::TreeCache).
///
/// The cache itself never touches storage; everything storage-specific goes
/// through this trait.
pub trait TreeLoader: Send + Sync {
    type Tree: CachedTree;

    /// Create and persist a brand-new tree.
    fn create_tree(&self, location_hint: u32) -> Result<Self::Tree>;

    /// Load the tree `pointer` refers to, or `None` if there is no such tree.
    fn load_tree(&self, pointer: &CollectionPointer) -> Result<Option<Self::Tree>>;
}

/// An opened [`SBTree`] with the pointer it was created or loaded under.
///
/// The tree is closed when the last handle is dropped, for example after the
/// cache evicts it.
pub struct DiskTree<K, V> {
    pointer: CollectionPointer,
    tree: SBTree<K, V>,
}

impl<K, V> Deref for DiskTree<K, V> {
    type Target = SBTree<K, V>;

    fn deref(&self) -> &SBTree<K, V> {
        &self.tree
    }
}

impl<K, V> CachedTree for DiskTree<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn collection_pointer(&self) -> CollectionPointer {
        self.pointer
    }
}

/// [`TreeLoader`] keeping each sub-tree in its own file of one storage.
///
/// Files are named `{prefix}_{hint}_{sequence}.sbc`. The location hint is
/// stored as the tree's generation, so a pointer whose generation differs
/// from the one on disk does not load.
pub struct DiskTreeLoader<K, V> {
    atomic: Arc<AtomicOperationsManager>,
    prefix: String,
    config: TreeConfig<K, V>,
    sequence: AtomicU64,
}

impl<K, V> DiskTreeLoader<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(
        atomic: Arc<AtomicOperationsManager>,
        prefix: impl Into<String>,
        config: TreeConfig<K, V>,
    ) -> Self {
        Self {
            atomic,
            prefix: prefix.into(),
            config,
            sequence: AtomicU64::new(0),
        }
    }

    fn next_name(&self, location_hint: u32) -> String {
        let storage = self.atomic.storage();
        loop {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            let name = format!("{}_{}_{}", self.prefix, location_hint, sequence);
            if !storage.is_file_exists(&format!("{}{}", name, TREE_FILE_EXTENSION)) {
                return name;
            }
        }
    }

    fn wrap(tree: SBTree<K, V>) -> Result<DiskTree<K, V>> {
        let pointer = tree
            .collection_pointer()
            .ok_or_else(|| Error::NotOpened(tree.name().to_string()))?;
        Ok(DiskTree { pointer, tree })
    }
}

impl<K, V> TreeLoader for DiskTreeLoader<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    type Tree = DiskTree<K, V>;

    fn create_tree(&self, location_hint: u32) -> Result<DiskTree<K, V>> {
        let tree = SBTree::new(self.next_name(location_hint), Arc::clone(&self.atomic));
        tree.create(self.config.clone().with_generation(location_hint))?;
        Self::wrap(tree)
    }

    fn load_tree(&self, pointer: &CollectionPointer) -> Result<Option<DiskTree<K, V>>> {
        if pointer.root_page != PageId::new(0) {
            return Ok(None);
        }
        let Some(file_name) = self.atomic.storage().file_name(pointer.file_id) else {
            return Ok(None);
        };
        let Some(name) = file_name.strip_suffix(TREE_FILE_EXTENSION) else {
            return Ok(None);
        };

        let tree = SBTree::new(name, Arc::clone(&self.atomic));
        match tree.open(self.config.clone()) {
            Ok(()) => {}
            Err(e) if matches!(e.root_cause(), Error::FileNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        }

        // Dropping `tree` releases its open of the file.
        if tree.generation() != Some(pointer.generation) {
            trace!(%pointer, "generation mismatch");
            return Ok(None);
        }
        Self::wrap(tree).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FileId;
    use crate::encoding::primitives::{LongEncoder, StringEncoder};
    use crate::encoding::ValueType;
    use crate::index::OrderedIndex;
    use crate::storage::{DiskStorage, PageStorage};
    use tempfile::tempdir;

    fn loader(dir: &std::path::Path) -> DiskTreeLoader<i64, String> {
        let storage: Arc<dyn PageStorage> = Arc::new(DiskStorage::open(dir).unwrap());
        DiskTreeLoader::new(
            Arc::new(AtomicOperationsManager::new(storage)),
            "sub",
            TreeConfig::new(Arc::new(LongEncoder), Arc::new(StringEncoder), ValueType::Long),
        )
    }

    #[test]
    fn test_create_then_load() {
        let dir = tempdir().unwrap();
        let loader = loader(dir.path());

        let created = loader.create_tree(7).unwrap();
        assert_eq!(created.name(), "sub_7_0");
        created.put(1, "one".to_string()).unwrap();

        let pointer = created.collection_pointer();
        assert_eq!(pointer.generation, 7);

        let loaded = loader.load_tree(&pointer).unwrap().unwrap();
        assert_eq!(loaded.collection_pointer(), pointer);
        assert_eq!(loaded.get(&1).unwrap().as_deref(), Some("one"));
    }

    #[test]
    fn test_unknown_pointers_load_nothing() {
        let dir = tempdir().unwrap();
        let loader = loader(dir.path());
        let pointer = loader.create_tree(1).unwrap().collection_pointer();

        let unknown_file = CollectionPointer::new(FileId::new(999), PageId::new(0), 1);
        let wrong_generation = CollectionPointer { generation: 2, ..pointer };
        let wrong_root = CollectionPointer { root_page: PageId::new(3), ..pointer };

        assert!(loader.load_tree(&unknown_file).unwrap().is_none());
        assert!(loader.load_tree(&wrong_generation).unwrap().is_none());
        assert!(loader.load_tree(&wrong_root).unwrap().is_none());
    }

    #[test]
    fn test_names_skip_existing_files() {
        let dir = tempdir().unwrap();
        loader(dir.path()).create_tree(3).unwrap();

        // A fresh loader over the same directory starts counting at 0 again
        let again = loader(dir.path()).create_tree(3).unwrap();
        assert_eq!(again.name(), "sub_3_1");
    }
}
