//! SBTree - a durable ordered index stored in a single file.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SBTree<K, V>                         │
//! │  state: RwLock<Option<OpenTree>>   encoders, file, config   │
//! │  data:  RwLock<BTreeMap<K, V>>     live entries             │
//! │  null:  RwLock<NullSlot>           null-key value, log tail │
//! └──────────────────────────────┬──────────────────────────────┘
//!                                │ atomic operations
//!                                ▼
//!   page 0: TreeMeta   pages 1..: entry log (put/remove records)
//! ```
//!
//! Lifecycle operations (create, open, close, reset, delete, compact) hold
//! the `state` write lock. Mutations hold the `state` read lock and a writer
//! mutex while their record is appended and committed, then publish the
//! change to `data`. Reads only take the `state` read lock and `data`.

mod entries;
mod meta;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::common::config::TREE_FILE_EXTENSION;
use crate::common::{CollectionPointer, Error, FileId, PageId, Result};
use crate::encoding::{
    Encodable, Encoder, EncoderKind, EncoderProvider, SizePreference, ValueType,
};
use crate::index::cursor::RangeCursor;
use crate::index::durable::DurableComponent;
use crate::index::ordered::{Direction, OrderedIndex};
use crate::storage::page::{Page, PageType};
use crate::storage::{
    AtomicOperation, AtomicOperationsManager, NoopStatistics, OperationKind,
    PerformanceStatistics,
};

use entries::{LogEnd, Record, RecordRef, Tail};
use meta::TreeMeta;

/// Encoding configuration of a tree.
///
/// # Example
/// ```
/// use durabletree::encoding::{EncoderProvider, SizePreference, ValueType};
/// use durabletree::index::TreeConfig;
///
/// let config = TreeConfig::<i64, String>::resolve(
///     &EncoderProvider::new(),
///     ValueType::DateTime,
///     SizePreference::PreferVariable,
/// )
/// .unwrap()
/// .with_null_keys(true);
///
/// assert!(config.null_key_allowed);
/// assert!(!config.key_encoder.is_of_fixed_size());
/// ```
pub struct TreeConfig<K, V> {
    pub key_encoder: Arc<dyn Encoder<K>>,
    pub value_encoder: Arc<dyn Encoder<V>>,
    pub key_type: ValueType,
    /// Maximum encoded key size; `None` means unbound.
    pub key_size: Option<usize>,
    pub null_key_allowed: bool,
    /// Opaque tag persisted with the tree.
    pub generation: u32,
}

impl<K, V> TreeConfig<K, V> {
    pub fn new(
        key_encoder: Arc<dyn Encoder<K>>,
        value_encoder: Arc<dyn Encoder<V>>,
        key_type: ValueType,
    ) -> Self {
        Self {
            key_encoder,
            value_encoder,
            key_type,
            key_size: None,
            null_key_allowed: false,
            generation: 0,
        }
    }

    pub fn with_key_size(mut self, key_size: usize) -> Self {
        self.key_size = Some(key_size);
        self
    }

    pub fn with_null_keys(mut self, allowed: bool) -> Self {
        self.null_key_allowed = allowed;
        self
    }

    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = generation;
        self
    }

    fn meta(&self) -> TreeMeta {
        TreeMeta {
            key_encoder: self.key_encoder.id(),
            value_encoder: self.value_encoder.id(),
            key_type: self.key_type,
            key_size: self.key_size,
            null_key_allowed: self.null_key_allowed,
            generation: self.generation,
        }
    }
}

impl<K: Encodable, V: Encodable> TreeConfig<K, V> {
    /// Resolve both encoders through the registry.
    pub fn resolve(
        provider: &EncoderProvider,
        key_type: ValueType,
        preference: SizePreference,
    ) -> Result<Self> {
        Ok(Self::new(
            provider.encoder_for_type::<K>(key_type, preference)?,
            provider.encoder::<V>(preference)?,
            key_type,
        ))
    }
}

impl<K, V> Clone for TreeConfig<K, V> {
    fn clone(&self) -> Self {
        Self {
            key_encoder: Arc::clone(&self.key_encoder),
            value_encoder: Arc::clone(&self.value_encoder),
            key_type: self.key_type,
            key_size: self.key_size,
            null_key_allowed: self.null_key_allowed,
            generation: self.generation,
        }
    }
}

impl<K, V> fmt::Debug for TreeConfig<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeConfig")
            .field("key_encoder", &self.key_encoder)
            .field("value_encoder", &self.value_encoder)
            .field("key_type", &self.key_type)
            .field("key_size", &self.key_size)
            .field("null_key_allowed", &self.null_key_allowed)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Entries, null-key value and log end read back from disk.
type Loaded<K, V> = (BTreeMap<K, V>, Option<V>, LogEnd);

/// State of an opened tree.
struct OpenTree<K, V> {
    config: TreeConfig<K, V>,
    file: FileId,
}

/// Null-key value and the entry-log tail; changed together with `data`.
struct NullSlot<V> {
    value: Option<V>,
    tail: Option<Tail>,
}

/// A durable ordered index over one backing file.
///
/// # Thread Safety
/// `SBTree` is `Send + Sync`; all methods take `&self`.
///
/// # Durability
/// Every mutation that returns `Ok` has been appended to the entry log and
/// committed. A failed mutation leaves both memory and disk unchanged.
pub struct SBTree<K, V> {
    component: DurableComponent,
    state: RwLock<Option<OpenTree<K, V>>>,
    writer: Mutex<()>,
    data: RwLock<BTreeMap<K, V>>,
    null: RwLock<NullSlot<V>>,
}

impl<K, V> SBTree<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    /// A not-yet-opened tree backed by `name` + `.sbc`.
    pub fn new(name: impl Into<String>, atomic: Arc<AtomicOperationsManager>) -> Self {
        Self::with_statistics(name, atomic, Arc::new(NoopStatistics))
    }

    pub fn with_statistics(
        name: impl Into<String>,
        atomic: Arc<AtomicOperationsManager>,
        stats: Arc<dyn PerformanceStatistics>,
    ) -> Self {
        Self {
            component: DurableComponent::with_statistics(
                name,
                TREE_FILE_EXTENSION,
                atomic,
                stats,
            ),
            state: RwLock::new(None),
            writer: Mutex::new(()),
            data: RwLock::new(BTreeMap::new()),
            null: RwLock::new(NullSlot {
                value: None,
                tail: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.component.name()
    }

    /// Name of the backing file.
    pub fn full_name(&self) -> String {
        self.component.full_name()
    }

    pub fn is_opened(&self) -> bool {
        self.state.read().is_some()
    }

    /// Backing file, while opened.
    pub fn file_id(&self) -> Option<FileId> {
        self.state.read().as_ref().map(|tree| tree.file)
    }

    pub fn key_size(&self) -> Option<usize> {
        self.state.read().as_ref().and_then(|tree| tree.config.key_size)
    }

    pub fn is_null_key_allowed(&self) -> bool {
        self.state
            .read()
            .as_ref()
            .is_some_and(|tree| tree.config.null_key_allowed)
    }

    pub fn generation(&self) -> Option<u32> {
        self.state.read().as_ref().map(|tree| tree.config.generation)
    }

    /// Pointer to this tree's metadata page, while opened.
    pub fn collection_pointer(&self) -> Option<CollectionPointer> {
        self.state
            .read()
            .as_ref()
            .map(|tree| CollectionPointer::new(tree.file, PageId::new(0), tree.config.generation))
    }

    /// Label of the lifecycle or write operation in flight, if any.
    pub fn current_operation(&self) -> Option<&'static str> {
        self.component.current_operation()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create the backing file and open the tree.
    ///
    /// # Errors
    /// [`Error::Lifecycle`] with operation `"creation"`. The tree stays
    /// not-opened and no backing file is left behind.
    pub fn create(&self, config: TreeConfig<K, V>) -> Result<()> {
        let _track = self.component.track(OperationKind::Create);
        let mut installed = false;

        let result = self.component.in_atomic_operation("creation", |op| {
            let mut state = self.state.write();
            if state.is_some() {
                return Err(Error::AlreadyOpened(self.name().to_string()));
            }
            check_key_type(&config)?;

            let file = op.add_file(&self.full_name())?;
            write_meta(op, file, &config)?;

            self.clear_data();
            *state = Some(OpenTree { config, file });
            installed = true;
            Ok(())
        });

        if result.is_err() && installed {
            self.abandon();
        }
        if result.is_ok() {
            debug!(tree = %self.name(), "created");
        }
        result
    }

    /// Open an existing tree, checking its stored encoders against `config`.
    ///
    /// Key size, null-key support and generation are taken from disk.
    ///
    /// # Errors
    /// [`Error::Lifecycle`] with operation `"open"`; the cause is
    /// [`Error::FileNotFound`] when there is no backing file and
    /// [`Error::EncoderMismatch`] when the encoders differ.
    pub fn open(&self, config: TreeConfig<K, V>) -> Result<()> {
        let _track = self.component.track(OperationKind::Open);
        let mut state = self.state.write();

        let result = self.open_locked(&mut state, config);
        drop(state);

        match result {
            Ok(()) => {
                debug!(tree = %self.name(), "opened");
                Ok(())
            }
            Err(e) => Err(e.lifecycle("open", self.name())),
        }
    }

    fn open_locked(
        &self,
        state: &mut Option<OpenTree<K, V>>,
        mut config: TreeConfig<K, V>,
    ) -> Result<()> {
        if state.is_some() {
            return Err(Error::AlreadyOpened(self.name().to_string()));
        }
        let storage = self.component.storage();
        let file = storage.open_file(&self.full_name())?;

        let loaded = self
            .load(file, &mut config)
            .and_then(|loaded| self.recover(file, &loaded.2).map(|()| loaded));

        match loaded {
            Ok((map, value, end)) => {
                *self.data.write() = map;
                *self.null.write() = NullSlot {
                    value,
                    tail: end.tail,
                };
                *state = Some(OpenTree { config, file });
                Ok(())
            }
            Err(e) => {
                let _ = storage.close_file(file, false);
                Err(e)
            }
        }
    }

    /// Validate the metadata page and replay the entry log.
    fn load(&self, file: FileId, config: &mut TreeConfig<K, V>) -> Result<Loaded<K, V>> {
        let storage = self.component.storage();
        if storage.page_count(file)? == 0 {
            return Err(Error::Corrupted(format!(
                "{} has no metadata page",
                self.full_name()
            )));
        }
        let page = storage.read_page(file, PageId::new(0))?;
        page.expect_type(PageType::TreeMeta, file, PageId::new(0))?;
        let stored = TreeMeta::read_from(&page)?;
        self.check_meta(&stored, config)?;

        config.key_size = stored.key_size;
        config.null_key_allowed = stored.null_key_allowed;
        config.generation = stored.generation;

        let mut map = BTreeMap::new();
        let mut null = None;
        let end = entries::replay(
            storage.as_ref(),
            file,
            config.key_encoder.as_ref(),
            config.value_encoder.as_ref(),
            |record| match record {
                Record::Put(key, value) => {
                    map.insert(key, value);
                }
                Record::Remove(key) => {
                    map.remove(&key);
                }
                Record::PutNull(value) => null = Some(value),
                Record::RemoveNull => null = None,
            },
        )?;
        Ok((map, null, end))
    }

    /// Reseal or cut off the last entry page if an append was interrupted.
    fn recover(&self, file: FileId, end: &LogEnd) -> Result<()> {
        let Some(page) = end.torn else {
            return Ok(());
        };
        self.component
            .in_atomic_operation("recovery", |op| entries::repair(op, file, end))?;

        warn!(
            tree = %self.name(),
            %page,
            resealed = end.tail.is_some_and(|tail| tail.page == page),
            "repaired entry log after an interrupted append"
        );
        Ok(())
    }

    fn check_meta(&self, stored: &TreeMeta, config: &TreeConfig<K, V>) -> Result<()> {
        let mismatch = |what: &'static str, stored: u8, supplied: u8| Error::EncoderMismatch {
            component: self.name().to_string(),
            what,
            stored,
            supplied,
        };

        if stored.key_encoder != config.key_encoder.id() {
            return Err(mismatch("key", stored.key_encoder, config.key_encoder.id()));
        }
        if stored.value_encoder != config.value_encoder.id() {
            return Err(mismatch(
                "value",
                stored.value_encoder,
                config.value_encoder.id(),
            ));
        }
        if stored.key_type.type_tag() != config.key_type.type_tag() {
            return Err(mismatch(
                "key type",
                stored.key_type.id(),
                config.key_type.id(),
            ));
        }
        Ok(())
    }

    /// Flush and close the backing file.
    pub fn close(&self) -> Result<()> {
        let _track = self.component.track(OperationKind::Close);
        let mut state = self.state.write();

        let result = match state.as_ref() {
            None => Err(Error::NotOpened(self.name().to_string())),
            Some(tree) => self.component.storage().close_file(tree.file, true),
        };
        if result.is_ok() {
            *state = None;
            self.clear_data();
            debug!(tree = %self.name(), "closed");
        }
        result.map_err(|e| e.lifecycle("close", self.name()))
    }

    /// Remove every entry, keeping the tree opened with the same encoders.
    pub fn reset(&self) -> Result<()> {
        let _track = self.component.track(OperationKind::Reset);
        let mut applied = false;

        let result = self.component.in_atomic_operation("reset", |op| {
            let state = self.state.write();
            let tree = state
                .as_ref()
                .ok_or_else(|| Error::NotOpened(self.name().to_string()))?;

            // The metadata page is kept as is
            op.truncate_pages(tree.file, 1)?;

            self.clear_data();
            applied = true;
            Ok(())
        });

        if result.is_err() && applied {
            self.abandon();
        }
        result
    }

    /// Delete the backing file.
    ///
    /// A tree that is not opened but has a backing file is opened transiently
    /// and deleted. Deleting a tree with no backing file does nothing.
    pub fn delete(&self) -> Result<()> {
        let _track = self.component.track(OperationKind::Delete);
        let mut transient = None;

        let result = self.component.in_atomic_operation("delete", |op| {
            let mut state = self.state.write();
            let storage = self.component.storage();
            let full_name = self.full_name();

            let file = match state.as_ref() {
                Some(tree) => Some(tree.file),
                None if storage.is_file_exists(&full_name) => {
                    let file = storage.open_file(&full_name)?;
                    transient = Some(file);
                    Some(file)
                }
                None => None,
            };
            if let Some(file) = file {
                op.delete_file(file)?;
            }

            *state = None;
            self.clear_data();
            Ok(file.is_some())
        });

        match result {
            Ok(true) => {
                debug!(tree = %self.name(), "deleted");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                if let Some(file) = transient {
                    let _ = self.component.storage().close_file(file, false);
                }
                self.abandon();
                Err(e)
            }
        }
    }

    /// Rewrite the entry log with one record per live entry.
    pub fn compact(&self) -> Result<()> {
        let _track = self.component.track(OperationKind::Write);
        let mut applied = false;

        let result = self.component.in_atomic_operation("compaction", |op| {
            let state = self.state.write();
            let tree = state
                .as_ref()
                .ok_or_else(|| Error::NotOpened(self.name().to_string()))?;
            let keys = tree.config.key_encoder.as_ref();
            let values = tree.config.value_encoder.as_ref();

            op.truncate_file(tree.file)?;
            write_meta(op, tree.file, &tree.config)?;

            let data = self.data.read();
            let mut null = self.null.write();
            let mut tail = None;
            if let Some(value) = null.value.as_ref() {
                let record = RecordRef::<K, V>::PutNull(value).encode(keys, values)?;
                tail = Some(entries::append(op, tree.file, tail, &record)?);
            }
            for (key, value) in data.iter() {
                let record = RecordRef::Put(key, value).encode(keys, values)?;
                tail = Some(entries::append(op, tree.file, tail, &record)?);
            }

            let old = std::mem::replace(&mut null.tail, tail);
            applied = true;
            Ok((old, tail))
        });

        match result {
            Ok((old, new)) => {
                debug!(
                    tree = %self.name(),
                    before = old.map_or(0, |t| t.page.0),
                    after = new.map_or(0, |t| t.page.0),
                    "compacted entry log"
                );
                Ok(())
            }
            Err(e) => {
                if applied {
                    self.abandon();
                }
                Err(e)
            }
        }
    }

    // ========================================================================
    // Null key
    // ========================================================================

    /// Value stored under the null key.
    pub fn get_null(&self) -> Result<Option<V>> {
        let _track = self.component.track(OperationKind::Read);
        let state = self.state.read();
        self.null_tree(&state)?;
        Ok(self.null.read().value.clone())
    }

    /// Store `value` under the null key. Returns whether one was present.
    pub fn put_null(&self, value: V) -> Result<bool> {
        let _track = self.component.track(OperationKind::Write);
        let state = self.state.read();
        let tree = self.null_tree(&state)?;

        let record = RecordRef::<K, V>::PutNull(&value)
            .encode(tree.config.key_encoder.as_ref(), tree.config.value_encoder.as_ref())?;
        let _writer = self.writer.lock();
        self.append_committed("put", tree.file, &record)?;

        Ok(self.null.write().value.replace(value).is_some())
    }

    /// Remove the null-key value. Returns whether one was present.
    pub fn remove_null(&self) -> Result<bool> {
        let _track = self.component.track(OperationKind::Write);
        let state = self.state.read();
        let tree = self.null_tree(&state)?;

        let _writer = self.writer.lock();
        if self.null.read().value.is_none() {
            return Ok(false);
        }
        let record = RecordRef::<K, V>::RemoveNull
            .encode(tree.config.key_encoder.as_ref(), tree.config.value_encoder.as_ref())?;
        self.append_committed("remove", tree.file, &record)?;

        Ok(self.null.write().value.take().is_some())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn opened<'s>(&self, state: &'s Option<OpenTree<K, V>>) -> Result<&'s OpenTree<K, V>> {
        state
            .as_ref()
            .ok_or_else(|| Error::NotOpened(self.name().to_string()))
    }

    fn null_tree<'s>(&self, state: &'s Option<OpenTree<K, V>>) -> Result<&'s OpenTree<K, V>> {
        let tree = self.opened(state)?;
        if !tree.config.null_key_allowed {
            return Err(Error::NullKeyNotAllowed(self.name().to_string()));
        }
        Ok(tree)
    }

    fn check_key_size(&self, tree: &OpenTree<K, V>, key: &K) -> Result<()> {
        if let Some(limit) = tree.config.key_size {
            let size = tree.config.key_encoder.exact_size(key);
            if size > limit {
                return Err(Error::KeySizeExceeded { size, limit });
            }
        }
        Ok(())
    }

    /// Append `record` in its own atomic operation and advance the tail.
    ///
    /// The caller holds the writer mutex.
    fn append_committed(&self, label: &'static str, file: FileId, record: &[u8]) -> Result<()> {
        let tail = self.null.read().tail;
        let tail = self
            .component
            .in_atomic_operation(label, |op| entries::append(op, file, tail, record))?;
        self.null.write().tail = Some(tail);
        Ok(())
    }

    fn clear_data(&self) {
        self.data.write().clear();
        *self.null.write() = NullSlot {
            value: None,
            tail: None,
        };
    }

    /// Drop to the not-opened state after a lifecycle commit failed.
    fn abandon(&self) {
        let mut state = self.state.write();
        if let Some(tree) = state.take() {
            let _ = self.component.storage().close_file(tree.file, false);
        }
        self.clear_data();
        warn!(tree = %self.name(), "tree left not opened after a failed lifecycle operation");
    }
}

/// Dropping an opened tree closes it, releasing its open of the backing file.
impl<K, V> Drop for SBTree<K, V> {
    fn drop(&mut self) {
        if let Some(tree) = self.state.get_mut().take() {
            if let Err(e) = self.component.storage().close_file(tree.file, true) {
                warn!(tree = %self.component.name(), error = %e, "failed to close dropped tree");
            }
        }
    }
}

impl<K, V> OrderedIndex<K, V> for SBTree<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    type Cursor<'a> = RangeCursor<'a, K, V> where Self: 'a;

    fn size(&self) -> Result<u64> {
        let _track = self.component.track(OperationKind::Read);
        let state = self.state.read();
        self.opened(&state)?;

        let null = self.null.read().value.is_some() as u64;
        Ok(self.data.read().len() as u64 + null)
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        let _track = self.component.track(OperationKind::Read);
        let state = self.state.read();
        self.opened(&state)?;

        Ok(self.data.read().get(key).cloned())
    }

    fn contains(&self, key: &K) -> Result<bool> {
        let _track = self.component.track(OperationKind::Read);
        let state = self.state.read();
        self.opened(&state)?;

        Ok(self.data.read().contains_key(key))
    }

    fn put(&self, key: K, value: V) -> Result<bool> {
        let _track = self.component.track(OperationKind::Write);
        let state = self.state.read();
        let tree = self.opened(&state)?;
        self.check_key_size(tree, &key)?;

        let record = RecordRef::Put(&key, &value)
            .encode(tree.config.key_encoder.as_ref(), tree.config.value_encoder.as_ref())?;
        let _writer = self.writer.lock();
        self.append_committed("put", tree.file, &record)?;

        Ok(self.data.write().insert(key, value).is_some())
    }

    fn remove(&self, key: &K) -> Result<bool> {
        let _track = self.component.track(OperationKind::Write);
        let state = self.state.read();
        let tree = self.opened(&state)?;

        let _writer = self.writer.lock();
        if !self.data.read().contains_key(key) {
            return Ok(false);
        }
        let record = RecordRef::<K, V>::Remove(key)
            .encode(tree.config.key_encoder.as_ref(), tree.config.value_encoder.as_ref())?;
        self.append_committed("remove", tree.file, &record)?;

        Ok(self.data.write().remove(key).is_some())
    }

    fn first_key(&self) -> Result<Option<K>> {
        let _track = self.component.track(OperationKind::Read);
        let state = self.state.read();
        self.opened(&state)?;

        Ok(self.data.read().keys().next().cloned())
    }

    fn last_key(&self) -> Result<Option<K>> {
        let _track = self.component.track(OperationKind::Read);
        let state = self.state.read();
        self.opened(&state)?;

        Ok(self.data.read().keys().next_back().cloned())
    }

    fn range<'a>(
        &'a self,
        begin: Bound<&K>,
        end: Bound<&K>,
        direction: Direction,
    ) -> Result<Self::Cursor<'a>> {
        let _track = self.component.track(OperationKind::Read);
        let state = self.state.read();
        self.opened(&state)?;

        Ok(RangeCursor::new(&self.data, begin, end, direction))
    }
}

/// Reject a key encoder that encodes another type than `key_type`.
fn check_key_type<K, V>(config: &TreeConfig<K, V>) -> Result<()> {
    if let Some(kind) = EncoderKind::from_id(config.key_encoder.id()) {
        if kind.type_tag() != config.key_type.type_tag() {
            return Err(Error::TypeMismatch {
                expected: config.key_type.type_tag(),
                actual: kind.type_tag(),
            });
        }
    }
    Ok(())
}

/// Write the metadata page as page 0 of a freshly created or truncated file.
fn write_meta<K, V>(op: &mut AtomicOperation, file: FileId, config: &TreeConfig<K, V>) -> Result<()> {
    let page_id = op.allocate_page(file)?;
    debug_assert_eq!(page_id, PageId::new(0));

    let mut page = Page::new();
    config.meta().write_to(&mut page)?;
    page.seal(PageType::TreeMeta, page_id, op.id());
    op.write_page(file, page_id, &page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::primitives::{IntegerEncoder, LongEncoder, StringEncoder};
    use crate::storage::{ComponentStatistics, DiskStorage, PageStorage};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::{tempdir, TempDir};

    /// Storage that can be told to fail page writes or syncs.
    struct FlakyStorage {
        inner: DiskStorage,
        fail_writes: AtomicBool,
        fail_syncs: AtomicBool,
    }

    impl FlakyStorage {
        fn injected() -> Error {
            Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "injected"))
        }
    }

    impl PageStorage for FlakyStorage {
        fn add_file(&self, name: &str) -> Result<FileId> {
            self.inner.add_file(name)
        }
        fn open_file(&self, name: &str) -> Result<FileId> {
            self.inner.open_file(name)
        }
        fn is_file_exists(&self, name: &str) -> bool {
            self.inner.is_file_exists(name)
        }
        fn file_name(&self, file: FileId) -> Option<String> {
            self.inner.file_name(file)
        }
        fn close_file(&self, file: FileId, flush: bool) -> Result<()> {
            self.inner.close_file(file, flush)
        }
        fn delete_file(&self, file: FileId) -> Result<()> {
            self.inner.delete_file(file)
        }
        fn truncate_file(&self, file: FileId) -> Result<()> {
            self.inner.truncate_file(file)
        }
        fn restore_file(&self, file: FileId, name: &str) -> Result<()> {
            self.inner.restore_file(file, name)
        }
        fn page_count(&self, file: FileId) -> Result<u32> {
            self.inner.page_count(file)
        }
        fn allocate_page(&self, file: FileId) -> Result<PageId> {
            self.inner.allocate_page(file)
        }
        fn read_page(&self, file: FileId, page: PageId) -> Result<Page> {
            self.inner.read_page(file, page)
        }
        fn write_page(&self, file: FileId, page: PageId, data: &Page) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Self::injected());
            }
            self.inner.write_page(file, page, data)
        }
        fn truncate_pages(&self, file: FileId, page_count: u32) -> Result<()> {
            self.inner.truncate_pages(file, page_count)
        }
        fn sync_file(&self, file: FileId) -> Result<()> {
            if self.fail_syncs.load(Ordering::SeqCst) {
                return Err(Self::injected());
            }
            self.inner.sync_file(file)
        }
    }

    fn setup() -> (TempDir, Arc<AtomicOperationsManager>) {
        let dir = tempdir().unwrap();
        let storage: Arc<dyn PageStorage> = Arc::new(DiskStorage::open(dir.path()).unwrap());
        (dir, Arc::new(AtomicOperationsManager::new(storage)))
    }

    fn flaky() -> (TempDir, Arc<FlakyStorage>, Arc<AtomicOperationsManager>) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(FlakyStorage {
            inner: DiskStorage::open(dir.path()).unwrap(),
            fail_writes: AtomicBool::new(false),
            fail_syncs: AtomicBool::new(false),
        });
        let atomic = Arc::new(AtomicOperationsManager::new(storage.clone()));
        (dir, storage, atomic)
    }

    fn config() -> TreeConfig<i32, String> {
        TreeConfig::new(
            Arc::new(IntegerEncoder),
            Arc::new(StringEncoder),
            ValueType::Integer,
        )
    }

    #[test]
    fn test_create_and_use() {
        let (_dir, atomic) = setup();
        let tree = SBTree::new("users", atomic.clone());

        tree.create(config()).unwrap();
        assert!(tree.is_opened());
        assert_eq!(tree.full_name(), "users.sbc");
        assert!(atomic.storage().is_file_exists("users.sbc"));

        assert!(!tree.put(1, "one".to_string()).unwrap());
        assert!(tree.put(1, "uno".to_string()).unwrap());
        assert_eq!(tree.get(&1).unwrap().as_deref(), Some("uno"));
        assert_eq!(tree.get(&2).unwrap(), None);
        assert_eq!(tree.size().unwrap(), 1);
        assert!(tree.remove(&1).unwrap());
        assert!(!tree.remove(&1).unwrap());
        assert_eq!(tree.size().unwrap(), 0);
    }

    #[test]
    fn test_create_twice_fails() {
        let (_dir, atomic) = setup();
        let tree = SBTree::new("t", atomic);

        tree.create(config()).unwrap();
        let err = tree.create(config()).unwrap_err();

        assert_eq!(err.operation(), Some("creation"));
        assert!(matches!(err.root_cause(), Error::AlreadyOpened(_)));
        assert!(tree.is_opened());
    }

    #[test]
    fn test_failed_create_rolls_back() {
        let (_dir, storage, atomic) = flaky();
        let tree = SBTree::new("t", atomic);

        storage.fail_writes.store(true, Ordering::SeqCst);
        let err = tree.create(config()).unwrap_err();
        assert_eq!(err.operation(), Some("creation"));
        assert!(!tree.is_opened());
        assert!(!storage.is_file_exists("t.sbc"));

        storage.fail_writes.store(false, Ordering::SeqCst);
        tree.create(config()).unwrap();
        assert!(tree.is_opened());
    }

    #[test]
    fn test_failed_commit_leaves_not_opened() {
        let (_dir, storage, atomic) = flaky();
        let tree = SBTree::new("t", atomic);

        storage.fail_syncs.store(true, Ordering::SeqCst);
        let err = tree.create(config()).unwrap_err();
        assert_eq!(err.operation(), Some("creation"));
        assert!(!tree.is_opened());
        assert!(!storage.is_file_exists("t.sbc"));
    }

    #[test]
    fn test_failed_put_changes_nothing() {
        let (_dir, storage, atomic) = flaky();
        let tree = SBTree::new("t", atomic);
        tree.create(config()).unwrap();
        tree.put(1, "a".to_string()).unwrap();

        storage.fail_writes.store(true, Ordering::SeqCst);
        let err = tree.put(2, "b".to_string()).unwrap_err();
        assert_eq!(err.operation(), Some("put"));
        assert_eq!(tree.get(&2).unwrap(), None);

        storage.fail_writes.store(false, Ordering::SeqCst);
        tree.close().unwrap();
        tree.open(config()).unwrap();
        assert_eq!(tree.size().unwrap(), 1);
        assert_eq!(tree.get(&2).unwrap(), None);
    }

    #[test]
    fn test_reopen_replays_log() {
        let (_dir, atomic) = setup();
        let tree = SBTree::new("t", atomic.clone());
        tree.create(config().with_null_keys(true)).unwrap();

        for i in 0..200 {
            tree.put(i, format!("value-{}", i)).unwrap();
        }
        for i in (0..200).step_by(3) {
            tree.remove(&i).unwrap();
        }
        tree.put_null("nothing".to_string()).unwrap();
        tree.close().unwrap();
        assert!(!tree.is_opened());

        let reopened = SBTree::new("t", atomic);
        reopened.open(config()).unwrap();
        assert!(reopened.is_null_key_allowed());
        assert_eq!(reopened.size().unwrap(), 200 - 67 + 1);
        assert_eq!(reopened.get(&1).unwrap().as_deref(), Some("value-1"));
        assert_eq!(reopened.get(&3).unwrap(), None);
        assert_eq!(reopened.get_null().unwrap().as_deref(), Some("nothing"));
    }

    #[test]
    fn test_open_missing_file() {
        let (_dir, atomic) = setup();
        let tree = SBTree::new("missing", atomic);

        let err = tree.open(config()).unwrap_err();
        assert_eq!(err.operation(), Some("open"));
        assert!(matches!(err.root_cause(), Error::FileNotFound(_)));
        assert!(!tree.is_opened());
    }

    #[test]
    fn test_open_with_other_encoder_fails() {
        let (_dir, atomic) = setup();
        let tree = SBTree::new("t", atomic.clone());
        tree.create(config()).unwrap();
        tree.close().unwrap();

        let other = TreeConfig::<i64, String>::new(
            Arc::new(LongEncoder),
            Arc::new(StringEncoder),
            ValueType::Long,
        );
        let err = SBTree::new("t", atomic).open(other).unwrap_err();
        assert!(matches!(
            err.root_cause(),
            Error::EncoderMismatch { what: "key", .. }
        ));
    }

    #[test]
    fn test_key_type_must_match_encoder() {
        let (_dir, atomic) = setup();
        let tree = SBTree::<i32, String>::new("t", atomic);

        let mut bad = config();
        bad.key_type = ValueType::String;
        let err = tree.create(bad).unwrap_err();
        assert!(matches!(err.root_cause(), Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_reset_clears_entries() {
        let (_dir, atomic) = setup();
        let tree = SBTree::new("t", atomic.clone());
        tree.create(config()).unwrap();
        tree.put(1, "a".to_string()).unwrap();

        tree.reset().unwrap();
        assert!(tree.is_opened());
        assert_eq!(tree.size().unwrap(), 0);

        tree.put(2, "b".to_string()).unwrap();
        tree.close().unwrap();
        tree.open(config()).unwrap();
        assert_eq!(tree.first_key().unwrap(), Some(2));
        assert_eq!(tree.size().unwrap(), 1);
    }

    #[test]
    fn test_delete() {
        let (_dir, atomic) = setup();
        let tree = SBTree::<i32, String>::new("t", atomic.clone());

        // Nothing to delete
        tree.delete().unwrap();

        tree.create(config()).unwrap();
        tree.delete().unwrap();
        assert!(!tree.is_opened());
        assert!(!atomic.storage().is_file_exists("t.sbc"));

        // Not opened, but the file exists
        tree.create(config()).unwrap();
        tree.close().unwrap();
        let other = SBTree::<i32, String>::new("t", atomic.clone());
        other.delete().unwrap();
        assert!(!atomic.storage().is_file_exists("t.sbc"));
    }

    #[test]
    fn test_not_opened_errors() {
        let (_dir, atomic) = setup();
        let tree = SBTree::<i32, String>::new("t", atomic);

        assert!(matches!(tree.get(&1), Err(Error::NotOpened(_))));
        assert!(matches!(tree.size(), Err(Error::NotOpened(_))));
        assert!(tree.range(Bound::Unbounded, Bound::Unbounded, Direction::Forward).is_err());
        assert_eq!(tree.close().unwrap_err().operation(), Some("close"));
        assert_eq!(tree.reset().unwrap_err().operation(), Some("reset"));
    }

    #[test]
    fn test_null_key_disabled() {
        let (_dir, atomic) = setup();
        let tree = SBTree::new("t", atomic);
        tree.create(config()).unwrap();

        assert!(matches!(tree.get_null(), Err(Error::NullKeyNotAllowed(_))));
        assert!(matches!(
            tree.put_null("x".to_string()),
            Err(Error::NullKeyNotAllowed(_))
        ));
    }

    #[test]
    fn test_null_key_counts_towards_size() {
        let (_dir, atomic) = setup();
        let tree = SBTree::new("t", atomic);
        tree.create(config().with_null_keys(true)).unwrap();

        assert!(!tree.put_null("n".to_string()).unwrap());
        tree.put(1, "a".to_string()).unwrap();
        assert_eq!(tree.size().unwrap(), 2);

        assert!(tree.remove_null().unwrap());
        assert!(!tree.remove_null().unwrap());
        assert_eq!(tree.size().unwrap(), 1);
    }

    #[test]
    fn test_key_size_limit() {
        let (_dir, atomic) = setup();
        let tree = SBTree::new("t", atomic);
        tree.create(
            TreeConfig::<String, i32>::new(
                Arc::new(StringEncoder),
                Arc::new(IntegerEncoder),
                ValueType::String,
            )
            .with_key_size(5),
        )
        .unwrap();

        tree.put("abcd".to_string(), 1).unwrap();
        assert!(matches!(
            tree.put("abcde".to_string(), 2),
            Err(Error::KeySizeExceeded { size: 6, limit: 5 })
        ));
        assert_eq!(tree.key_size(), Some(5));
    }

    #[test]
    fn test_record_too_large() {
        let (_dir, atomic) = setup();
        let tree = SBTree::new("t", atomic);
        tree.create(config()).unwrap();

        assert!(matches!(
            tree.put(1, "x".repeat(Page::PAYLOAD_SIZE)),
            Err(Error::RecordTooLarge { .. })
        ));
        assert_eq!(tree.size().unwrap(), 0);
    }

    #[test]
    fn test_compact_shrinks_log() {
        let (_dir, atomic) = setup();
        let tree = SBTree::new("t", atomic.clone());
        tree.create(config()).unwrap();

        for round in 0..10 {
            for i in 0..40 {
                tree.put(i, format!("round-{}-value-{}", round, i)).unwrap();
            }
        }
        let file = tree.file_id().unwrap();
        let before = atomic.storage().page_count(file).unwrap();

        tree.compact().unwrap();
        let after = atomic.storage().page_count(file).unwrap();
        assert!(after < before);

        tree.close().unwrap();
        tree.open(config()).unwrap();
        assert_eq!(tree.size().unwrap(), 40);
        assert_eq!(tree.get(&7).unwrap().as_deref(), Some("round-9-value-7"));
    }

    #[test]
    fn test_open_reseals_torn_tail_page() {
        let (_dir, atomic) = setup();
        let tree = SBTree::new("t", atomic.clone());
        tree.create(config()).unwrap();
        tree.put(1, "a".to_string()).unwrap();
        tree.put(2, "b".to_string()).unwrap();
        tree.close().unwrap();

        // Stray bytes of a record whose write never finished
        let storage = atomic.storage();
        let file = storage.open_file("t.sbc").unwrap();
        let tail = PageId::new(1);
        let mut page = storage.read_page(file, tail).unwrap();
        page.payload_mut()[100] = 0x01;
        storage.write_page(file, tail, &page).unwrap();
        storage.close_file(file, true).unwrap();

        tree.open(config()).unwrap();
        assert_eq!(tree.size().unwrap(), 2);
        assert_eq!(tree.get(&2).unwrap().as_deref(), Some("b"));
        storage
            .read_page(file, tail)
            .unwrap()
            .expect_type(PageType::TreeEntries, file, tail)
            .unwrap();

        tree.put(3, "c".to_string()).unwrap();
        tree.close().unwrap();
        tree.open(config()).unwrap();
        assert_eq!(tree.size().unwrap(), 3);
    }

    #[test]
    fn test_generation_persisted() {
        let (_dir, atomic) = setup();
        let tree = SBTree::new("t", atomic);
        tree.create(config().with_generation(42)).unwrap();
        tree.close().unwrap();

        tree.open(config()).unwrap();
        assert_eq!(tree.generation(), Some(42));

        let pointer = tree.collection_pointer().unwrap();
        assert_eq!(pointer.file_id, tree.file_id().unwrap());
        assert_eq!(pointer.root_page, PageId::new(0));
        assert_eq!(pointer.generation, 42);
    }

    #[test]
    fn test_statistics_collaborator() {
        let (_dir, atomic) = setup();
        let stats = Arc::new(ComponentStatistics::new());
        let tree = SBTree::with_statistics("t", atomic, stats.clone());

        tree.create(config()).unwrap();
        tree.put(1, "a".to_string()).unwrap();
        tree.get(&1).unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.completed(OperationKind::Create), 1);
        assert_eq!(snapshot.completed(OperationKind::Write), 1);
        assert_eq!(snapshot.completed(OperationKind::Read), 1);
        assert_eq!(snapshot.in_flight(), 0);
    }

    #[test]
    fn test_range_directions() {
        let (_dir, atomic) = setup();
        let tree = SBTree::new("t", atomic);
        tree.create(config()).unwrap();
        for i in 0..10 {
            tree.put(i, i.to_string()).unwrap();
        }

        let forward: Vec<_> = tree
            .keys_between(Bound::Excluded(&2), Bound::Included(&5), Direction::Forward)
            .unwrap()
            .collect();
        assert_eq!(forward, vec![3, 4, 5]);

        let reverse: Vec<_> = tree
            .values_between(Bound::Unbounded, Bound::Excluded(&3), Direction::Reverse)
            .unwrap()
            .collect();
        assert_eq!(reverse, vec!["2", "1", "0"]);

        assert_eq!(tree.first_key().unwrap(), Some(0));
        assert_eq!(tree.last_key().unwrap(), Some(9));
    }
}
