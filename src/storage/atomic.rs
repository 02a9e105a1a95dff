//! Atomic operations - all-or-nothing groups of storage changes.
//!
//! Every structural or page change made through an [`AtomicOperation`]
//! records how to undo it. Committing syncs the touched files; rolling back
//! replays the undo log in reverse.
//!
//! ```text
//! begin ──► add_file / allocate_page / write_page / ... ──┬──► commit   (sync touched files)
//!                    │ records undo action                └──► rollback (undo, newest first)
//!                    ▼
//!             [undo log]
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::common::{Error, FileId, PageId, Result};
use crate::storage::page::Page;
use crate::storage::PageStorage;

/// How to revert one change.
enum UndoAction {
    /// A file was added.
    DeleteFile(FileId),
    /// A file was deleted; it had these pages.
    RestoreFile {
        file: FileId,
        name: String,
        pages: Vec<Page>,
    },
    /// A file was truncated; it had these pages.
    RestorePages { file: FileId, pages: Vec<Page> },
    /// Pages were appended beyond `page_count`.
    TruncatePages { file: FileId, page_count: u32 },
    /// These trailing pages were cut off.
    AppendPages { file: FileId, pages: Vec<Page> },
    /// A page was overwritten.
    WritePage {
        file: FileId,
        page: PageId,
        before: Page,
    },
}

/// A group of storage changes that commit or roll back together.
///
/// Obtained from [`AtomicOperationsManager::begin`] and finished by passing it
/// back to [`commit`](AtomicOperationsManager::commit) or
/// [`rollback`](AtomicOperationsManager::rollback).
pub struct AtomicOperation {
    id: u64,
    non_transactional: bool,
    storage: Arc<dyn PageStorage>,
    undo: Vec<UndoAction>,
    touched: BTreeSet<FileId>,
    /// Page count of each file before this operation first grew it. Pages at
    /// or past this mark need no before-image.
    grown_from: HashMap<FileId, u32>,
    finished: bool,
}

impl AtomicOperation {
    /// Unique, monotonically increasing id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the operation runs outside any user transaction.
    #[inline]
    pub fn is_non_transactional(&self) -> bool {
        self.non_transactional
    }

    /// Number of recorded undo actions.
    #[inline]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn add_file(&mut self, name: &str) -> Result<FileId> {
        let file = self.storage.add_file(name)?;
        self.undo.push(UndoAction::DeleteFile(file));
        self.touched.insert(file);
        self.grown_from.insert(file, 0);
        Ok(file)
    }

    pub fn delete_file(&mut self, file: FileId) -> Result<()> {
        let name = self
            .storage
            .file_name(file)
            .ok_or(Error::UnknownFile(file))?;
        let pages = self.snapshot(file)?;

        self.storage.delete_file(file)?;
        self.undo.push(UndoAction::RestoreFile { file, name, pages });
        self.touched.insert(file);
        Ok(())
    }

    pub fn truncate_file(&mut self, file: FileId) -> Result<()> {
        let pages = self.snapshot(file)?;

        self.storage.truncate_file(file)?;
        self.undo.push(UndoAction::RestorePages { file, pages });
        self.touched.insert(file);
        self.grown_from.insert(file, 0);
        Ok(())
    }

    /// Cut a file down to its first `page_count` pages.
    pub fn truncate_pages(&mut self, file: FileId, page_count: u32) -> Result<()> {
        let count = self.storage.page_count(file)?;
        if page_count >= count {
            return Ok(());
        }
        let pages = (page_count..count)
            .map(|page| self.storage.read_page(file, PageId::new(page)))
            .collect::<Result<Vec<_>>>()?;

        self.storage.truncate_pages(file, page_count)?;
        self.undo.push(UndoAction::AppendPages { file, pages });
        self.touched.insert(file);
        self.grown_from
            .entry(file)
            .and_modify(|mark| *mark = (*mark).min(page_count))
            .or_insert(page_count);
        Ok(())
    }

    pub fn allocate_page(&mut self, file: FileId) -> Result<PageId> {
        let page_count = self.storage.page_count(file)?;
        let page = self.storage.allocate_page(file)?;

        self.undo.push(UndoAction::TruncatePages { file, page_count });
        self.touched.insert(file);
        self.grown_from.entry(file).or_insert(page_count);
        Ok(page)
    }

    pub fn write_page(&mut self, file: FileId, page: PageId, data: &Page) -> Result<()> {
        let fresh = self
            .grown_from
            .get(&file)
            .is_some_and(|&mark| page.0 >= mark);

        if fresh {
            self.storage.write_page(file, page, data)?;
        } else {
            let before = self.storage.read_page(file, page)?;
            self.storage.write_page(file, page, data)?;
            self.undo.push(UndoAction::WritePage { file, page, before });
        }
        self.touched.insert(file);
        Ok(())
    }

    pub fn read_page(&self, file: FileId, page: PageId) -> Result<Page> {
        self.storage.read_page(file, page)
    }

    pub fn page_count(&self, file: FileId) -> Result<u32> {
        self.storage.page_count(file)
    }

    fn snapshot(&self, file: FileId) -> Result<Vec<Page>> {
        let count = self.storage.page_count(file)?;
        (0..count)
            .map(|page| self.storage.read_page(file, PageId::new(page)))
            .collect()
    }

    fn rewrite_pages(&self, file: FileId, pages: &[Page]) -> Result<()> {
        self.storage.truncate_pages(file, 0)?;
        self.append_pages(file, pages)
    }

    fn append_pages(&self, file: FileId, pages: &[Page]) -> Result<()> {
        for page in pages {
            let page_id = self.storage.allocate_page(file)?;
            self.storage.write_page(file, page_id, page)?;
        }
        Ok(())
    }

    fn undo_one(&self, action: &UndoAction) -> Result<()> {
        match action {
            UndoAction::DeleteFile(file) => self.storage.delete_file(*file),
            UndoAction::RestoreFile { file, name, pages } => {
                self.storage.restore_file(*file, name)?;
                self.rewrite_pages(*file, pages)
            }
            UndoAction::RestorePages { file, pages } => self.rewrite_pages(*file, pages),
            UndoAction::TruncatePages { file, page_count } => {
                self.storage.truncate_pages(*file, *page_count)
            }
            UndoAction::AppendPages { file, pages } => self.append_pages(*file, pages),
            UndoAction::WritePage { file, page, before } => {
                self.storage.write_page(*file, *page, before)
            }
        }
    }

    fn sync_touched(&self) -> Result<()> {
        for &file in &self.touched {
            if self.storage.file_name(file).is_none() {
                continue;
            }
            match self.storage.sync_file(file) {
                Ok(()) | Err(Error::UnknownFile(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Drop for AtomicOperation {
    fn drop(&mut self) {
        if !self.finished && !self.undo.is_empty() {
            warn!(
                operation = self.id,
                pending = self.undo.len(),
                "atomic operation dropped without commit or rollback"
            );
        }
    }
}

/// Issues atomic operations over one [`PageStorage`].
pub struct AtomicOperationsManager {
    storage: Arc<dyn PageStorage>,
    next_id: AtomicU64,
}

impl AtomicOperationsManager {
    pub fn new(storage: Arc<dyn PageStorage>) -> Self {
        Self {
            storage,
            next_id: AtomicU64::new(1),
        }
    }

    /// The storage operations act on.
    pub fn storage(&self) -> &Arc<dyn PageStorage> {
        &self.storage
    }

    /// Start a new atomic operation.
    pub fn begin(&self, non_transactional: bool) -> AtomicOperation {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(operation = id, non_transactional, "begin atomic operation");

        AtomicOperation {
            id,
            non_transactional,
            storage: Arc::clone(&self.storage),
            undo: Vec::new(),
            touched: BTreeSet::new(),
            grown_from: HashMap::new(),
            finished: false,
        }
    }

    /// Make the operation's changes durable.
    ///
    /// If syncing fails the operation is rolled back and the sync error is
    /// returned; a failure of that rollback is logged.
    pub fn commit(&self, mut op: AtomicOperation) -> Result<()> {
        if let Err(e) = op.sync_touched() {
            if let Err(rollback) = self.rollback(op) {
                error!(error = %rollback, "rollback after failed commit failed");
            }
            return Err(e);
        }
        op.finished = true;

        debug!(
            operation = op.id,
            files = op.touched.len(),
            changes = op.undo.len(),
            "committed atomic operation"
        );
        Ok(())
    }

    /// Revert the operation's changes, newest first.
    ///
    /// Every undo action is attempted even if an earlier one fails; the first
    /// failure is returned.
    pub fn rollback(&self, mut op: AtomicOperation) -> Result<()> {
        op.finished = true;

        let mut first_error = None;
        for action in op.undo.iter().rev() {
            if let Err(e) = op.undo_one(action) {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = op.sync_touched() {
            first_error.get_or_insert(e);
        }

        debug!(operation = op.id, changes = op.undo.len(), "rolled back atomic operation");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
