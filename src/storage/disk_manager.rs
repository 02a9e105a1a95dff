//! Disk Manager - page I/O against one storage file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, FileId, PageId, Result};
use crate::storage::page::Page;

/// Manages page I/O for a single storage file.
///
/// # File Layout
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┐
/// │ Page 0  │ Page 1  │  ...    │ Page N  │
/// │ (4KB)   │ (4KB)   │         │ (4KB)   │
/// └─────────┴─────────┴─────────┴─────────┘
/// Offset:  0      4096    ...    N×4096
/// ```
///
/// # Thread Safety
/// `DiskManager` is **single-threaded**. [`DiskStorage`](super::DiskStorage)
/// keeps each one behind a mutex.
///
/// # Durability
/// Writes are not synced individually. [`sync`](Self::sync) is called when an
/// atomic operation touching the file commits.
pub struct DiskManager {
    file: File,
    path: PathBuf,
    file_id: FileId,
    /// Number of pages in the file.
    page_count: u32,
}

impl DiskManager {
    /// Create a new storage file.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, file_id: FileId) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path.as_ref())?;

        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
            file_id,
            page_count: 0,
        })
    }

    /// Open an existing storage file.
    ///
    /// A partial page at the end, left by a crash while the file grew, is
    /// cut off.
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, file_id: FileId) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;

        let mut file_size = file.metadata()?.len();
        let partial = file_size % PAGE_SIZE as u64;
        if partial != 0 {
            file_size -= partial;
            file.set_len(file_size)?;
            file.sync_all()?;
            warn!(
                path = %path.as_ref().display(),
                dropped = partial,
                "dropped partial page at end of file"
            );
        }

        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
            file_id,
            page_count: (file_size / PAGE_SIZE as u64) as u32,
        })
    }

    /// Read a page from disk.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page doesn't exist.
    pub fn read_page(&mut self, page_id: PageId) -> Result<Page> {
        self.check_bounds(page_id)?;

        self.file.seek(SeekFrom::Start(page_id.offset()))?;
        let mut page = Page::new();
        self.file.read_exact(page.as_mut_slice())?;

        Ok(page)
    }

    /// Write a previously allocated page.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page hasn't been allocated.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        self.check_bounds(page_id)?;

        self.file.seek(SeekFrom::Start(page_id.offset()))?;
        self.file.write_all(page.as_slice())?;

        Ok(())
    }

    /// Append a zeroed page and return its id.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = PageId::new(self.page_count);

        self.file.seek(SeekFrom::Start(page_id.offset()))?;
        self.file.write_all(&[0u8; PAGE_SIZE])?;

        self.page_count += 1;
        Ok(page_id)
    }

    /// Shrink the file to its first `page_count` pages.
    pub fn truncate_to(&mut self, page_count: u32) -> Result<()> {
        if page_count >= self.page_count {
            return Ok(());
        }
        self.file.set_len(PageId::new(page_count).offset())?;
        self.page_count = page_count;
        Ok(())
    }

    /// Flush file contents and metadata to the device.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Get the number of pages in the file.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Path of the backing file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_bounds(&self, page_id: PageId) -> Result<()> {
        if page_id.0 >= self.page_count {
            return Err(Error::PageNotFound {
                file: self.file_id,
                page: page_id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sbc");

        DiskManager::create(&path, FileId::new(0)).unwrap();
        assert!(DiskManager::create(&path, FileId::new(0)).is_err());
    }

    #[test]
    fn test_open_nonexistent_fails() {
        let dir = tempdir().unwrap();
        assert!(DiskManager::open(dir.path().join("missing.sbc"), FileId::new(0)).is_err());
    }

    #[test]
    fn test_write_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sbc");

        {
            let mut dm = DiskManager::create(&path, FileId::new(1)).unwrap();
            let page_id = dm.allocate_page().unwrap();

            let mut page = Page::new();
            page.as_mut_slice()[0] = 0x42;
            dm.write_page(page_id, &page).unwrap();
            dm.sync().unwrap();
        }

        let mut dm = DiskManager::open(&path, FileId::new(1)).unwrap();
        assert_eq!(dm.page_count(), 1);
        assert_eq!(dm.read_page(PageId::new(0)).unwrap().as_slice()[0], 0x42);
    }

    #[test]
    fn test_open_drops_partial_trailing_page() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sbc");

        {
            let mut dm = DiskManager::create(&path, FileId::new(1)).unwrap();
            dm.allocate_page().unwrap();
            dm.sync().unwrap();
        }
        let file = OpenOptions::new().append(true).open(&path).unwrap();
        file.set_len(PAGE_SIZE as u64 + 100).unwrap();

        let dm = DiskManager::open(&path, FileId::new(1)).unwrap();
        assert_eq!(dm.page_count(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), PAGE_SIZE as u64);
    }

    #[test]
    fn test_truncate_to() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(dir.path().join("t.sbc"), FileId::new(0)).unwrap();

        for _ in 0..5 {
            dm.allocate_page().unwrap();
        }
        dm.truncate_to(2).unwrap();

        assert_eq!(dm.page_count(), 2);
        assert!(dm.read_page(PageId::new(1)).is_ok());
        assert!(matches!(
            dm.read_page(PageId::new(2)),
            Err(Error::PageNotFound { .. })
        ));

        // Growing is not truncation
        dm.truncate_to(10).unwrap();
        assert_eq!(dm.page_count(), 2);
    }

    #[test]
    fn test_write_unallocated_page_fails() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(dir.path().join("t.sbc"), FileId::new(0)).unwrap();

        assert!(dm.write_page(PageId::new(0), &Page::new()).is_err());
    }
}
