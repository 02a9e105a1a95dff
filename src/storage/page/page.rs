//! Page - the fixed-size unit of storage I/O.
//!
//! A [`Page`] is a raw 4KB byte array. Trees lay a [`PageHeader`] over the
//! first bytes and use the rest as payload.

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, FileId, PageId, Result};

use super::page_header::{PageHeader, PageType};

/// A page of data (4KB, 4KB-aligned).
///
/// `Page` does NOT implement `Clone` outside tests; copying 4KB should be
/// explicit (see [`Page::copy_from`]).
///
/// # Example
/// ```
/// use durabletree::storage::page::{Page, PageType};
/// use durabletree::PageId;
///
/// let mut page = Page::new();
/// page.payload_mut()[0] = 0xFF;
/// page.seal(PageType::TreeEntries, PageId::new(3), 1);
///
/// assert_eq!(page.header().page_type, PageType::TreeEntries);
/// assert_eq!(page.header().page_id, PageId::new(3));
/// assert!(page.verify_checksum());
/// ```
#[repr(align(4096))]
pub struct Page {
    data: [u8; PAGE_SIZE],
}

impl Page {
    /// Bytes available after the header.
    pub const PAYLOAD_SIZE: usize = PAGE_SIZE - PageHeader::SIZE;

    /// Create a new zeroed page.
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0u8; PAGE_SIZE],
        }
    }

    /// Create a page holding a copy of `other`.
    pub fn copy_from(other: &Page) -> Self {
        let mut page = Page::new();
        page.data.copy_from_slice(&other.data);
        page
    }

    /// Get immutable slice of page data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable slice of page data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bytes after the header.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[PageHeader::SIZE..]
    }

    /// Mutable bytes after the header.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[PageHeader::SIZE..]
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Read the page header.
    pub fn header(&self) -> PageHeader {
        PageHeader::from_bytes(&self.data)
    }

    /// Stamp the header and checksum for a write to `page_id`. Call after
    /// all payload changes.
    pub fn seal(&mut self, page_type: PageType, page_id: PageId, operation: u64) {
        PageHeader::new(page_type, page_id, operation).write_to(&mut self.data);
        let checksum = PageHeader::compute_checksum(&self.data);
        self.data[PageHeader::OFFSET_CHECKSUM..PageHeader::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&checksum.to_le_bytes());
    }

    /// Verify the page checksum is valid.
    pub fn verify_checksum(&self) -> bool {
        self.header().verify_checksum(&self.data)
    }

    /// Check the checksum, the page type and that the page was written to
    /// the slot it was read from.
    pub fn expect_type(&self, expected: PageType, file: FileId, page: PageId) -> Result<()> {
        if !self.verify_checksum() {
            return Err(Error::ChecksumMismatch { file, page });
        }
        let header = self.header();
        if header.page_type != expected {
            return Err(Error::Corrupted(format!(
                "{} of {} is {:?}, expected {:?}",
                page, file, header.page_type, expected
            )));
        }
        if header.page_id != page {
            return Err(Error::Corrupted(format!(
                "{} of {} holds the contents of {}",
                page, file, header.page_id
            )));
        }
        Ok(())
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Clone for Page {
    fn clone(&self) -> Self {
        Page::copy_from(self)
    }
}
