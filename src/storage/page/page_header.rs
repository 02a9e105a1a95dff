//! Page header and type definitions.
//!
//! Every page written by a tree starts with a [`PageHeader`]. Besides the
//! page type and a CRC32 checksum it records where the page belongs and which
//! atomic operation wrote it, so a page read back from the wrong slot is
//! reported instead of silently replayed.

use crate::common::PageId;

/// Type of page stored on disk.
///
/// Uses `#[repr(u8)]` to guarantee a 1-byte representation for serialization.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Never written, or not recognised.
    #[default]
    Invalid = 0,
    /// Tree metadata (encoders, key settings, generation).
    TreeMeta = 1,
    /// Append-only log of tree entry records.
    TreeEntries = 2,
}

impl PageType {
    /// Convert from u8, returning Invalid for unknown values.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PageType::TreeMeta,
            2 => PageType::TreeEntries,
            _ => PageType::Invalid,
        }
    }
}

/// Metadata stored at the beginning of every page.
///
/// # Layout (17 bytes, little-endian)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       1     page_type
/// 1       4     checksum (CRC32 of the page with this field zeroed)
/// 5       4     page_id (slot the page was written to)
/// 9       8     operation (id of the atomic operation that wrote it)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_type: PageType,
    pub checksum: u32,
    pub page_id: PageId,
    pub operation: u64,
}

impl PageHeader {
    pub const SIZE: usize = 17;

    pub const OFFSET_PAGE_TYPE: usize = 0;
    pub const OFFSET_CHECKSUM: usize = 1;
    pub const OFFSET_PAGE_ID: usize = 5;
    pub const OFFSET_OPERATION: usize = 9;

    /// Header for a page about to be written to `page_id`. The checksum is
    /// filled in when the page is sealed.
    pub fn new(page_type: PageType, page_id: PageId, operation: u64) -> Self {
        Self {
            page_type,
            checksum: 0,
            page_id,
            operation,
        }
    }

    /// Decode the header at the start of `data`.
    ///
    /// # Panics
    /// Panics if `data.len() < PageHeader::SIZE`.
    pub fn from_bytes(data: &[u8]) -> Self {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");

        Self {
            page_type: PageType::from_u8(data[Self::OFFSET_PAGE_TYPE]),
            checksum: u32::from_le_bytes(field(data, Self::OFFSET_CHECKSUM)),
            page_id: PageId::new(u32::from_le_bytes(field(data, Self::OFFSET_PAGE_ID))),
            operation: u64::from_le_bytes(field(data, Self::OFFSET_OPERATION)),
        }
    }

    /// Encode this header into the start of `data`.
    ///
    /// # Panics
    /// Panics if `data.len() < PageHeader::SIZE`.
    pub fn write_to(&self, data: &mut [u8]) {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");

        data[Self::OFFSET_PAGE_TYPE] = self.page_type as u8;
        put(data, Self::OFFSET_CHECKSUM, &self.checksum.to_le_bytes());
        put(data, Self::OFFSET_PAGE_ID, &self.page_id.0.to_le_bytes());
        put(data, Self::OFFSET_OPERATION, &self.operation.to_le_bytes());
    }

    /// CRC32 of a whole page, with the checksum field read as zero.
    pub fn compute_checksum(page_data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&page_data[..Self::OFFSET_CHECKSUM]);
        hasher.update(&[0u8; 4]);
        hasher.update(&page_data[Self::OFFSET_CHECKSUM + 4..]);
        hasher.finalize()
    }

    pub fn verify_checksum(&self, page_data: &[u8]) -> bool {
        self.checksum == Self::compute_checksum(page_data)
    }
}

fn field<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&data[offset..offset + N]);
    bytes
}

fn put(data: &mut [u8], offset: usize, bytes: &[u8]) {
    data[offset..offset + bytes.len()].copy_from_slice(bytes);
}
