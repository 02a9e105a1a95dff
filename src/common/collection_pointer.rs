//! Collection pointer - the persisted location of one sub-tree.

use std::fmt;

use crate::common::{FileId, PageId};

/// Identifies the persisted root of one sub-tree instance.
///
/// A pointer is created when a sub-tree is first persisted and stays valid
/// until the sub-tree is deleted. Equality is structural, which makes it the
/// key of the [`TreeCache`](crate::cache::TreeCache).
///
/// # Layout (12 bytes)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     file_id (little-endian)
/// 4       4     root_page (little-endian)
/// 8       4     generation (little-endian)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPointer {
    /// File holding the sub-tree.
    pub file_id: FileId,
    /// Root (metadata) page of the sub-tree.
    pub root_page: PageId,
    /// Owner tag written into the sub-tree when it was created.
    pub generation: u32,
}

impl CollectionPointer {
    /// Size of the serialized pointer in bytes.
    pub const SIZE: usize = 12;

    /// Create a new pointer.
    pub fn new(file_id: FileId, root_page: PageId, generation: u32) -> Self {
        Self {
            file_id,
            root_page,
            generation,
        }
    }

    /// Serialize the pointer so higher layers can persist it.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.file_id.0.to_le_bytes());
        out[4..8].copy_from_slice(&self.root_page.0.to_le_bytes());
        out[8..12].copy_from_slice(&self.generation.to_le_bytes());
        out
    }

    /// Read a pointer written by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        let word = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        Self {
            file_id: FileId::new(word(0)),
            root_page: PageId::new(word(4)),
            generation: word(8),
        }
    }
}

impl fmt::Display for CollectionPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pointer({}, {}, gen {})",
            self.file_id, self.root_page, self.generation
        )
    }
}
