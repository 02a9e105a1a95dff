//! File identifier type.

use std::fmt;

/// Identifies one file managed by the page storage.
///
/// File ids are issued by [`PageStorage::add_file`](crate::storage::PageStorage::add_file)
/// and stay bound to the same file name until the file is deleted, so they can
/// be persisted inside a [`CollectionPointer`](crate::common::CollectionPointer).
///
/// # Example
/// ```
/// use durabletree::FileId;
///
/// let file_id = FileId::new(5);
/// assert_eq!(file_id.0, 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl FileId {
    /// Create a new FileId.
    #[inline]
    pub fn new(id: u32) -> Self {
        FileId(id)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File({})", self.0)
    }
}
