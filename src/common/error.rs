//! Error types for durabletree.

use thiserror::Error;

use crate::common::{FileId, PageId};

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
pub type Result<T> = std::result::Result<T, Error>;

/// All recoverable errors in durabletree.
///
/// Caller bugs (releasing a tree that was never loaded, deleting a tree that
/// is still in use) are not represented here: they panic, the same way an
/// unbalanced unpin does.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from disk operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page does not exist in the file.
    #[error("{page} not found in {file}")]
    PageNotFound { file: FileId, page: PageId },

    /// The storage does not know this file id (never issued, or deleted).
    #[error("unknown {0}")]
    UnknownFile(FileId),

    /// No file with this name exists.
    #[error("file '{0}' does not exist")]
    FileNotFound(String),

    /// A file with this name already exists.
    #[error("file '{0}' already exists")]
    FileExists(String),

    /// Stored page checksum does not match its contents.
    #[error("checksum mismatch on {page} of {file}")]
    ChecksumMismatch { file: FileId, page: PageId },

    /// Not enough bytes left in an encoded stream.
    #[error("stream underflow: needed {needed} bytes, {remaining} remaining")]
    StreamUnderflow { needed: usize, remaining: usize },

    /// A stored variable-length integer does not fit into 64 bits.
    #[error("variable-length integer overflows 64 bits")]
    VarIntOverflow,

    /// Malformed encoded value.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The registry has no encoder for this type.
    #[error("no encoder for {tag:?} with preference {preference:?}")]
    EncoderNotFound {
        tag: crate::encoding::TypeTag,
        preference: crate::encoding::SizePreference,
    },

    /// A persisted encoder id is not known to the registry.
    #[error("unknown encoder id {0}")]
    UnknownEncoder(u8),

    /// Encoder or type descriptor does not match the requested Rust type.
    #[error("type mismatch: expected {expected:?}, found {actual:?}")]
    TypeMismatch {
        expected: crate::encoding::TypeTag,
        actual: crate::encoding::TypeTag,
    },

    /// The tree on disk was written with different encoders.
    #[error("{component}: stored {what} encoder {stored} differs from supplied {supplied}")]
    EncoderMismatch {
        component: String,
        what: &'static str,
        stored: u8,
        supplied: u8,
    },

    /// Operation requires an opened component.
    #[error("component '{0}' is not opened")]
    NotOpened(String),

    /// Create/open called on an already opened component.
    #[error("component '{0}' is already opened")]
    AlreadyOpened(String),

    /// The tree was created without null-key support.
    #[error("null keys are not supported by '{0}'")]
    NullKeyNotAllowed(String),

    /// Encoded key is larger than the configured fixed key size.
    #[error("encoded key size {size} exceeds key size {limit}")]
    KeySizeExceeded { size: usize, limit: usize },

    /// Encoded record does not fit into a single entry page.
    #[error("record of {size} bytes exceeds page capacity {limit}")]
    RecordTooLarge { size: usize, limit: usize },

    /// On-disk structure is not what we wrote.
    #[error("corrupted data: {0}")]
    Corrupted(String),

    /// A lifecycle step failed; any atomic operation in flight was rolled back.
    #[error("{operation} of '{component}' failed: {source}")]
    Lifecycle {
        operation: &'static str,
        component: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap `self` as a lifecycle error for `operation` on `component`.
    pub fn lifecycle(self, operation: &'static str, component: impl Into<String>) -> Self {
        Error::Lifecycle {
            operation,
            component: component.into(),
            source: Box::new(self),
        }
    }

    /// The lifecycle operation label, if this is a lifecycle error.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Error::Lifecycle { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    /// Innermost cause, looking through lifecycle wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Lifecycle { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
