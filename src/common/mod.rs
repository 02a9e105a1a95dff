//! Common types and utilities shared across durabletree.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and [`CacheConfig`]
//! - Error types
//! - Identifiers ([`FileId`], [`PageId`], [`CollectionPointer`])

mod collection_pointer;
pub mod config;
pub mod error;
mod file_id;
mod page_id;

pub use collection_pointer::CollectionPointer;
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use file_id::FileId;
pub use page_id::PageId;
