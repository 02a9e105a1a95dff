//! durabletree - durable ordered indexes with a bounded sub-tree cache.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          durabletree                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Tree Cache (cache/)                         │   │
//! │  │   TreeCache: DashMap + pin counts + LRU eviction         │   │
//! │  │   TreeLoader hooks ──► DiskTreeLoader                    │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Index Layer (index/)                        │   │
//! │  │   OrderedIndex contract ◄── SBTree                       │   │
//! │  │   DurableComponent: create/open/close/reset/delete       │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌────────────────────────────┐  ┌───────────────────────────┐ │
//! │  │   Encoding (encoding/)     │  │   Storage (storage/)      │ │
//! │  │ varint, Encoder<T>,        │  │ PageStorage, DiskStorage, │ │
//! │  │ EncoderProvider registry   │  │ AtomicOperation, Page     │ │
//! │  └────────────────────────────┘  └───────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (FileId, PageId, CollectionPointer, Error, config)
//! - [`encoding`] - Typed encoders and the variable-length integer codec
//! - [`storage`] - Page files, atomic operations, statistics
//! - [`index`] - The ordered index contract and the durable SBTree
//! - [`cache`] - Bounded, reference-counted cache of tree instances
//!
//! # Quick Start
//! ```no_run
//! use std::ops::Bound;
//! use std::sync::Arc;
//! use durabletree::encoding::{EncoderProvider, SizePreference, ValueType};
//! use durabletree::index::{Direction, OrderedIndex, SBTree, TreeConfig};
//! use durabletree::storage::{AtomicOperationsManager, DiskStorage, PageStorage};
//!
//! # fn main() -> durabletree::Result<()> {
//! let storage: Arc<dyn PageStorage> = Arc::new(DiskStorage::open("data")?);
//! let atomic = Arc::new(AtomicOperationsManager::new(storage));
//!
//! let tree = SBTree::new("accounts", atomic);
//! tree.create(TreeConfig::<String, i64>::resolve(
//!     &EncoderProvider::new(),
//!     ValueType::String,
//!     SizePreference::Auto,
//! )?)?;
//!
//! tree.put("alice".to_string(), 100)?;
//! for (name, balance) in tree.range(Bound::Unbounded, Bound::Unbounded, Direction::Forward)? {
//!     println!("{name}: {balance}");
//! }
//! tree.close()?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod common;
pub mod encoding;
pub mod index;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::PAGE_SIZE;
pub use common::{CacheConfig, CollectionPointer, Error, FileId, PageId, Result};

pub use cache::{DiskTreeLoader, TreeCache};
pub use index::{Direction, OrderedIndex, SBTree, TreeConfig};
pub use storage::{AtomicOperationsManager, DiskStorage, PageStorage};
