//! Ordered indexes.
//!
//! - [`OrderedIndex`] - the operation surface of every ordered index
//! - [`DurableComponent`] - lifecycle plumbing over atomic operations
//! - [`SBTree`] - durable ordered index in a single file

mod cursor;
mod durable;
mod ordered;
mod sbtree;

pub use cursor::RangeCursor;
pub use durable::DurableComponent;
pub use ordered::{Direction, Keys, OrderedIndex, Values};
pub use sbtree::{SBTree, TreeConfig};
