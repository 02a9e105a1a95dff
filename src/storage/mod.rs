//! Storage layer - disk I/O, page formats and atomic operations.
//!
//! This module handles persistent storage:
//! - [`DiskManager`] - Low-level I/O for one file
//! - [`PageStorage`] / [`DiskStorage`] - Files and pages by id
//! - [`AtomicOperation`] - All-or-nothing groups of changes
//! - [`PerformanceStatistics`] - Operation reporting
//! - [`page`] - Page types and layouts

mod atomic;
mod disk_manager;
mod disk_storage;
pub mod page;
mod statistics;

pub use atomic::{AtomicOperation, AtomicOperationsManager};
pub use disk_manager::DiskManager;
pub use disk_storage::{DiskStorage, PageStorage};
pub use statistics::{
    ComponentStatistics, ComponentStatsSnapshot, NoopStatistics, OperationGuard, OperationKind,
    PerformanceStatistics,
};
