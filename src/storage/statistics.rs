//! Per-component performance statistics.
//!
//! Durable components report the start and completion of every lifecycle
//! and data operation to a [`PerformanceStatistics`] collaborator.
//! [`NoopStatistics`] discards the reports; [`ComponentStatistics`] counts
//! them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kinds of operations a component reports.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create = 0,
    Open = 1,
    Close = 2,
    Reset = 3,
    Delete = 4,
    Read = 5,
    Write = 6,
}

impl OperationKind {
    /// Number of kinds.
    pub const COUNT: usize = 7;

    /// Every kind, in discriminant order.
    pub const ALL: [OperationKind; Self::COUNT] = [
        OperationKind::Create,
        OperationKind::Open,
        OperationKind::Close,
        OperationKind::Reset,
        OperationKind::Delete,
        OperationKind::Read,
        OperationKind::Write,
    ];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// Receives operation start/complete notifications.
pub trait PerformanceStatistics: Send + Sync {
    fn start_component_operation(&self, component: &str, kind: OperationKind);
    fn complete_component_operation(&self, component: &str, kind: OperationKind);
}

/// Statistics collaborator that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatistics;

impl PerformanceStatistics for NoopStatistics {
    fn start_component_operation(&self, _component: &str, _kind: OperationKind) {}
    fn complete_component_operation(&self, _component: &str, _kind: OperationKind) {}
}

/// Lock-free counters of started and completed operations per kind.
///
/// All counters use `Ordering::Relaxed`; they are independent and only read
/// for reporting.
///
/// # Example
/// ```
/// use durabletree::storage::{ComponentStatistics, OperationKind, PerformanceStatistics};
///
/// let stats = ComponentStatistics::new();
/// stats.start_component_operation("tree", OperationKind::Read);
/// stats.complete_component_operation("tree", OperationKind::Read);
///
/// let snapshot = stats.snapshot();
/// assert_eq!(snapshot.completed(OperationKind::Read), 1);
/// assert_eq!(snapshot.in_flight(), 0);
/// ```
#[derive(Debug, Default)]
pub struct ComponentStatistics {
    started: [AtomicU64; OperationKind::COUNT],
    completed: [AtomicU64; OperationKind::COUNT],
}

impl ComponentStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-atomic copy of the counters.
    pub fn snapshot(&self) -> ComponentStatsSnapshot {
        let mut snapshot = ComponentStatsSnapshot::default();
        for kind in OperationKind::ALL {
            let i = kind.index();
            snapshot.started[i] = self.started[i].load(Ordering::Relaxed);
            snapshot.completed[i] = self.completed[i].load(Ordering::Relaxed);
        }
        snapshot
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for i in 0..OperationKind::COUNT {
            self.started[i].store(0, Ordering::Relaxed);
            self.completed[i].store(0, Ordering::Relaxed);
        }
    }
}

impl PerformanceStatistics for ComponentStatistics {
    fn start_component_operation(&self, _component: &str, kind: OperationKind) {
        self.started[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn complete_component_operation(&self, _component: &str, kind: OperationKind) {
        self.completed[kind.index()].fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`ComponentStatistics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ComponentStatsSnapshot {
    started: [u64; OperationKind::COUNT],
    completed: [u64; OperationKind::COUNT],
}

impl ComponentStatsSnapshot {
    pub fn started(&self, kind: OperationKind) -> u64 {
        self.started[kind.index()]
    }

    pub fn completed(&self, kind: OperationKind) -> u64 {
        self.completed[kind.index()]
    }

    /// Operations started but not yet completed, across all kinds.
    pub fn in_flight(&self) -> u64 {
        let started: u64 = self.started.iter().sum();
        let completed: u64 = self.completed.iter().sum();
        started.saturating_sub(completed)
    }
}

impl fmt::Display for ComponentStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentStats {{")?;
        for (n, kind) in OperationKind::ALL.iter().enumerate() {
            let sep = if n == 0 { " " } else { ", " };
            write!(f, "{}{:?}: {}", sep, kind, self.completed(*kind))?;
        }
        write!(f, " }}")
    }
}

/// Reports completion when dropped, so every exit path is counted.
pub struct OperationGuard<'a> {
    stats: &'a dyn PerformanceStatistics,
    component: &'a str,
    kind: OperationKind,
}

impl<'a> OperationGuard<'a> {
    pub fn new(stats: &'a dyn PerformanceStatistics, component: &'a str, kind: OperationKind) -> Self {
        stats.start_component_operation(component, kind);
        Self {
            stats,
            component,
            kind,
        }
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.stats
            .complete_component_operation(self.component, self.kind);
    }
}
