//! Durable component - lifecycle plumbing shared by on-disk structures.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::common::Result;
use crate::storage::{
    AtomicOperation, AtomicOperationsManager, NoopStatistics, OperationGuard, OperationKind,
    PageStorage, PerformanceStatistics,
};

/// Identity and collaborators of a component backed by one storage file.
///
/// The backing file is named `name + extension`. Structural changes run
/// through [`in_atomic_operation`](Self::in_atomic_operation), which commits
/// on success and rolls back on any failure.
pub struct DurableComponent {
    name: String,
    extension: String,
    atomic: Arc<AtomicOperationsManager>,
    stats: Arc<dyn PerformanceStatistics>,
    /// Label of the atomic operation in flight, if any.
    current: Mutex<Option<&'static str>>,
}

impl DurableComponent {
    pub fn new(
        name: impl Into<String>,
        extension: impl Into<String>,
        atomic: Arc<AtomicOperationsManager>,
    ) -> Self {
        Self::with_statistics(name, extension, atomic, Arc::new(NoopStatistics))
    }

    pub fn with_statistics(
        name: impl Into<String>,
        extension: impl Into<String>,
        atomic: Arc<AtomicOperationsManager>,
        stats: Arc<dyn PerformanceStatistics>,
    ) -> Self {
        Self {
            name: name.into(),
            extension: extension.into(),
            atomic,
            stats,
            current: Mutex::new(None),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Name of the backing file.
    pub fn full_name(&self) -> String {
        format!("{}{}", self.name, self.extension)
    }

    pub fn storage(&self) -> &Arc<dyn PageStorage> {
        self.atomic.storage()
    }

    pub fn atomic_operations(&self) -> &Arc<AtomicOperationsManager> {
        &self.atomic
    }

    /// Label of the atomic operation currently running, if any.
    pub fn current_operation(&self) -> Option<&'static str> {
        *self.current.lock()
    }

    /// Report an operation to the statistics collaborator until the guard drops.
    pub fn track(&self, kind: OperationKind) -> OperationGuard<'_> {
        OperationGuard::new(self.stats.as_ref(), &self.name, kind)
    }

    /// Run `body` inside a fresh atomic operation.
    ///
    /// On success the operation is committed. If `body` or the commit fails,
    /// the operation is rolled back and the cause is returned as
    /// [`Error::Lifecycle`](crate::Error::Lifecycle) tagged with `label`.
    /// A failing rollback is logged and does not replace the cause.
    ///
    /// Locks taken by `body` are released when it returns, before the commit.
    pub fn in_atomic_operation<R>(
        &self,
        label: &'static str,
        body: impl FnOnce(&mut AtomicOperation) -> Result<R>,
    ) -> Result<R> {
        let mut op = self.atomic.begin(true);
        let id = op.id();
        *self.current.lock() = Some(label);

        let result = match body(&mut op) {
            Ok(value) => self.atomic.commit(op).map(|()| value),
            Err(cause) => {
                if let Err(e) = self.atomic.rollback(op) {
                    error!(
                        component = %self.name,
                        operation = label,
                        error = %e,
                        "rollback failed"
                    );
                }
                Err(cause)
            }
        };
        *self.current.lock() = None;

        match result {
            Ok(value) => {
                debug!(component = %self.name, operation = label, id, "atomic operation committed");
                Ok(value)
            }
            Err(cause) => Err(cause.lifecycle(label, self.name.clone())),
        }
    }
}
