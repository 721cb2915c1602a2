//! Bookkeeping for in-flight `FIND` and `RUN` operations.
//!
//! The executing set and the cancellation-requested set live behind one mutex
//! so that a bulk cancellation (stop-on-fail) is observed atomically.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Kind of work an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Test discovery.
    Find,
    /// Test execution.
    Run,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Find => "find",
            Self::Run => "run",
        })
    }
}

#[derive(Debug, Default)]
struct Sets {
    executing: HashMap<String, OperationKind>,
    cancel_requested: HashSet<String>,
}

/// Point-in-time copy of the tracker's sets, ordered for stable assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationSnapshot {
    /// Operations currently executing.
    pub executing: BTreeSet<String>,
    /// Operations with an outstanding cancellation request.
    pub cancel_requested: BTreeSet<String>,
}

/// Tracks executing operations and cancellation requests.
#[derive(Debug, Default)]
pub struct OperationTracker {
    sets: Mutex<Sets>,
}

impl OperationTracker {
    /// Marks `operation_id` as executing. Returns `false` if it already is.
    pub fn try_begin(&self, operation_id: &str, kind: OperationKind) -> bool {
        let mut sets = self.lock();
        if sets.executing.contains_key(operation_id) {
            return false;
        }
        sets.executing.insert(operation_id.to_owned(), kind);
        true
    }

    /// Returns `true` while `operation_id` is executing.
    #[must_use]
    pub fn is_executing(&self, operation_id: &str) -> bool {
        self.lock().executing.contains_key(operation_id)
    }

    /// Requests cancellation of an executing operation.
    ///
    /// Returns `false`, changing nothing, when the operation is not executing.
    pub fn request_cancel(&self, operation_id: &str) -> bool {
        let mut sets = self.lock();
        if !sets.executing.contains_key(operation_id) {
            return false;
        }
        sets.cancel_requested.insert(operation_id.to_owned());
        true
    }

    /// Returns `true` once cancellation of `operation_id` has been requested.
    #[must_use]
    pub fn is_cancel_requested(&self, operation_id: &str) -> bool {
        self.lock().cancel_requested.contains(operation_id)
    }

    /// Removes `operation_id` from both sets.
    pub fn complete(&self, operation_id: &str) {
        let mut sets = self.lock();
        sets.executing.remove(operation_id);
        sets.cancel_requested.remove(operation_id);
    }

    /// Requests cancellation of every executing operation except `keep`.
    ///
    /// Returns the newly cancelled IDs in sorted order.
    pub fn cancel_others(&self, keep: &str) -> Vec<String> {
        let mut sets = self.lock();
        let Sets {
            executing,
            cancel_requested,
        } = &mut *sets;
        let mut cancelled: Vec<String> = executing
            .keys()
            .filter(|id| id.as_str() != keep)
            .filter(|id| cancel_requested.insert((*id).clone()))
            .cloned()
            .collect();
        cancelled.sort();
        cancelled
    }

    /// Requests cancellation of every executing operation.
    ///
    /// Returns how many operations were executing.
    pub fn request_cancel_all(&self) -> usize {
        let mut sets = self.lock();
        let Sets {
            executing,
            cancel_requested,
        } = &mut *sets;
        cancel_requested.extend(executing.keys().cloned());
        executing.len()
    }

    /// Copies both sets.
    #[must_use]
    pub fn snapshot(&self) -> OperationSnapshot {
        let sets = self.lock();
        OperationSnapshot {
            executing: sets.executing.keys().cloned().collect(),
            cancel_requested: sets.cancel_requested.iter().cloned().collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sets> {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cancellation handle passed to the work of one operation.
#[derive(Debug, Clone)]
pub struct OperationContext {
    id: String,
    kind: OperationKind,
    tracker: Arc<OperationTracker>,
}

impl OperationContext {
    /// Binds an operation to the tracker that owns its cancellation flag.
    #[must_use]
    pub const fn new(id: String, kind: OperationKind, tracker: Arc<OperationTracker>) -> Self {
        Self { id, kind, tracker }
    }

    /// Operation ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Operation kind.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.tracker.is_cancel_requested(&self.id)
    }

    /// Returns `true` while the operation should keep producing results.
    #[must_use]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled()
    }
}
