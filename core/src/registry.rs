//! Continuation registry: suspended tasks keyed by an opaque handle.
//!
//! The registry owns each suspended task for the whole asynchronous gap, so
//! the task stays alive and reachable until the pump takes it back out.
//! Only the scheduler's thread touches it (registration in `fetch`,
//! release in `pump`), so it carries no lock.

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

/// Opaque reference to one suspended task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContinuationHandle(Uuid);

impl ContinuationHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ContinuationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_simple())
    }
}

pub struct ContinuationRegistry<T> {
    pending: HashMap<ContinuationHandle, T>,
}

impl<T> ContinuationRegistry<T> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Take ownership of `task` and hand back a handle unique among the
    /// currently registered tasks.
    pub fn register(&mut self, task: T) -> ContinuationHandle {
        let handle = self.reserve();
        self.insert(handle, task);
        handle
    }

    /// Pick a handle not currently in use, without registering anything.
    pub fn reserve(&self) -> ContinuationHandle {
        let mut handle = ContinuationHandle::new();
        while self.pending.contains_key(&handle) {
            handle = ContinuationHandle::new();
        }
        handle
    }

    /// Register `task` under a handle from `reserve`.
    pub fn insert(&mut self, handle: ContinuationHandle, task: T) {
        self.pending.insert(handle, task);
    }

    /// Remove and return the task. A second release of the same handle
    /// returns `None`.
    pub fn release(&mut self, handle: ContinuationHandle) -> Option<T> {
        self.pending.remove(&handle)
    }

    pub fn contains(&self, handle: ContinuationHandle) -> bool {
        self.pending.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Release every task at once.
    pub fn drain(&mut self) -> Vec<T> {
        self.pending.drain().map(|(_, task)| task).collect()
    }
}

impl<T> Default for ContinuationRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ContinuationRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuationRegistry")
            .field("pending", &self.pending.len())
            .finish()
    }
}
