//! The owning worker interface.
//!
//! A worker is a single-threaded FIFO task queue bound 1:1 to a connection.
//! The future engine needs exactly two things from it: "run this task
//! later, in order" ([`Worker::submit`]) and "is the calling thread you"
//! ([`Worker::is_current`]). [`WorkerId`] gives workers a stable identity so
//! the adoption bridge can tell whether a future is already bound to the
//! target worker.

use crate::error::Result;
use core::fmt;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A unit of work queued on a worker.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A shared reference to a worker. Futures store one of these for their
/// whole lifetime.
pub type WorkerRef = Arc<dyn Worker>;

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Allocates a process-unique worker id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{}", self.0)
    }
}

/// A single-threaded task queue that owns one connection's state.
pub trait Worker: Send + Sync + fmt::Debug {
    /// Returns this worker's identity.
    fn id(&self) -> WorkerId;

    /// Enqueues `task` to run on this worker after everything already queued.
    ///
    /// # Errors
    ///
    /// Returns `ErrorKind::WorkerShutdown` if the worker no longer accepts
    /// tasks. The task is dropped without running.
    fn submit(&self, task: Task) -> Result<()>;

    /// Returns true if the calling thread is this worker.
    fn is_current(&self) -> bool;
}

thread_local! {
    /// Worker running on the current thread, if any.
    static CURRENT_WORKER: Cell<Option<WorkerId>> = const { Cell::new(None) };
}

/// Marks the calling thread as the thread of worker `id`.
///
/// Worker implementations call this once, first thing on their own thread.
pub fn enter_worker_thread(id: WorkerId) {
    CURRENT_WORKER.with(|current| current.set(Some(id)));
}

/// Clears the current-worker marker on the calling thread.
pub fn exit_worker_thread() {
    CURRENT_WORKER.with(|current| current.set(None));
}

/// Returns the id of the worker running the calling thread, if any.
#[must_use]
pub fn current_worker_id() -> Option<WorkerId> {
    CURRENT_WORKER.with(Cell::get)
}
