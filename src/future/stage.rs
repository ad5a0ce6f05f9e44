//! The `Stage` trait: anything that eventually yields a `Result<T>`.
//!
//! Dual-input combinators and `then_compose` accept any `Stage`, so callers
//! can mix worker-bound futures, read-only views and foreign promises freely.
//! The engine only ever observes a stage; it never completes one it did not
//! create.

use crate::error::Result;
use crate::future::affinity::AffinityFuture;

/// One-shot callback receiving a stage's outcome.
pub type Observer<T> = Box<dyn FnOnce(&Result<T>) + Send + 'static>;

/// A completion-bearing value.
pub trait Stage<T>: Send + Sync {
    /// Registers `observer` to receive the outcome exactly once.
    ///
    /// Implementations run the observer inline if the outcome is already
    /// known, otherwise on whichever thread produces it. No thread affinity
    /// is implied; the adoption bridge adds that.
    fn observe(&self, observer: Observer<T>);

    /// Returns the worker-bound future behind this stage, if there is one.
    ///
    /// The adoption bridge uses this to skip re-wrapping a future that is
    /// already bound to the target worker. Read-only stages return `None`.
    #[doc(hidden)]
    fn bound_future(&self) -> Option<BoundFuture<T>> {
        None
    }
}

/// Opaque handle to the future behind a [`Stage`]. Only this crate can
/// open it.
#[doc(hidden)]
pub struct BoundFuture<T>(pub(crate) AffinityFuture<T>);

impl<T, S: Stage<T> + ?Sized> Stage<T> for std::sync::Arc<S> {
    fn observe(&self, observer: Observer<T>) {
        (**self).observe(observer);
    }

    fn bound_future(&self) -> Option<BoundFuture<T>> {
        (**self).bound_future()
    }
}
