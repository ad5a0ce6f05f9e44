//! Read-only stage views.
//!
//! A [`StageView`] is what a filter hands to code outside the connection's
//! trust boundary. It carries the full continuation surface of the wrapped
//! [`AffinityFuture`], and every continuation returns another view. It has no
//! completion or cancellation methods. Getting the raw future back takes an
//! explicit [`StageView::to_affinity_future`].

use crate::error::{Error, Result};
use crate::future::affinity::AffinityFuture;
use crate::future::listen::Listen;
use crate::future::stage::{Observer, Stage};
use crate::runtime::worker::WorkerId;
use std::fmt;
use std::future::IntoFuture;

/// A continuation-only view of an [`AffinityFuture`].
pub struct StageView<T> {
    inner: AffinityFuture<T>,
}

impl<T> Clone for StageView<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> StageView<T> {
    pub(crate) fn new(inner: AffinityFuture<T>) -> Self {
        Self { inner }
    }

    /// Returns the wrapped future, with its completion API.
    #[must_use]
    pub fn to_affinity_future(&self) -> AffinityFuture<T> {
        self.inner.clone()
    }

    /// Id of the worker continuations run on.
    #[must_use]
    pub fn worker_id(&self) -> WorkerId {
        self.inner.worker().id()
    }

    /// Returns a `std::future::Future` resolving to the outcome.
    #[must_use]
    pub fn listen(&self) -> Listen<T> {
        self.inner.listen()
    }

    /// See [`AffinityFuture::then_apply`].
    pub fn then_apply<U, F>(&self, f: F) -> StageView<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        StageView::new(self.inner.then_apply(f))
    }

    /// See [`AffinityFuture::then_apply_async`].
    pub fn then_apply_async<U, F>(&self, f: F) -> StageView<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        StageView::new(self.inner.then_apply_async(f))
    }

    /// See [`AffinityFuture::then_accept`].
    pub fn then_accept<F>(&self, f: F) -> StageView<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        StageView::new(self.inner.then_accept(f))
    }

    /// See [`AffinityFuture::then_accept_async`].
    pub fn then_accept_async<F>(&self, f: F) -> StageView<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        StageView::new(self.inner.then_accept_async(f))
    }

    /// See [`AffinityFuture::then_run`].
    pub fn then_run<F>(&self, f: F) -> StageView<()>
    where
        F: FnOnce() + Send + 'static,
    {
        StageView::new(self.inner.then_run(f))
    }

    /// See [`AffinityFuture::then_run_async`].
    pub fn then_run_async<F>(&self, f: F) -> StageView<()>
    where
        F: FnOnce() + Send + 'static,
    {
        StageView::new(self.inner.then_run_async(f))
    }

    /// See [`AffinityFuture::then_compose`].
    pub fn then_compose<U, S, F>(&self, f: F) -> StageView<U>
    where
        U: Clone + Send + 'static,
        S: Stage<U> + 'static,
        F: FnOnce(T) -> S + Send + 'static,
    {
        StageView::new(self.inner.then_compose(f))
    }

    /// See [`AffinityFuture::then_compose_async`].
    pub fn then_compose_async<U, S, F>(&self, f: F) -> StageView<U>
    where
        U: Clone + Send + 'static,
        S: Stage<U> + 'static,
        F: FnOnce(T) -> S + Send + 'static,
    {
        StageView::new(self.inner.then_compose_async(f))
    }

    /// See [`AffinityFuture::exceptionally`].
    pub fn exceptionally<F>(&self, f: F) -> Self
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        Self::new(self.inner.exceptionally(f))
    }

    /// See [`AffinityFuture::exceptionally_async`].
    pub fn exceptionally_async<F>(&self, f: F) -> Self
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        Self::new(self.inner.exceptionally_async(f))
    }

    /// See [`AffinityFuture::exceptionally_compose`].
    pub fn exceptionally_compose<S, F>(&self, f: F) -> Self
    where
        S: Stage<T> + 'static,
        F: FnOnce(Error) -> S + Send + 'static,
    {
        Self::new(self.inner.exceptionally_compose(f))
    }

    /// See [`AffinityFuture::exceptionally_compose_async`].
    pub fn exceptionally_compose_async<S, F>(&self, f: F) -> Self
    where
        S: Stage<T> + 'static,
        F: FnOnce(Error) -> S + Send + 'static,
    {
        Self::new(self.inner.exceptionally_compose_async(f))
    }

    /// See [`AffinityFuture::handle`].
    pub fn handle<U, F>(&self, f: F) -> StageView<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T>) -> U + Send + 'static,
    {
        StageView::new(self.inner.handle(f))
    }

    /// See [`AffinityFuture::handle_async`].
    pub fn handle_async<U, F>(&self, f: F) -> StageView<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T>) -> U + Send + 'static,
    {
        StageView::new(self.inner.handle_async(f))
    }

    /// See [`AffinityFuture::when_complete`].
    pub fn when_complete<F>(&self, f: F) -> Self
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        Self::new(self.inner.when_complete(f))
    }

    /// See [`AffinityFuture::when_complete_async`].
    pub fn when_complete_async<F>(&self, f: F) -> Self
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        Self::new(self.inner.when_complete_async(f))
    }

    /// See [`AffinityFuture::then_combine`].
    pub fn then_combine<U, V, S, F>(&self, other: &S, f: F) -> StageView<V>
    where
        U: Clone + Send + 'static,
        V: Clone + Send + 'static,
        S: Stage<U> + ?Sized,
        F: FnOnce(T, U) -> V + Send + 'static,
    {
        StageView::new(self.inner.then_combine(other, f))
    }

    /// See [`AffinityFuture::then_accept_both`].
    pub fn then_accept_both<U, S, F>(&self, other: &S, f: F) -> StageView<()>
    where
        U: Clone + Send + 'static,
        S: Stage<U> + ?Sized,
        F: FnOnce(T, U) + Send + 'static,
    {
        StageView::new(self.inner.then_accept_both(other, f))
    }

    /// See [`AffinityFuture::run_after_both`].
    pub fn run_after_both<U, S, F>(&self, other: &S, f: F) -> StageView<()>
    where
        U: Clone + Send + 'static,
        S: Stage<U> + ?Sized,
        F: FnOnce() + Send + 'static,
    {
        StageView::new(self.inner.run_after_both(other, f))
    }

    /// See [`AffinityFuture::apply_to_either`].
    pub fn apply_to_either<U, S, F>(&self, other: &S, f: F) -> StageView<U>
    where
        U: Clone + Send + 'static,
        S: Stage<T> + ?Sized,
        F: FnOnce(T) -> U + Send + 'static,
    {
        StageView::new(self.inner.apply_to_either(other, f))
    }

    /// See [`AffinityFuture::accept_either`].
    pub fn accept_either<S, F>(&self, other: &S, f: F) -> StageView<()>
    where
        S: Stage<T> + ?Sized,
        F: FnOnce(T) + Send + 'static,
    {
        StageView::new(self.inner.accept_either(other, f))
    }

    /// See [`AffinityFuture::run_after_either`].
    pub fn run_after_either<U, S, F>(&self, other: &S, f: F) -> StageView<()>
    where
        U: Clone + Send + 'static,
        S: Stage<U> + ?Sized,
        F: FnOnce() + Send + 'static,
    {
        StageView::new(self.inner.run_after_either(other, f))
    }
}

impl<T: Clone + Send + 'static> Stage<T> for StageView<T> {
    fn observe(&self, observer: Observer<T>) {
        self.inner.observe(observer);
    }
}

impl<T: Clone + Send + 'static> IntoFuture for StageView<T> {
    type Output = Result<T>;
    type IntoFuture = Listen<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.listen()
    }
}

impl<T> fmt::Debug for StageView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StageView").field(&self.inner).finish()
    }
}
