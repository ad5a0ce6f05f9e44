//! Worker-bound futures.
//!
//! An [`AffinityFuture`] pairs a [`Promise`] with the [`Worker`] that owns the
//! connection state its continuations touch. Whatever thread completes the
//! future, every continuation body attached through it runs on that worker.
//! Every derived future is bound to the same worker, so affinity carries
//! through chains of any length.
//!
//! # Dispatch
//!
//! Single-input continuations on the success or error path (`then_apply`,
//! `then_accept`, `then_run`, `then_compose`, `exceptionally`,
//! `exceptionally_compose`) branch on affinity when they fire:
//!
//! ```text
//!   source settles ──► on worker? ──yes──► run body inline
//!                           │
//!                           no ──► worker.submit(body)
//! ```
//!
//! Always-run handlers (`handle`, `when_complete`) defer and complete. The
//! handler is attached to an empty placeholder first. The source outcome is
//! then relayed into the placeholder by the worker, so the handler fires
//! during that completion, on the worker.
//!
//! Dual-input combinators adopt the second input onto the worker and then
//! always hop. `*_async` variants always hop as well.
//!
//! # Failure
//!
//! An error outcome skips success-path bodies and propagates straight to the
//! derived future. A panic inside a body is caught and settles the derived
//! future with `ErrorKind::ContinuationPanicked`. If the worker rejects a
//! hop because it is shutting down, the body never runs and the derived
//! future fails with `ErrorKind::WorkerShutdown`.
//!
//! [`Worker`]: crate::runtime::Worker

use crate::error::{AlreadyCompleted, Error, Result};
use crate::future::adopt::adopt;
use crate::future::listen::Listen;
use crate::future::promise::Promise;
use crate::future::stage::{BoundFuture, Observer, Stage};
use crate::future::view::StageView;
use crate::runtime::worker::WorkerRef;
use crate::tracing_compat::trace;
use std::fmt;
use std::future::IntoFuture;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Where a continuation body runs relative to the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// Inline if already on the worker, otherwise hop.
    Affine,
    /// Always hop through the worker's queue.
    Async,
}

/// Runs `body` on `worker` according to `mode`.
///
/// `on_rejected` receives the submission error if the worker refuses the
/// task; `body` is dropped unrun in that case.
pub(crate) fn dispatch(
    worker: &WorkerRef,
    mode: Dispatch,
    body: impl FnOnce() + Send + 'static,
    on_rejected: impl FnOnce(Error),
) {
    if mode == Dispatch::Affine && worker.is_current() {
        body();
        return;
    }
    trace!(worker = %worker.id(), ?mode, "hop onto worker");
    if let Err(err) = worker.submit(Box::new(body)) {
        on_rejected(err);
    }
}

/// Runs a user-supplied body, turning a panic into an error outcome.
fn guarded<R>(body: impl FnOnce() -> R) -> Result<R> {
    catch_unwind(AssertUnwindSafe(body)).map_err(|payload| Error::from_panic(&payload))
}

/// A future whose continuations always run on its bound worker.
pub struct AffinityFuture<T> {
    promise: Promise<T>,
    worker: WorkerRef,
}

impl<T> Clone for AffinityFuture<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            worker: Arc::clone(&self.worker),
        }
    }
}

impl<T: Clone + Send + 'static> AffinityFuture<T> {
    /// Creates a pending future bound to `worker`.
    #[must_use]
    pub fn new(worker: WorkerRef) -> Self {
        Self {
            promise: Promise::new(),
            worker,
        }
    }

    /// Creates a future bound to `worker`, already completed with `value`.
    #[must_use]
    pub fn completed(worker: WorkerRef, value: T) -> Self {
        Self {
            promise: Promise::completed(value),
            worker,
        }
    }

    /// Creates a future bound to `worker`, already failed with `err`.
    #[must_use]
    pub fn failed(worker: WorkerRef, err: Error) -> Self {
        Self {
            promise: Promise::failed(err),
            worker,
        }
    }

    /// Runs `supplier` on `worker` and completes the returned future with
    /// its result.
    pub fn supply_async(worker: WorkerRef, supplier: impl FnOnce() -> T + Send + 'static) -> Self {
        let future = Self::new(worker);
        let out = future.clone();
        let rejected = future.clone();
        dispatch(
            &future.worker,
            Dispatch::Async,
            move || out.forward(guarded(supplier)),
            move |err| rejected.forward(Err(err)),
        );
        future
    }

    /// The worker every continuation on this future runs on.
    #[must_use]
    pub fn worker(&self) -> &WorkerRef {
        &self.worker
    }

    /// Creates a pending future bound to the same worker.
    ///
    /// Every combinator builds its result through this.
    #[must_use]
    pub fn new_incomplete_future<U: Clone + Send + 'static>(&self) -> AffinityFuture<U> {
        AffinityFuture::new(Arc::clone(&self.worker))
    }

    fn bound<U>(&self, promise: Promise<U>) -> AffinityFuture<U> {
        AffinityFuture {
            promise,
            worker: Arc::clone(&self.worker),
        }
    }

    // --- completion -------------------------------------------------------

    /// Completes the future with `value`.
    ///
    /// # Errors
    ///
    /// Hands `value` back if the future has already settled.
    pub fn complete(&self, value: T) -> core::result::Result<(), AlreadyCompleted<T>> {
        self.promise.complete(value)
    }

    /// Completes the future with `err`.
    ///
    /// # Errors
    ///
    /// Hands `err` back if the future has already settled.
    pub fn complete_with_error(&self, err: Error) -> core::result::Result<(), AlreadyCompleted<Error>> {
        self.promise.complete_with_error(err)
    }

    /// Completes the future with `outcome`.
    ///
    /// # Errors
    ///
    /// Hands `outcome` back if the future has already settled.
    pub fn settle(&self, outcome: Result<T>) -> core::result::Result<(), AlreadyCompleted<Result<T>>> {
        self.promise.settle(outcome)
    }

    /// Fails the future with a cancellation error.
    ///
    /// Only this future is affected: upstream futures and adopted foreign
    /// futures are left alone. Returns `false` if already settled.
    pub fn cancel(&self) -> bool {
        self.promise.cancel()
    }

    /// Settles a derived future. Losing the race to an external completer
    /// is fine: the first outcome stands.
    fn forward(&self, outcome: Result<T>) {
        let _ = self.promise.settle(outcome);
    }

    /// Makes this future mirror `stage`, adopting it onto this worker first.
    fn follow<S: Stage<T> + ?Sized>(&self, stage: &S) {
        let source = adopt(stage, &self.worker);
        let out = self.clone();
        source.promise.subscribe(move |outcome| out.forward(outcome.clone()));
    }

    // --- queries ----------------------------------------------------------

    /// Returns true once settled, either way.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.promise.is_done()
    }

    /// Returns true if settled with an error, cancellation included.
    #[must_use]
    pub fn is_completed_with_error(&self) -> bool {
        self.promise.is_completed_with_error()
    }

    /// Returns true if cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.promise.is_cancelled()
    }

    /// Returns the outcome if settled. Never blocks.
    #[must_use]
    pub fn get_now(&self) -> Option<Result<T>> {
        self.promise.get_now()
    }

    /// Narrows this future to a read-only [`StageView`].
    #[must_use]
    pub fn minimal_stage(&self) -> StageView<T> {
        StageView::new(self.clone())
    }

    /// Returns a `std::future::Future` resolving to the outcome.
    ///
    /// The awaiting task resumes on whatever executor polls it, not on the
    /// bound worker.
    #[must_use]
    pub fn listen(&self) -> Listen<T> {
        self.promise.listen()
    }

    // --- dispatch building blocks ----------------------------------------

    /// Success path: errors pass through, values go to `body` per `mode`.
    fn on_success<U, B>(&self, mode: Dispatch, body: B) -> AffinityFuture<U>
    where
        U: Clone + Send + 'static,
        B: FnOnce(T, &AffinityFuture<U>) + Send + 'static,
    {
        let derived = self.new_incomplete_future::<U>();
        let out = derived.clone();
        let worker = Arc::clone(&self.worker);
        self.promise.subscribe(move |outcome| match outcome {
            Err(err) => out.forward(Err(err.clone())),
            Ok(value) => {
                let value = value.clone();
                let rejected = out.clone();
                dispatch(
                    &worker,
                    mode,
                    move || body(value, &out),
                    move |err| rejected.forward(Err(err)),
                );
            }
        });
        derived
    }

    /// Error path: values pass through, errors go to `body` per `mode`.
    fn on_failure<B>(&self, mode: Dispatch, body: B) -> Self
    where
        B: FnOnce(Error, &Self) + Send + 'static,
    {
        let derived = self.new_incomplete_future::<T>();
        let out = derived.clone();
        let worker = Arc::clone(&self.worker);
        self.promise.subscribe(move |outcome| match outcome {
            Ok(value) => out.forward(Ok(value.clone())),
            Err(err) => {
                let err = err.clone();
                let rejected = out.clone();
                dispatch(
                    &worker,
                    mode,
                    move || body(err, &out),
                    move |err| rejected.forward(Err(err)),
                );
            }
        });
        derived
    }

    /// Defer and complete: `handler` is attached to an empty placeholder,
    /// then the source outcome is relayed into the placeholder through the
    /// worker. The handler therefore fires inside a completion that the
    /// worker performs.
    fn on_settled<U, H>(&self, mode: Dispatch, handler: H) -> AffinityFuture<U>
    where
        U: Clone + Send + 'static,
        H: FnOnce(&Result<T>, &AffinityFuture<U>) + Send + 'static,
    {
        let placeholder = self.new_incomplete_future::<T>();
        let derived = self.new_incomplete_future::<U>();

        let out = derived.clone();
        placeholder
            .promise
            .subscribe(move |outcome| handler(outcome, &out));

        let worker = Arc::clone(&self.worker);
        let rejected = derived.clone();
        self.promise.subscribe(move |outcome| {
            let outcome = outcome.clone();
            dispatch(
                &worker,
                mode,
                move || placeholder.forward(outcome),
                move |err| rejected.forward(Err(err)),
            );
        });
        derived
    }

    fn apply_with<U, F>(&self, mode: Dispatch, f: F) -> AffinityFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.on_success(mode, move |value, out| out.forward(guarded(|| f(value))))
    }

    fn accept_with<F>(&self, mode: Dispatch, f: F) -> AffinityFuture<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.on_success(mode, move |value, out| out.forward(guarded(|| f(value))))
    }

    fn run_with<F>(&self, mode: Dispatch, f: F) -> AffinityFuture<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_success(mode, move |_, out| out.forward(guarded(f)))
    }

    fn compose_with<U, S, F>(&self, mode: Dispatch, f: F) -> AffinityFuture<U>
    where
        U: Clone + Send + 'static,
        S: Stage<U> + 'static,
        F: FnOnce(T) -> S + Send + 'static,
    {
        self.on_success(mode, move |value, out| match guarded(|| f(value)) {
            Ok(next) => out.follow(&next),
            Err(err) => out.forward(Err(err)),
        })
    }

    fn exceptionally_with<F>(&self, mode: Dispatch, f: F) -> Self
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        self.on_failure(mode, move |err, out| out.forward(guarded(|| f(err))))
    }

    fn exceptionally_compose_with<S, F>(&self, mode: Dispatch, f: F) -> Self
    where
        S: Stage<T> + 'static,
        F: FnOnce(Error) -> S + Send + 'static,
    {
        self.on_failure(mode, move |err, out| match guarded(|| f(err)) {
            Ok(next) => out.follow(&next),
            Err(panic) => out.forward(Err(panic)),
        })
    }

    fn handle_with<U, F>(&self, mode: Dispatch, f: F) -> AffinityFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T>) -> U + Send + 'static,
    {
        self.on_settled(mode, move |outcome, out| {
            let outcome = outcome.clone();
            out.forward(guarded(|| f(outcome)));
        })
    }

    fn when_complete_with<F>(&self, mode: Dispatch, f: F) -> Self
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        self.on_settled(mode, move |outcome, out| {
            let result = match (guarded(|| f(outcome)), outcome) {
                (Err(panic), Ok(_)) => Err(panic),
                _ => outcome.clone(),
            };
            out.forward(result);
        })
    }

    // --- single-input combinators ------------------------------------------

    /// Maps the value with `f`, on the worker.
    pub fn then_apply<U, F>(&self, f: F) -> AffinityFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.apply_with(Dispatch::Affine, f)
    }

    /// Like [`then_apply`](Self::then_apply), but always queued behind work
    /// already on the worker.
    pub fn then_apply_async<U, F>(&self, f: F) -> AffinityFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.apply_with(Dispatch::Async, f)
    }

    /// Consumes the value with `f`, on the worker.
    pub fn then_accept<F>(&self, f: F) -> AffinityFuture<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.accept_with(Dispatch::Affine, f)
    }

    /// Always-queued [`then_accept`](Self::then_accept).
    pub fn then_accept_async<F>(&self, f: F) -> AffinityFuture<()>
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.accept_with(Dispatch::Async, f)
    }

    /// Runs `f` after a successful completion, on the worker.
    pub fn then_run<F>(&self, f: F) -> AffinityFuture<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_with(Dispatch::Affine, f)
    }

    /// Always-queued [`then_run`](Self::then_run).
    pub fn then_run_async<F>(&self, f: F) -> AffinityFuture<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_with(Dispatch::Async, f)
    }

    /// Chains into the stage produced by `f`.
    ///
    /// The returned stage is adopted onto this worker, so the result stays
    /// bound here even when `f` hands back a foreign future.
    pub fn then_compose<U, S, F>(&self, f: F) -> AffinityFuture<U>
    where
        U: Clone + Send + 'static,
        S: Stage<U> + 'static,
        F: FnOnce(T) -> S + Send + 'static,
    {
        self.compose_with(Dispatch::Affine, f)
    }

    /// Always-queued [`then_compose`](Self::then_compose).
    pub fn then_compose_async<U, S, F>(&self, f: F) -> AffinityFuture<U>
    where
        U: Clone + Send + 'static,
        S: Stage<U> + 'static,
        F: FnOnce(T) -> S + Send + 'static,
    {
        self.compose_with(Dispatch::Async, f)
    }

    /// Recovers from an error with `f`, on the worker. Values pass through.
    pub fn exceptionally<F>(&self, f: F) -> Self
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        self.exceptionally_with(Dispatch::Affine, f)
    }

    /// Always-queued [`exceptionally`](Self::exceptionally).
    pub fn exceptionally_async<F>(&self, f: F) -> Self
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        self.exceptionally_with(Dispatch::Async, f)
    }

    /// Recovers from an error with the stage produced by `f`, adopted onto
    /// this worker.
    pub fn exceptionally_compose<S, F>(&self, f: F) -> Self
    where
        S: Stage<T> + 'static,
        F: FnOnce(Error) -> S + Send + 'static,
    {
        self.exceptionally_compose_with(Dispatch::Affine, f)
    }

    /// Always-queued [`exceptionally_compose`](Self::exceptionally_compose).
    pub fn exceptionally_compose_async<S, F>(&self, f: F) -> Self
    where
        S: Stage<T> + 'static,
        F: FnOnce(Error) -> S + Send + 'static,
    {
        self.exceptionally_compose_with(Dispatch::Async, f)
    }

    /// Maps either outcome with `f`. Runs exactly once, on the worker,
    /// whether the source succeeded or failed.
    pub fn handle<U, F>(&self, f: F) -> AffinityFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T>) -> U + Send + 'static,
    {
        self.handle_with(Dispatch::Affine, f)
    }

    /// Always-queued [`handle`](Self::handle).
    pub fn handle_async<U, F>(&self, f: F) -> AffinityFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Result<T>) -> U + Send + 'static,
    {
        self.handle_with(Dispatch::Async, f)
    }

    /// Observes either outcome with `f`, on the worker.
    ///
    /// The result carries the source outcome. A panic in `f` replaces a
    /// successful outcome but never masks a source error.
    pub fn when_complete<F>(&self, f: F) -> Self
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        self.when_complete_with(Dispatch::Affine, f)
    }

    /// Always-queued [`when_complete`](Self::when_complete).
    pub fn when_complete_async<F>(&self, f: F) -> Self
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        self.when_complete_with(Dispatch::Async, f)
    }

    // --- dual-input combinators --------------------------------------------

    /// Pairs this future's value with `other`'s once both are in.
    ///
    /// If this future fails its error wins, otherwise `other`'s error does.
    fn join<U, S>(&self, other: &S) -> AffinityFuture<(T, U)>
    where
        U: Clone + Send + 'static,
        S: Stage<U> + ?Sized,
    {
        let other = adopt(other, &self.worker);
        let joined = Promise::new();
        let sink = joined.clone();
        self.promise.subscribe(move |first| {
            let first = first.clone();
            other.promise.subscribe(move |second| {
                let pair = match (first, second) {
                    (Err(err), _) => Err(err),
                    (Ok(_), Err(err)) => Err(err.clone()),
                    (Ok(a), Ok(b)) => Ok((a, b.clone())),
                };
                let _ = sink.settle(pair);
            });
        });
        self.bound(joined)
    }

    /// Settles with whichever of this future and `other` settles first,
    /// projected to a common type.
    fn first_of<U, X, S>(
        &self,
        other: &S,
        left: impl FnOnce(&T) -> X + Send + 'static,
        right: impl FnOnce(&U) -> X + Send + 'static,
    ) -> AffinityFuture<X>
    where
        U: Clone + Send + 'static,
        X: Clone + Send + 'static,
        S: Stage<U> + ?Sized,
    {
        let other = adopt(other, &self.worker);
        let race = Promise::new();

        let sink = race.clone();
        self.promise.subscribe(move |outcome| {
            let _ = sink.settle(outcome.as_ref().map(left).map_err(Clone::clone));
        });
        let sink = race.clone();
        other.promise.subscribe(move |outcome| {
            let _ = sink.settle(outcome.as_ref().map(right).map_err(Clone::clone));
        });
        self.bound(race)
    }

    /// Combines both values with `f` once both futures complete.
    ///
    /// `other` is adopted onto this worker and `f` always runs queued on it.
    pub fn then_combine<U, V, S, F>(&self, other: &S, f: F) -> AffinityFuture<V>
    where
        U: Clone + Send + 'static,
        V: Clone + Send + 'static,
        S: Stage<U> + ?Sized,
        F: FnOnce(T, U) -> V + Send + 'static,
    {
        self.join(other)
            .on_success(Dispatch::Async, move |(a, b), out| out.forward(guarded(|| f(a, b))))
    }

    /// Consumes both values with `f` once both futures complete.
    pub fn then_accept_both<U, S, F>(&self, other: &S, f: F) -> AffinityFuture<()>
    where
        U: Clone + Send + 'static,
        S: Stage<U> + ?Sized,
        F: FnOnce(T, U) + Send + 'static,
    {
        self.join(other)
            .on_success(Dispatch::Async, move |(a, b), out| out.forward(guarded(|| f(a, b))))
    }

    /// Runs `f` once both futures complete successfully.
    pub fn run_after_both<U, S, F>(&self, other: &S, f: F) -> AffinityFuture<()>
    where
        U: Clone + Send + 'static,
        S: Stage<U> + ?Sized,
        F: FnOnce() + Send + 'static,
    {
        self.join(other)
            .on_success(Dispatch::Async, move |_: (T, U), out| out.forward(guarded(f)))
    }

    /// Maps the first value to arrive from this future or `other`.
    ///
    /// The first outcome wins even if it is an error.
    pub fn apply_to_either<U, S, F>(&self, other: &S, f: F) -> AffinityFuture<U>
    where
        U: Clone + Send + 'static,
        S: Stage<T> + ?Sized,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.first_of(other, T::clone, T::clone)
            .on_success(Dispatch::Async, move |value, out| out.forward(guarded(|| f(value))))
    }

    /// Consumes the first value to arrive from this future or `other`.
    pub fn accept_either<S, F>(&self, other: &S, f: F) -> AffinityFuture<()>
    where
        S: Stage<T> + ?Sized,
        F: FnOnce(T) + Send + 'static,
    {
        self.first_of(other, T::clone, T::clone)
            .on_success(Dispatch::Async, move |value, out| out.forward(guarded(|| f(value))))
    }

    /// Runs `f` once either this future or `other` completes.
    pub fn run_after_either<U, S, F>(&self, other: &S, f: F) -> AffinityFuture<()>
    where
        U: Clone + Send + 'static,
        S: Stage<U> + ?Sized,
        F: FnOnce() + Send + 'static,
    {
        self.first_of(other, |_: &T| (), |_: &U| ())
            .on_success(Dispatch::Async, move |(), out| out.forward(guarded(f)))
    }
}

impl<T: Clone + Send + 'static> Stage<T> for AffinityFuture<T> {
    fn observe(&self, observer: Observer<T>) {
        self.promise.subscribe_boxed(observer);
    }

    fn bound_future(&self) -> Option<BoundFuture<T>> {
        Some(BoundFuture(self.clone()))
    }
}

impl<T: Clone + Send + 'static> IntoFuture for AffinityFuture<T> {
    type Output = Result<T>;
    type IntoFuture = Listen<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.listen()
    }
}

impl<T> fmt::Debug for AffinityFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AffinityFuture")
            .field("worker", &self.worker.id())
            .field("promise", &self.promise)
            .finish()
    }
}
