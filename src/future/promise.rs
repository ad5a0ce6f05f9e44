//! The completion primitive: a value slot plus an observer list.
//!
//! ```text
//!            complete(v) / complete_with_error(e)
//!   Pending ─────────────────────────────────────► Done(outcome)
//!   [observers]        first write wins              │
//!                                                    └─► observers run in
//!                                                        attachment order
//! ```
//!
//! A [`Promise`] has no notion of threads. Observers run on whichever thread
//! settles it, or inline on the subscribing thread if it is already settled.
//! Outside the crate it serves as the plain "foreign" future: something that
//! completes somewhere else and must be adopted before worker-bound code may
//! continue from it.
//!
//! The slot is guarded by a `parking_lot` mutex that is never held while an
//! observer runs, so observers may freely subscribe to or settle other
//! promises (or this one).

use crate::error::{AlreadyCompleted, Error, Result};
use crate::future::listen::Listen;
use crate::future::stage::{Observer, Stage};
use parking_lot::{Mutex, MutexGuard};
use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

enum State<T> {
    Pending(Vec<Observer<T>>),
    Done(Result<T>),
}

type PanicPayload = Box<dyn Any + Send>;

/// Observers of one settled promise, bound to its outcome.
type Batch = Box<dyn FnOnce() -> Option<PanicPayload>>;

thread_local! {
    /// Batches settled while this thread is already running observers.
    /// `None` when no `finish` is draining on this thread.
    static DRAIN_QUEUE: RefCell<Option<VecDeque<Batch>>> = const { RefCell::new(None) };
}

/// Queues `batch` if this thread is already draining. Otherwise marks the
/// thread as draining and hands the batch back to run.
fn enqueue_or_claim(batch: Batch) -> Option<Batch> {
    DRAIN_QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        match queue.as_mut() {
            Some(pending) => {
                pending.push_back(batch);
                None
            }
            None => {
                *queue = Some(VecDeque::new());
                Some(batch)
            }
        }
    })
}

fn notify_all<T>(observers: Vec<Observer<T>>, outcome: &Result<T>) -> Option<PanicPayload> {
    let mut first_panic = None;
    for observer in observers {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| observer(outcome))) {
            first_panic.get_or_insert(payload);
        }
    }
    first_panic
}

/// A write-once, multi-observer completion slot.
pub struct Promise<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Creates a pending promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Pending(Vec::new()))),
        }
    }

    /// Creates a promise already completed with `value`.
    #[must_use]
    pub fn completed(value: T) -> Self {
        Self::settled(Ok(value))
    }

    /// Creates a promise already completed with `err`.
    #[must_use]
    pub fn failed(err: Error) -> Self {
        Self::settled(Err(err))
    }

    fn settled(outcome: Result<T>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Done(outcome))),
        }
    }

    /// Completes with a value.
    ///
    /// # Errors
    ///
    /// Hands `value` back if the promise has already settled.
    pub fn complete(&self, value: T) -> core::result::Result<(), AlreadyCompleted<T>> {
        let state = self.state.lock();
        if matches!(*state, State::Done(_)) {
            return Err(AlreadyCompleted(value));
        }
        Self::finish(state, Ok(value));
        Ok(())
    }

    /// Completes with an error.
    ///
    /// # Errors
    ///
    /// Hands `err` back if the promise has already settled.
    pub fn complete_with_error(&self, err: Error) -> core::result::Result<(), AlreadyCompleted<Error>> {
        let state = self.state.lock();
        if matches!(*state, State::Done(_)) {
            return Err(AlreadyCompleted(err));
        }
        Self::finish(state, Err(err));
        Ok(())
    }

    /// Completes with `outcome`, whichever way it went.
    ///
    /// # Errors
    ///
    /// Hands `outcome` back if the promise has already settled.
    pub fn settle(&self, outcome: Result<T>) -> core::result::Result<(), AlreadyCompleted<Result<T>>> {
        let state = self.state.lock();
        if matches!(*state, State::Done(_)) {
            return Err(AlreadyCompleted(outcome));
        }
        Self::finish(state, outcome);
        Ok(())
    }

    /// Settles with a cancellation error. Returns `false` if already settled.
    pub fn cancel(&self) -> bool {
        self.complete_with_error(Error::cancelled()).is_ok()
    }

    /// Records `outcome` and runs every pending observer, in attachment order,
    /// after the lock is released.
    ///
    /// Settling from inside an observer does not recurse: the nested batch is
    /// queued on this thread and run by the outermost `finish` once the
    /// current batch returns, so chains of any length use constant stack.
    ///
    /// An observer that panics does not stop the rest; the first panic is
    /// resumed on the outermost settling thread once every queued batch has
    /// run.
    fn finish(mut state: MutexGuard<'_, State<T>>, outcome: Result<T>) {
        let local = outcome.clone();
        let previous = std::mem::replace(&mut *state, State::Done(outcome));
        drop(state);

        let State::Pending(observers) = previous else {
            return;
        };
        if observers.is_empty() {
            return;
        }
        let batch: Batch = Box::new(move || notify_all(observers, &local));
        let Some(batch) = enqueue_or_claim(batch) else {
            return;
        };

        let mut first_panic = batch();
        while let Some(next) =
            DRAIN_QUEUE.with(|queue| queue.borrow_mut().as_mut().and_then(VecDeque::pop_front))
        {
            if let Some(payload) = next() {
                first_panic.get_or_insert(payload);
            }
        }
        DRAIN_QUEUE.with(|queue| *queue.borrow_mut() = None);
        if let Some(payload) = first_panic {
            resume_unwind(payload);
        }
    }

    /// Registers a one-shot observer.
    ///
    /// Runs inline on the calling thread if the promise has already settled,
    /// otherwise on the thread that settles it.
    pub fn subscribe(&self, observer: impl FnOnce(&Result<T>) + Send + 'static) {
        self.subscribe_boxed(Box::new(observer));
    }

    pub(crate) fn subscribe_boxed(&self, observer: Observer<T>) {
        let mut state = self.state.lock();
        match &mut *state {
            State::Pending(observers) => observers.push(observer),
            State::Done(outcome) => {
                let outcome = outcome.clone();
                drop(state);
                observer(&outcome);
            }
        }
    }

    /// Returns true once settled, either way.
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(*self.state.lock(), State::Done(_))
    }

    /// Returns true if settled with an error (cancellation included).
    #[must_use]
    pub fn is_completed_with_error(&self) -> bool {
        matches!(*self.state.lock(), State::Done(Err(_)))
    }

    /// Returns true if settled by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(&*self.state.lock(), State::Done(Err(e)) if e.is_cancelled())
    }

    /// Returns a copy of the outcome if settled. Never blocks.
    #[must_use]
    pub fn get_now(&self) -> Option<Result<T>> {
        match &*self.state.lock() {
            State::Pending(_) => None,
            State::Done(outcome) => Some(outcome.clone()),
        }
    }

    /// Returns a `std::future::Future` that resolves to the outcome.
    #[must_use]
    pub fn listen(&self) -> Listen<T> {
        Listen::new(self.clone())
    }

    #[cfg(test)]
    pub(crate) fn observer_count(&self) -> usize {
        match &*self.state.lock() {
            State::Pending(observers) => observers.len(),
            State::Done(_) => 0,
        }
    }
}

impl<T: Clone + Send + 'static> Stage<T> for Promise<T> {
    fn observe(&self, observer: Observer<T>) {
        self.subscribe_boxed(observer);
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.lock() {
            State::Pending(observers) => format!("pending({} observers)", observers.len()),
            State::Done(Ok(_)) => "completed".to_string(),
            State::Done(Err(e)) => format!("failed({e})"),
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn observers_run_in_attachment_order_on_completion() {
        let promise = Promise::<i32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3 {
            let seen = Arc::clone(&seen);
            promise.subscribe(move |outcome| {
                seen.lock().push((tag, outcome.as_ref().ok().copied()));
            });
        }
        assert_eq!(promise.observer_count(), 3);
        assert!(seen.lock().is_empty());

        promise.complete(7).expect("first completion");
        assert_eq!(*seen.lock(), vec![(0, Some(7)), (1, Some(7)), (2, Some(7))]);
        assert_eq!(promise.observer_count(), 0);
    }

    #[test]
    fn subscribe_after_completion_runs_inline() {
        let promise = Promise::completed("ready");
        let mut ran_inline = false;
        let (tx, rx) = mpsc::channel();
        promise.subscribe(move |outcome| tx.send(outcome.clone()).expect("send"));
        if let Ok(outcome) = rx.try_recv() {
            ran_inline = true;
            assert_eq!(outcome.expect("value"), "ready");
        }
        assert!(ran_inline);
    }

    #[test]
    fn first_write_wins() {
        let promise = Promise::<i32>::new();
        let (tx, rx) = mpsc::channel();
        promise.subscribe(move |outcome| tx.send(outcome.clone()).expect("send"));

        promise.complete(1).expect("first completion");
        assert_eq!(promise.complete(2), Err(AlreadyCompleted(2)));
        let rejected = promise
            .complete_with_error(Error::user("late"))
            .expect_err("already settled");
        assert_eq!(rejected.0.message(), Some("late"));
        assert!(!promise.cancel());

        assert_eq!(promise.get_now().expect("settled").expect("value"), 1);
        assert_eq!(rx.recv().expect("observer ran").expect("value"), 1);
        assert!(rx.try_recv().is_err(), "observer notified exactly once");
    }

    #[test]
    fn error_then_value_keeps_error() {
        let promise = Promise::<i32>::new();
        promise
            .complete_with_error(Error::user("first"))
            .expect("first completion");
        assert!(promise.complete(5).is_err());
        assert!(promise.is_completed_with_error());
        let err = promise.get_now().expect("settled").expect_err("error");
        assert_eq!(err.message(), Some("first"));
    }

    #[test]
    fn cancel_is_an_error_outcome() {
        let promise = Promise::<()>::new();
        assert!(promise.cancel());
        assert!(promise.is_done());
        assert!(promise.is_cancelled());
        let err = promise.get_now().expect("settled").expect_err("cancelled");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn observers_may_reenter_the_promise() {
        let promise = Promise::<i32>::new();
        let inner = promise.clone();
        let (tx, rx) = mpsc::channel();
        promise.subscribe(move |_| {
            let tx = tx.clone();
            inner.subscribe(move |outcome| tx.send(outcome.clone()).expect("send"));
        });
        promise.complete(3).expect("complete");
        assert_eq!(rx.recv().expect("nested observer").expect("value"), 3);
    }

    #[test]
    fn settling_from_observers_does_not_grow_the_stack() {
        const DEPTH: usize = 200_000;
        let links: Vec<Promise<usize>> = (0..=DEPTH).map(|_| Promise::new()).collect();
        for pair in links.windows(2) {
            let next = pair[1].clone();
            pair[0].subscribe(move |outcome| {
                let _ = next.settle(outcome.clone().map(|v| v + 1));
            });
        }
        links[0].complete(0).expect("complete");
        assert_eq!(links[DEPTH].get_now().expect("settled").expect("value"), DEPTH);
    }

    #[test]
    fn nested_completion_runs_after_the_current_batch() {
        let outer = Promise::<i32>::new();
        let nested = Promise::<i32>::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&order);
        nested.subscribe(move |_| seen.lock().push("nested"));
        let inner = nested.clone();
        let seen = Arc::clone(&order);
        outer.subscribe(move |_| {
            inner.complete(2).expect("complete nested");
            assert!(inner.is_done(), "value is recorded immediately");
            seen.lock().push("first");
        });
        let seen = Arc::clone(&order);
        outer.subscribe(move |_| seen.lock().push("second"));

        outer.complete(1).expect("complete outer");
        assert_eq!(*order.lock(), vec!["first", "second", "nested"]);
    }

    #[test]
    fn panic_in_nested_batch_resurfaces_at_outermost_settler() {
        let outer = Promise::<i32>::new();
        let nested = Promise::<i32>::new();
        let (tx, rx) = mpsc::channel();
        nested.subscribe(|_| panic!("nested observer failure"));
        let after = tx.clone();
        nested.subscribe(move |_| after.send("nested").expect("send"));
        let inner = nested.clone();
        outer.subscribe(move |_| inner.complete(2).expect("complete nested"));
        outer.subscribe(move |_| tx.send("outer").expect("send"));

        let completer = outer.clone();
        let result = catch_unwind(AssertUnwindSafe(|| completer.complete(1)));
        assert!(result.is_err());
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["outer", "nested"]);

        // The thread is usable again once the drain unwinds.
        let later = Promise::<i32>::new();
        let (tx, rx) = mpsc::channel();
        later.subscribe(move |outcome| tx.send(outcome.clone()).expect("send"));
        later.complete(5).expect("complete");
        assert_eq!(rx.try_recv().expect("ran inline").expect("value"), 5);
    }

    #[test]
    fn panicking_observer_does_not_starve_the_others() {
        let promise = Promise::<i32>::new();
        let (tx, rx) = mpsc::channel();
        promise.subscribe(|_| panic!("observer failure"));
        promise.subscribe(move |outcome| tx.send(outcome.clone()).expect("send"));

        let completer = promise.clone();
        let result = catch_unwind(AssertUnwindSafe(|| completer.complete(9)));
        assert!(result.is_err(), "panic resurfaces on the settling thread");
        assert_eq!(rx.recv().expect("second observer").expect("value"), 9);
        assert_eq!(promise.get_now().expect("settled").expect("value"), 9);
    }

    #[test]
    fn completion_from_another_thread_runs_observers_there() {
        let promise = Promise::<u8>::new();
        let (tx, rx) = mpsc::channel();
        promise.subscribe(move |_| {
            tx.send(std::thread::current().id()).expect("send");
        });

        let completer = promise.clone();
        let handle = std::thread::spawn(move || {
            completer.complete(1).expect("complete");
            std::thread::current().id()
        });
        let completing_thread = handle.join().expect("completer panicked");
        let observed = rx.recv_timeout(Duration::from_secs(5)).expect("observer");
        assert_eq!(observed, completing_thread);
    }

    #[test]
    fn debug_reports_state() {
        let promise = Promise::<i32>::new();
        assert!(format!("{promise:?}").contains("pending(0 observers)"));
        promise.complete_with_error(Error::cancelled()).expect("settle");
        assert!(format!("{promise:?}").contains("failed(cancelled)"));
    }
}
