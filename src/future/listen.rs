//! `std::future::Future` adapter.
//!
//! [`Listen`] lets async code `.await` a promise, an affinity future or a
//! view. The first poll registers a waker slot as an observer; later polls
//! only refresh the stored waker.

use crate::error::Result;
use crate::future::promise::Promise;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Resolves to the outcome of a stage.
#[must_use = "futures do nothing unless polled"]
pub struct Listen<T> {
    promise: Promise<T>,
    waker: Option<Arc<Mutex<Option<Waker>>>>,
}

impl<T: Clone + Send + 'static> Listen<T> {
    pub(crate) fn new(promise: Promise<T>) -> Self {
        Self {
            promise,
            waker: None,
        }
    }
}

impl<T: Clone + Send + 'static> Future for Listen<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = this.promise.get_now() {
            return Poll::Ready(outcome);
        }

        if let Some(slot) = &this.waker {
            let mut stored = slot.lock();
            if !stored.as_ref().is_some_and(|w| w.will_wake(cx.waker())) {
                *stored = Some(cx.waker().clone());
            }
        } else {
            let slot = Arc::new(Mutex::new(Some(cx.waker().clone())));
            let notify = Arc::clone(&slot);
            this.promise.subscribe(move |_| {
                let waker = notify.lock().take();
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
            this.waker = Some(slot);
        }

        // The promise may have settled between the first check and the
        // waker being stored.
        this.promise.get_now().map_or(Poll::Pending, Poll::Ready)
    }
}

impl<T> std::fmt::Debug for Listen<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listen")
            .field("promise", &self.promise)
            .field("registered", &self.waker.is_some())
            .finish()
    }
}
