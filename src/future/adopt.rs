//! The adoption bridge.
//!
//! [`adopt`] turns any [`Stage`] into an [`AffinityFuture`] bound to a given
//! worker. The foreign stage is observed once. Its outcome is forwarded into
//! the new future by the worker itself: inline if the foreign stage settles
//! on the worker thread, otherwise as a queued task, so the forwarded
//! completion is ordered with everything already queued there.
//!
//! Cancellation does not flow back: cancelling the adopted future leaves the
//! foreign stage untouched.

use crate::future::affinity::{dispatch, AffinityFuture, Dispatch};
use crate::future::stage::{BoundFuture, Stage};
use crate::runtime::worker::WorkerRef;
use crate::tracing_compat::trace;
use std::sync::Arc;

/// Binds `stage` to `worker`.
///
/// An [`AffinityFuture`] already bound to `worker` is returned as is.
/// Anything else, including a future bound to a different worker or a
/// read-only [`StageView`], gets a fresh future that mirrors its outcome.
///
/// [`StageView`]: crate::future::StageView
pub fn adopt<T, S>(stage: &S, worker: &WorkerRef) -> AffinityFuture<T>
where
    T: Clone + Send + 'static,
    S: Stage<T> + ?Sized,
{
    if let Some(BoundFuture(existing)) = stage.bound_future() {
        if existing.worker().id() == worker.id() {
            return existing;
        }
    }

    trace!(worker = %worker.id(), "adopting foreign stage");
    let adopted = AffinityFuture::new(Arc::clone(worker));
    let target = adopted.clone();
    let worker = Arc::clone(worker);
    stage.observe(Box::new(move |outcome| {
        let outcome = outcome.clone();
        let rejected = target.clone();
        dispatch(
            &worker,
            Dispatch::Affine,
            move || {
                let _ = target.settle(outcome);
            },
            move |err| {
                let _ = rejected.settle(Err(err));
            },
        );
    }));
    adopted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use crate::future::promise::Promise;
    use crate::runtime::worker::current_worker_id;
    use crate::test_utils::{await_outcome, run_on, test_worker_ref, WAIT};
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn same_worker_future_is_returned_unchanged() {
        let (_loop, worker) = test_worker_ref("adopt-same");
        let original = AffinityFuture::<i32>::new(Arc::clone(&worker));
        let adopted = adopt(&original, &worker);

        adopted.complete(1).expect("shared slot");
        assert_eq!(original.get_now().expect("same future").expect("value"), 1);
    }

    #[test]
    fn future_on_other_worker_is_rewrapped() {
        let (_a_loop, a) = test_worker_ref("adopt-a");
        let (_b_loop, b) = test_worker_ref("adopt-b");
        let on_a = AffinityFuture::<i32>::new(Arc::clone(&a));
        let on_b = adopt(&on_a, &b);

        assert_eq!(on_b.worker().id(), b.id());
        assert!(!on_b.is_done());
        on_a.complete(4).expect("complete");
        assert_eq!(await_outcome(&on_b).expect("value"), 4);
    }

    #[test]
    fn foreign_completion_is_forwarded_on_worker() {
        let (_loop, worker) = test_worker_ref("adopt-foreign");
        let foreign = Promise::<String>::new();
        let adopted = adopt(&foreign, &worker);

        let (tx, rx) = mpsc::channel();
        adopted
            .minimal_stage()
            .then_accept(move |v| tx.send((v, current_worker_id())).expect("send"));

        let f = foreign.clone();
        thread::spawn(move || f.complete("payload".to_string()).expect("complete"))
            .join()
            .expect("foreign thread panicked");

        let (value, ran_on) = rx.recv_timeout(WAIT).expect("dependent ran");
        assert_eq!(value, "payload");
        assert_eq!(ran_on, Some(worker.id()));
    }

    #[test]
    fn forwarded_error_is_identical() {
        let (_loop, worker) = test_worker_ref("adopt-error");
        let source_err = Error::user("backend gone").with_source(std::io::Error::other("reset"));
        let foreign = Promise::<u8>::failed(source_err.clone());

        let adopted = adopt(&foreign, &worker);
        let err = await_outcome(&adopted).expect_err("error forwarded");
        assert!(err.same_as(&source_err));
    }

    #[test]
    fn completion_on_the_worker_settles_inline() {
        let (_loop, worker) = test_worker_ref("adopt-inline");
        let foreign = Promise::<i32>::new();
        let adopted = adopt(&foreign, &worker);

        let settled_inline = run_on(&worker, move || {
            foreign.complete(8).expect("complete");
            adopted.is_done()
        });
        assert!(settled_inline);
    }

    #[test]
    fn cancelling_adopted_future_leaves_foreign_alone() {
        let (_loop, worker) = test_worker_ref("adopt-cancel");
        let foreign = Promise::<i32>::new();
        let adopted = adopt(&foreign, &worker);

        assert!(adopted.cancel());
        assert!(!foreign.is_done());
        foreign.complete(1).expect("foreign still completes");
        assert!(adopted.is_cancelled());
    }

    #[test]
    fn adopting_a_view_never_yields_its_completable_future() {
        let (_loop, worker) = test_worker_ref("adopt-view");
        let source = AffinityFuture::<i32>::new(Arc::clone(&worker));
        let view = source.minimal_stage();
        assert!(view.bound_future().is_none());

        let adopted = adopt(&view, &worker);
        assert!(adopted.complete(99).is_ok(), "adopted future has its own slot");
        assert!(!source.is_done());

        let mirrored = adopt(&source.minimal_stage(), &worker);
        source.complete(4).expect("complete");
        assert_eq!(await_outcome(&mirrored).expect("value"), 4);
    }

    #[test]
    fn rejected_forward_fails_adopted_future() {
        let (event_loop, worker) = test_worker_ref("adopt-shut");
        let foreign = Promise::<i32>::new();
        let adopted = adopt(&foreign, &worker);

        assert!(event_loop.shutdown_and_wait(WAIT));
        foreign.complete(2).expect("complete");
        let err = adopted.get_now().expect("settled").expect_err("rejected");
        assert_eq!(err.kind(), ErrorKind::WorkerShutdown);
    }
}
