//! Test utilities shared by the unit tests.
//!
//! - Tracing-based logging initialization
//! - Event loop constructors
//! - Blocking helpers that wait for a stage with a timeout
//! - [`AffinityProbe`] for recording where continuation bodies ran

use crate::error::Result;
use crate::future::stage::Stage;
use crate::runtime::config::EventLoopConfig;
use crate::runtime::event_loop::EventLoop;
use crate::runtime::worker::{current_worker_id, WorkerId, WorkerRef};
use parking_lot::Mutex;
use std::sync::{mpsc, Arc, Once};
use std::time::Duration;

static INIT_LOGGING: Once = Once::new();

/// How long blocking helpers wait before failing a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_thread_names(true)
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Spawns a single event loop with test-friendly settings.
pub fn test_worker(name: &str) -> Arc<EventLoop> {
    init_test_logging();
    let config = EventLoopConfig::default().shutdown_timeout(WAIT);
    Arc::new(EventLoop::with_name(name, &config).expect("spawn test event loop"))
}

/// Same as [`test_worker`], as a [`WorkerRef`].
pub fn test_worker_ref(name: &str) -> (Arc<EventLoop>, WorkerRef) {
    let event_loop = test_worker(name);
    let worker: WorkerRef = event_loop.clone();
    (event_loop, worker)
}

/// Blocks until `stage` settles and returns its outcome.
///
/// Panics if nothing arrives within [`WAIT`].
pub fn await_outcome<T: Clone + Send + 'static>(stage: &impl Stage<T>) -> Result<T> {
    let (tx, rx) = mpsc::channel();
    stage.observe(Box::new(move |outcome| {
        let _ = tx.send(outcome.clone());
    }));
    rx.recv_timeout(WAIT).expect("stage did not settle in time")
}

/// Runs `f` on `worker` and blocks for its result.
pub fn run_on<R: Send + 'static>(worker: &WorkerRef, f: impl FnOnce() -> R + Send + 'static) -> R {
    let (tx, rx) = mpsc::channel();
    worker
        .submit(Box::new(move || {
            let _ = tx.send(f());
        }))
        .expect("submit to test worker");
    rx.recv_timeout(WAIT).expect("worker task did not run in time")
}

/// Blocks until every task queued on `worker` before this call has run.
pub fn drain(worker: &WorkerRef) {
    run_on(worker, || ());
}

/// Records which worker (if any) each labelled continuation body ran on.
#[derive(Clone, Default)]
pub struct AffinityProbe {
    hits: Arc<Mutex<Vec<(&'static str, Option<WorkerId>)>>>,
}

impl AffinityProbe {
    /// Creates an empty probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the body labelled `label` is running now.
    pub fn hit(&self, label: &'static str) {
        self.hits.lock().push((label, current_worker_id()));
    }

    /// Labels in the order they were hit.
    pub fn labels(&self) -> Vec<&'static str> {
        self.hits.lock().iter().map(|(label, _)| *label).collect()
    }

    /// Panics unless every recorded body ran on `worker`.
    pub fn assert_all_on(&self, worker: &WorkerRef) {
        let hits = self.hits.lock();
        for (label, ran_on) in hits.iter() {
            assert_eq!(
                *ran_on,
                Some(worker.id()),
                "continuation `{label}` ran off its worker"
            );
        }
    }
}
