#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use affinity_runtime::runtime::{current_worker_id, EventLoop, EventLoopConfig, WorkerId, WorkerRef};
use affinity_runtime::{Result, Stage};
use parking_lot::Mutex;
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::sync::{mpsc, Arc, Once};
use std::time::Duration;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "AFFINITY_PROPTEST_SEED";
const PROPTEST_MAX_SHRINK_ITERS_ENV: &str = "AFFINITY_PROPTEST_MAX_SHRINK_ITERS";

/// How long blocking helpers wait before failing a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Configuration for property tests with optional deterministic seed support.
#[derive(Debug, Clone)]
pub struct PropertyTestConfig {
    /// Fixed seed for reproducibility (overrides CI default when set).
    pub seed: Option<u64>,
    /// Number of successful cases required.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl PropertyTestConfig {
    /// Build a config with defaults for property tests.
    #[must_use]
    pub fn new(cases: u32) -> Self {
        Self {
            seed: read_proptest_seed(),
            cases,
            max_shrink_iters: read_max_shrink_iters()
                .unwrap_or(ProptestConfig::default().max_shrink_iters),
        }
    }

    /// Convert into a ProptestConfig, applying deterministic seed rules.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        let mut config = ProptestConfig::with_cases(self.cases);

        // Honor existing PROPTEST_RNG_SEED, otherwise apply our own.
        if matches!(config.rng_seed, RngSeed::Random) {
            if let Some(seed) = self.seed {
                config.rng_seed = RngSeed::Fixed(seed);
            }
        }

        config.max_shrink_iters = self.max_shrink_iters;
        config
    }
}

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    PropertyTestConfig::new(cases).to_proptest_config()
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }

    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }

    None
}

fn read_max_shrink_iters() -> Option<u32> {
    std::env::var(PROPTEST_MAX_SHRINK_ITERS_ENV)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
}

/// Initialize test logging with trace-level output.
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

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log test completion.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully");
    };
}

/// Spawns an event loop and returns it with a type-erased handle.
pub fn spawn_worker(name: &str) -> (Arc<EventLoop>, WorkerRef) {
    init_test_logging();
    let config = EventLoopConfig::default().shutdown_timeout(WAIT);
    let event_loop = Arc::new(EventLoop::with_name(name, &config).expect("spawn event loop"));
    let worker: WorkerRef = event_loop.clone();
    (event_loop, worker)
}

/// Blocks until `stage` settles and returns its outcome.
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
        .expect("submit");
    rx.recv_timeout(WAIT).expect("worker task did not run in time")
}

/// Runs `f` on a fresh OS thread that is not any worker, and joins it.
pub fn run_on_foreign<R: Send + 'static>(f: impl FnOnce() -> R + Send + 'static) -> R {
    std::thread::Builder::new()
        .name("foreign".into())
        .spawn(move || {
            assert_eq!(current_worker_id(), None);
            f()
        })
        .expect("spawn foreign thread")
        .join()
        .expect("foreign thread panicked")
}

/// Records which worker each labelled continuation body ran on.
#[derive(Clone, Default)]
pub struct Probe {
    hits: Arc<Mutex<Vec<(&'static str, Option<WorkerId>)>>>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the body labelled `label` is running now.
    pub fn hit(&self, label: &'static str) {
        self.hits.lock().push((label, current_worker_id()));
    }

    /// Labels in hit order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.hits.lock().iter().map(|(label, _)| *label).collect()
    }

    /// Number of times `label` was hit.
    pub fn count(&self, label: &str) -> usize {
        self.hits.lock().iter().filter(|(l, _)| *l == label).count()
    }

    /// Panics unless every recorded body ran on `worker`.
    pub fn assert_all_on(&self, worker: &WorkerRef) {
        for (label, ran_on) in self.hits.lock().iter() {
            assert_eq!(
                *ran_on,
                Some(worker.id()),
                "continuation `{label}` ran off its worker"
            );
        }
    }
}
