//! Single-threaded event loops.
//!
//! An [`EventLoop`] is one dedicated OS thread draining a FIFO task queue. It
//! is the concrete [`Worker`] the proxy binds each connection to: every task
//! submitted to a loop runs on that loop's thread, in submission order, one
//! at a time. Nothing else ever touches the connection state the loop owns,
//! so that state needs no locks.
//!
//! # Lifecycle
//!
//! ```text
//!   new() ──► running ──shutdown()──► draining ──queue empty──► terminated
//!               │                        │
//!           submit() ok            submit() rejected
//! ```
//!
//! Shutdown is graceful: tasks already queued still run, new submissions are
//! rejected with `ErrorKind::WorkerShutdown`.
//!
//! A panicking task is caught and logged; the loop keeps serving the rest of
//! its queue.
//!
//! [`EventLoopGroup`] owns a fixed set of loops and hands them out
//! round-robin, one per new connection.

use crate::error::{panic_message, Error, ErrorKind, Result};
use crate::runtime::config::{EventLoopConfig, ThreadCallback};
use crate::runtime::worker::{
    current_worker_id, enter_worker_thread, exit_worker_thread, Task, Worker, WorkerId, WorkerRef,
};
use crate::tracing_compat::{debug, error, info, warn};
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A single-threaded FIFO worker.
pub struct EventLoop {
    inner: Arc<EventLoopInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

struct EventLoopInner {
    /// Identity used for affinity checks.
    id: WorkerId,
    /// Thread name.
    name: String,
    /// Pending tasks, FIFO.
    queue: SegQueue<Task>,
    /// Number of tasks in `queue`.
    pending: AtomicUsize,
    /// Number of tasks run so far, including ones that panicked.
    executed: AtomicU64,
    /// Set once by `shutdown()`.
    shutdown: AtomicBool,
    /// Set by the loop thread on exit.
    terminated: AtomicBool,
    /// Serializes enqueue against the loop's park/exit decision.
    mutex: Mutex<()>,
    /// Wakes the parked loop thread.
    condvar: Condvar,
    on_thread_start: Option<ThreadCallback>,
    on_thread_stop: Option<ThreadCallback>,
}

impl EventLoop {
    /// Starts a loop named `{thread_name_prefix}-{worker id}`.
    pub fn new(config: &EventLoopConfig) -> Result<Self> {
        let id = WorkerId::next();
        let name = format!("{}-{}", config.thread_name_prefix, id.as_u64());
        Self::spawn(id, name, config)
    }

    /// Starts a loop with an explicit thread name.
    pub fn with_name(name: impl Into<String>, config: &EventLoopConfig) -> Result<Self> {
        Self::spawn(WorkerId::next(), name.into(), config)
    }

    fn spawn(id: WorkerId, name: String, config: &EventLoopConfig) -> Result<Self> {
        let inner = Arc::new(EventLoopInner {
            id,
            name: name.clone(),
            queue: SegQueue::new(),
            pending: AtomicUsize::new(0),
            executed: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            on_thread_start: config.on_thread_start.clone(),
            on_thread_stop: config.on_thread_stop.clone(),
        });

        let loop_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                enter_worker_thread(loop_inner.id);
                if let Some(ref callback) = loop_inner.on_thread_start {
                    callback();
                }
                debug!(worker = %loop_inner.id, name = %loop_inner.name, "event loop started");

                event_loop_main(&loop_inner);

                if let Some(ref callback) = loop_inner.on_thread_stop {
                    callback();
                }
                debug!(
                    worker = %loop_inner.id,
                    executed = loop_inner.executed.load(Ordering::Relaxed),
                    "event loop stopped"
                );
                exit_worker_thread();
                loop_inner.terminated.store(true, Ordering::Release);
            })
            .map_err(|e| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to spawn event loop thread")
                    .with_source(e)
            })?;

        Ok(Self {
            inner,
            thread: Mutex::new(Some(handle)),
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Returns the loop's thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the number of queued tasks not yet started.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.load(Ordering::Relaxed)
    }

    /// Returns the number of tasks run so far.
    #[must_use]
    pub fn executed_count(&self) -> u64 {
        self.inner.executed.load(Ordering::Relaxed)
    }

    /// Returns `true` once `shutdown()` has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Returns `true` once the loop thread has exited.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    /// Stops accepting tasks. Already-queued tasks still run.
    pub fn shutdown(&self) {
        let guard = self.inner.mutex.lock();
        let already = self.inner.shutdown.swap(true, Ordering::AcqRel);
        self.inner.condvar.notify_all();
        drop(guard);
        if !already {
            info!(
                worker = %self.inner.id,
                pending = self.pending_count(),
                "event loop shutting down"
            );
        }
    }

    /// Shuts down and waits for the loop thread to drain and exit.
    ///
    /// Returns `true` if the thread exited within `timeout`. Called from the
    /// loop's own thread it only requests shutdown and returns `false`.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        if self.is_current() {
            return false;
        }

        let deadline = Instant::now() + timeout;
        while !self.is_terminated() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            thread::sleep(Duration::from_millis(1).min(remaining));
        }

        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        true
    }
}

impl EventLoopInner {
    fn submit(&self, task: Task) -> Result<()> {
        let guard = self.mutex.lock();
        if self.shutdown.load(Ordering::Acquire) {
            drop(guard);
            warn!(worker = %self.id, "task rejected: event loop is shut down");
            return Err(Error::worker_shutdown().with_message(format!("{} rejected task", self.id)));
        }
        self.queue.push(task);
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.condvar.notify_one();
        drop(guard);
        Ok(())
    }
}

impl Worker for EventLoop {
    fn id(&self) -> WorkerId {
        self.inner.id
    }

    fn submit(&self, task: Task) -> Result<()> {
        self.inner.submit(task)
    }

    fn is_current(&self) -> bool {
        current_worker_id() == Some(self.inner.id)
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if !self.shutdown_and_wait(self.shutdown_timeout) && !self.is_current() {
            warn!(
                worker = %self.inner.id,
                timeout_ms = self.shutdown_timeout.as_millis(),
                "event loop did not drain before shutdown timeout"
            );
        }
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("pending", &self.pending_count())
            .field("executed", &self.executed_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// The loop thread body: run tasks in FIFO order, park when idle, exit once
/// shut down and drained.
fn event_loop_main(inner: &EventLoopInner) {
    loop {
        if let Some(task) = inner.queue.pop() {
            inner.pending.fetch_sub(1, Ordering::Relaxed);
            run_task(inner, task);
            continue;
        }

        let mut guard = inner.mutex.lock();
        if !inner.queue.is_empty() {
            continue;
        }
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        inner.condvar.wait(&mut guard);
    }
}

fn run_task(inner: &EventLoopInner, task: Task) {
    let result = catch_unwind(AssertUnwindSafe(task));
    inner.executed.fetch_add(1, Ordering::Relaxed);
    if let Err(payload) = result {
        let message = panic_message(&payload);
        error!(worker = %inner.id, panic = %message, "task panicked on event loop");
    }
}

/// A fixed set of event loops handed out round-robin.
///
/// The proxy takes one loop per accepted connection and keeps it for the
/// connection's lifetime.
pub struct EventLoopGroup {
    loops: Vec<Arc<EventLoop>>,
    next: AtomicUsize,
}

impl EventLoopGroup {
    /// Starts `config.event_loops` loops named `{thread_name_prefix}-{index}`.
    pub fn new(config: &EventLoopConfig) -> Result<Self> {
        config.validate()?;
        let loops = (0..config.event_loops)
            .map(|index| {
                EventLoop::with_name(format!("{}-{index}", config.thread_name_prefix), config)
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(loops = loops.len(), "event loop group started");
        Ok(Self {
            loops,
            next: AtomicUsize::new(0),
        })
    }

    /// Returns the next loop in round-robin order.
    #[must_use]
    pub fn next(&self) -> WorkerRef {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        Arc::clone(&self.loops[index]) as WorkerRef
    }

    /// Returns loop `index`, if it exists.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<WorkerRef> {
        self.loops
            .get(index)
            .map(|event_loop| Arc::clone(event_loop) as WorkerRef)
    }

    /// Returns the number of loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Returns `true` if the group has no loops.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Shuts every loop down and waits for all of them, sharing one deadline.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        for event_loop in &self.loops {
            event_loop.shutdown();
        }
        let deadline = Instant::now() + timeout;
        self.loops.iter().all(|event_loop| {
            event_loop.shutdown_and_wait(deadline.saturating_duration_since(Instant::now()))
        })
    }
}

impl fmt::Debug for EventLoopGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopGroup")
            .field("loops", &self.loops.len())
            .finish()
    }
}
