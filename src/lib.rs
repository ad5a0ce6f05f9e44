//! Affinity-preserving futures for per-connection event loops.
//!
//! # Overview
//!
//! A proxy connection's state (buffers, filter context, backpressure
//! counters) is owned by exactly one worker thread and is never locked.
//! This crate supplies the future type every filter and I/O callback uses to
//! schedule continuations without breaking that ownership: no matter which
//! thread completes a future, its continuations run on the connection's
//! worker.
//!
//! # Core Guarantees
//!
//! - **Affinity**: every continuation body runs on the future's bound worker
//! - **Transitivity**: every derived future is bound to the same worker
//! - **Fast path**: a continuation that is already on its worker runs inline
//! - **Write once**: the first completion wins; later attempts are rejected
//! - **Contained failures**: a panicking continuation fails its derived future,
//!   never the worker
//!
//! # Module Structure
//!
//! - [`future`]: [`AffinityFuture`], [`Promise`], [`StageView`], [`adopt`]
//! - [`runtime`]: the [`Worker`] interface and the [`EventLoop`] worker
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod future;
pub mod runtime;

#[cfg(test)]
pub(crate) mod test_utils;
pub(crate) mod tracing_compat;

pub use error::{AlreadyCompleted, Error, ErrorCategory, ErrorKind, Result};
pub use future::{adopt, AffinityFuture, Listen, Promise, Stage, StageView};
pub use runtime::{EventLoop, EventLoopConfig, EventLoopGroup, Worker, WorkerId, WorkerRef};
