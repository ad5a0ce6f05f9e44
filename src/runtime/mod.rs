//! Owning workers.
//!
//! - [`worker`]: the [`Worker`] interface the future engine depends on
//! - [`event_loop`]: [`EventLoop`], a single-threaded FIFO worker, and
//!   [`EventLoopGroup`]
//! - [`config`]: [`EventLoopConfig`] with environment and file overrides
//!
//! # Quick Start
//!
//! ```ignore
//! use affinity_runtime::runtime::{EventLoopConfig, EventLoopGroup};
//!
//! let group = EventLoopGroup::new(&EventLoopConfig::from_env()?)?;
//! let worker = group.next(); // bind a new connection to this loop
//! ```
//!
//! ## Config File + Environment Overrides
//!
//! ```ignore
//! use affinity_runtime::runtime::EventLoopConfig;
//!
//! // Requires the `config-file` feature.
//! let mut config = EventLoopConfig::load("config/event-loops.toml".as_ref())?;
//! config.apply_env_overrides()?;
//! ```
//!
//! # Configuration Reference (Defaults)
//!
//! - `event_loops`: available parallelism (min 1). `AFFINITY_EVENT_LOOPS`.
//! - `thread_name_prefix`: `affinity-loop`. `AFFINITY_THREAD_NAME_PREFIX`.
//! - `shutdown_timeout`: 5 s, used when a loop is dropped. `AFFINITY_SHUTDOWN_TIMEOUT_MS`.
//! - `on_thread_start/stop`: lifecycle hooks run on each loop thread.

pub mod config;
pub mod event_loop;
pub mod worker;

pub use config::{ConfigError, EventLoopConfig, ThreadCallback};
pub use event_loop::{EventLoop, EventLoopGroup};
pub use worker::{current_worker_id, Task, Worker, WorkerId, WorkerRef};
