//! Worker-bound futures.
//!
//! - [`promise`]: [`Promise`], the unbound completion slot
//! - [`stage`]: the [`Stage`] trait shared by everything below
//! - [`affinity`]: [`AffinityFuture`] and its combinators
//! - [`adopt`](mod@adopt): the adoption bridge onto a worker
//! - [`view`]: [`StageView`], the read-only continuation surface
//! - [`listen`]: [`Listen`], for `.await`ing any of the above
//!
//! # Example
//!
//! ```ignore
//! use affinity_runtime::future::AffinityFuture;
//!
//! let request = AffinityFuture::<Vec<u8>>::new(worker.clone());
//! let published = request
//!     .then_apply(|bytes| bytes.len())
//!     .minimal_stage();
//!
//! // Any thread may complete it; the continuation still runs on `worker`.
//! request.complete(vec![0; 16])?;
//! ```

pub mod adopt;
pub mod affinity;
pub mod listen;
pub mod promise;
pub mod stage;
pub mod view;

pub use adopt::adopt;
pub use affinity::AffinityFuture;
pub use listen::Listen;
pub use promise::Promise;
pub use stage::{Observer, Stage};
pub use view::StageView;
