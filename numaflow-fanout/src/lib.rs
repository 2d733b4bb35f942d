//! Fanout drives a per-item operation over many items at once, capped at a maximum number of
//! simultaneously in-flight invocations. It is the substrate for "process N things at a time"
//! workflows over I/O-bound (or offloaded CPU-bound) work.
//!
//! There are two modes:
//! - [map] collects every result into one array that preserves input order, and fails the whole
//!   run with the first failure.
//! - [each] hands out results as invocations complete, from a finite sequence or from a queue the
//!   caller keeps feeding. Results can also be discarded so only completions are counted.
//!
//! ```no_run
//! use numaflow_fanout::{Concurrency, Config, Operation, each, map};
//! use futures::StreamExt;
//!
//! # async fn run() -> numaflow_fanout::Result<()> {
//! let fetch = Operation::from_async(|id: u32| async move { Ok::<_, std::io::Error>(id * 2) });
//! let config = Config::default().with_concurrency(Concurrency::bounded(8)?);
//!
//! let doubled = map(1..=100, fetch.clone(), config.clone()).await?;
//! assert_eq!(doubled[0], 2);
//!
//! let mut handle = each(vec![1, 2, 3], fetch, config);
//! while let Some(result) = handle.next().await {
//!     println!("completed {}", result?);
//! }
//! handle.wait().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Only the first failure of a run is ever reported. It stops new invocations from being launched
//! but never aborts the ones already running. Cancelling a run stops the driving loop, running
//! invocations are left to finish on their own.

mod error;
pub use crate::error::{BoxError, Error, Result};

/// Concurrency limit and run configuration, optionally loaded from the environment.
mod config;
pub use crate::config::{Concurrency, Config};

/// Where the items come from, a finite sequence or an unbounded queue.
mod source;
pub use crate::source::{QueueSource, SequenceSource, Source};

/// Uniform invocation of async, sync and offloaded operations.
mod invoker;
pub use crate::invoker::{OffloadPool, Operation};

/// The concurrency-limited control loop.
mod scheduler;

/// Ordered buffer and completion channel the results are delivered to.
mod sink;

mod each;
pub use crate::each::{EachHandle, each};

mod map;
pub use crate::map::{MapHandle, map};

#[cfg(test)]
mod test_utils;
