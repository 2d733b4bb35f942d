//! Collecting mode: every item of a finite sequence is run through the operation and the results
//! are returned as one array in input order, or the whole run fails with the first failure.

use std::future::IntoFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::invoker::{Invoker, Operation};
use crate::scheduler::{Outcome, Scheduler};
use crate::sink::OrderedBuffer;
use crate::source::Source;

/// Runs `operation` against every item, at most `config.concurrency` at a time, and collects the
/// results in input order. The run starts right away on a spawned task, so this must be called
/// from within a tokio runtime. `config.discard_results` does not apply here.
pub fn map<T, R>(
    items: impl IntoIterator<Item = T>,
    operation: Operation<T, R>,
    config: Config,
) -> MapHandle<R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    let items: Vec<T> = items.into_iter().collect();
    let len = items.len();
    if config.discard_results {
        debug!("Results are always collected by map, ignoring discard_results");
    }

    let processed = Arc::new(AtomicUsize::new(0));
    let cln_token = config.run_token();
    let scheduler = Scheduler::new(
        Source::from(items),
        Invoker::new(operation, config.offload),
        config.concurrency,
        Arc::clone(&processed),
        cln_token.clone(),
    );

    let handle = tokio::spawn(async move {
        let mut buffer = OrderedBuffer::new(len);
        match scheduler.run(&mut buffer).await? {
            Outcome::Completed => buffer.into_results(),
            Outcome::Cancelled => Err(Error::Cancelled),
        }
    });

    MapHandle {
        handle,
        taken: false,
        processed,
        _drop_guard: cln_token.clone().drop_guard(),
        cln_token,
    }
}

/// Handle to a running `map`. Dropping it cancels the run.
pub struct MapHandle<R> {
    handle: JoinHandle<Result<Vec<R>>>,
    taken: bool,
    processed: Arc<AtomicUsize>,
    cln_token: CancellationToken,
    _drop_guard: DropGuard,
}

impl<R> MapHandle<R> {
    /// Waits for the run and returns the results in input order, or the first captured failure.
    /// The results can be taken only once.
    pub async fn results(&mut self) -> Result<Vec<R>> {
        if self.taken {
            return Err(Error::ResultsTaken);
        }
        let joined = (&mut self.handle).await;
        // the join handle must not be polled again, whatever the outcome
        self.taken = true;
        joined.map_err(|e| Error::Task(format!("map driving task failed: {e}")))?
    }

    /// Number of invocations that completed successfully so far.
    pub fn count_processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    /// Stops scheduling new invocations. Invocations already running are not aborted, `results`
    /// returns [Error::Cancelled].
    pub fn cancel(&self) {
        self.cln_token.cancel();
    }
}

impl<R: Send + 'static> IntoFuture for MapHandle<R> {
    type Output = Result<Vec<R>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(mut self) -> Self::IntoFuture {
        Box::pin(async move { self.results().await })
    }
}
