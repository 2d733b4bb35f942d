//! Streaming mode: results are handed out as invocations complete. The source may be a finite
//! sequence, in which case the stream ends once every item is processed, or a queue the caller
//! keeps feeding, in which case the run ends when it is cancelled or every producer is gone. The
//! run only takes the items it launches, a queue outlives the run along with whatever is left in
//! it.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::invoker::{Invoker, Operation};
use crate::scheduler::Scheduler;
use crate::sink::{CompletionReceiver, completion_channel};
use crate::source::{QueueSource, Source};

/// Runs `operation` against every item of `source`, at most `config.concurrency` at a time. The
/// returned [EachHandle] is a [Stream] of the results in completion order. With
/// `config.discard_results` the stream stays empty and only [EachHandle::count_processed] moves.
/// Must be called from within a tokio runtime.
pub fn each<T, R>(
    source: impl Into<Source<T>>,
    operation: Operation<T, R>,
    config: Config,
) -> EachHandle<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    let source = source.into();
    let queue = match &source {
        Source::Queue(queue) => Some(queue.clone()),
        Source::Sequence(_) => None,
    };
    let processed = Arc::new(AtomicUsize::new(0));
    let cln_token = config.run_token();
    let (mut sink, receiver) = completion_channel(config.discard_results);
    let scheduler = Scheduler::new(
        source,
        Invoker::new(operation, config.offload),
        config.concurrency,
        Arc::clone(&processed),
        cln_token.clone(),
    );

    let handle = tokio::spawn(async move { scheduler.run(&mut sink).await.map(|_| ()) });

    EachHandle {
        receiver,
        handle,
        queue,
        outcome: None,
        processed,
        _drop_guard: cln_token.clone().drop_guard(),
        cln_token,
    }
}

/// Handle to a running `each`. Dropping it cancels the run.
pub struct EachHandle<T, R> {
    receiver: CompletionReceiver<R>,
    handle: JoinHandle<Result<()>>,
    /// the queue items are taken from, kept so it outlives the run
    queue: Option<QueueSource<T>>,
    /// outcome of the driving task once it has been joined
    outcome: Option<Result<()>>,
    processed: Arc<AtomicUsize>,
    cln_token: CancellationToken,
    _drop_guard: DropGuard,
}

impl<T, R> EachHandle<T, R> {
    /// Waits for all the scheduled work to finish and returns the first captured failure, if any.
    /// A cancelled run finishes successfully. It can be called any number of times.
    pub async fn wait(&mut self) -> Result<()> {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let outcome = match (&mut self.handle).await {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::Task(format!("each driving task failed: {e}"))),
        };
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// Number of invocations that completed successfully so far.
    pub fn count_processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    /// Stops the driving loop, no more items are taken from the source. Invocations already
    /// running are not aborted.
    pub fn cancel(&self) {
        self.cln_token.cancel();
    }

    /// Token that cancels this run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cln_token.clone()
    }

    /// The queue the run takes its items from, `None` when the source is a sequence. Producers can
    /// keep sending for as long as the handle is alive, and items the run has not taken can be
    /// received from here once it is cancelled.
    pub fn queue(&self) -> Option<&QueueSource<T>> {
        self.queue.as_ref()
    }

    /// Cancels the run and hands back its queue along with the items it has not taken.
    pub fn into_queue(self) -> Option<QueueSource<T>> {
        self.cln_token.cancel();
        self.queue
    }
}

impl<T, R> Unpin for EachHandle<T, R> {}

impl<T, R> Stream for EachHandle<T, R> {
    type Item = Result<R>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_next(cx)
    }
}
