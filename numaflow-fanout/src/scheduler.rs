//! Scheduler is the control loop of a run. It keeps at most `limit` invocations outstanding,
//! launches a new one whenever capacity frees up and the [Source] may still have items, stops
//! launching on the first failure and knows when all the work is done.
//!
//! ```text
//!              capacity and items            first failure
//!   (Filling) <------------------> (Draining) ----------> (Failed)
//!       \                              |                      |
//!        `------------------------> (Done) <------------------'
//!          no invocations outstanding and nothing left to launch
//! ```
//!
//! Invocations are spawned as tokio tasks held in a [JoinSet]. Completions are joined by the single
//! driving task, which is the only writer of `processed`, the captured failure and the
//! [ResultSink]. Cancellation stops the driving loop, outstanding invocations are detached and left
//! to finish on their own.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::Concurrency;
use crate::error::{Error, Result};
use crate::invoker::Invoker;
use crate::sink::ResultSink;
use crate::source::{OutOfItems, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Capacity is available and the source may have more items.
    Filling,
    /// Waiting for an outstanding invocation to finish before launching more.
    Draining,
    /// A failure was captured, waiting only for outstanding invocations to unwind.
    Failed,
    Done,
}

/// How a run that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    Cancelled,
}

type Completion<R> = (usize, Result<R>);

pub(crate) struct Scheduler<T, R> {
    source: Source<T>,
    invoker: Arc<Invoker<T, R>>,
    limit: usize,
    tasks: JoinSet<Completion<R>>,
    processed: Arc<AtomicUsize>,
    /// first failure wins, it is never cleared
    failure: Option<Error>,
    cln_token: CancellationToken,
}

impl<T, R> Scheduler<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(
        source: Source<T>,
        invoker: Invoker<T, R>,
        concurrency: Concurrency,
        processed: Arc<AtomicUsize>,
        cln_token: CancellationToken,
    ) -> Self {
        let limit = concurrency.limit(source.len_hint());
        Self {
            source,
            invoker: Arc::new(invoker),
            limit,
            tasks: JoinSet::new(),
            processed,
            failure: None,
            cln_token,
        }
    }

    fn state(&self) -> State {
        if self.failure.is_some() {
            return if self.tasks.is_empty() {
                State::Done
            } else {
                State::Failed
            };
        }
        if self.tasks.len() < self.limit && self.source.has_next() {
            return State::Filling;
        }
        if self.tasks.is_empty() {
            State::Done
        } else {
            State::Draining
        }
    }

    /// Drives the run until the source is exhausted, a failure is captured or the run is
    /// cancelled. Returns the first captured failure, if any.
    pub(crate) async fn run<S: ResultSink<R>>(mut self, sink: &mut S) -> Result<Outcome> {
        if self.source.len_hint() == Some(0) {
            debug!("Source is empty, nothing to schedule");
            return Ok(Outcome::Completed);
        }

        let outcome = loop {
            match self.state() {
                State::Done => break Outcome::Completed,
                State::Filling => tokio::select! {
                    biased;
                    _ = self.cln_token.cancelled() => break Outcome::Cancelled,
                    Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                        self.complete(joined, sink);
                    },
                    next = self.source.next() => match next {
                        Ok((position, item)) => self.launch(position, item),
                        Err(OutOfItems) => trace!("Source has no more items"),
                    },
                },
                State::Draining | State::Failed => tokio::select! {
                    biased;
                    _ = self.cln_token.cancelled() => break Outcome::Cancelled,
                    Some(joined) = self.tasks.join_next() => self.complete(joined, sink),
                    else => break Outcome::Completed,
                },
            }
        };

        if outcome == Outcome::Cancelled {
            let detached = self.tasks.len();
            // detached tasks keep running, their results are dropped
            self.tasks.detach_all();
            info!(detached, "Run cancelled, stopped scheduling new invocations");
        }

        let processed = self.processed.load(Ordering::Relaxed);
        match self.failure {
            Some(error) => {
                info!(processed, ?error, "Run is completed with a failure");
                Err(error)
            }
            None => {
                info!(processed, ?outcome, "Run is completed");
                Ok(outcome)
            }
        }
    }

    fn launch(&mut self, position: usize, item: T) {
        let invoker = Arc::clone(&self.invoker);
        self.tasks
            .spawn(async move { (position, invoker.invoke(item).await) });
        trace!(position, pending = self.tasks.len(), "Launched invocation");
    }

    fn complete<S: ResultSink<R>>(
        &mut self,
        joined: std::result::Result<Completion<R>, JoinError>,
        sink: &mut S,
    ) {
        let completion = joined
            .map_err(|e| Error::Task(format!("invocation task failed: {e}")))
            .and_then(|(position, result)| result.map(|value| (position, value)));

        match completion {
            Ok((position, value)) => {
                let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(position, processed, "Invocation completed");
                sink.deliver(position, value);
            }
            Err(error) => self.record_failure(error, sink),
        }
    }

    fn record_failure<S: ResultSink<R>>(&mut self, error: Error, sink: &mut S) {
        if let Some(first) = &self.failure {
            warn!(?error, first = ?first, "Dropping failure, a failure was already captured");
            return;
        }
        error!(
            ?error,
            pending = self.tasks.len(),
            "Invocation failed, no more invocations will be launched"
        );
        sink.fail(&error);
        self.failure = Some(error);
    }
}
