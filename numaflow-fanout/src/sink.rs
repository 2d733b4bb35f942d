//! Result sinks receive the outcome of every completed invocation from the
//! [Scheduler](crate::scheduler::Scheduler). The [OrderedBuffer] keeps results addressed by the
//! position of their item (collecting mode), the [CompletionChannel] hands them out in completion
//! order (streaming mode) and optionally discards them.

use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, ready};

use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{Error, Result};

/// ResultSink is written to only by the driving task of a run, so implementations need no
/// synchronization of their own.
pub(crate) trait ResultSink<R>: Send {
    /// Delivers the result of the invocation of the item at `position`.
    fn deliver(&mut self, position: usize, result: R);

    /// Called once, with the first captured failure. Results delivered afterward are dropped.
    fn fail(&mut self, error: &Error);
}

/// Pre-sized buffer with one slot per input position.
pub(crate) struct OrderedBuffer<R> {
    slots: Vec<Option<R>>,
    failed: bool,
}

impl<R> OrderedBuffer<R> {
    pub(crate) fn new(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || None);
        Self {
            slots,
            failed: false,
        }
    }

    /// Returns the results in input order. Only meaningful once the run is done.
    pub(crate) fn into_results(self) -> Result<Vec<R>> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.ok_or_else(|| Error::Task(format!("no result for item at position {position}")))
            })
            .collect()
    }
}

impl<R: Send> ResultSink<R> for OrderedBuffer<R> {
    fn deliver(&mut self, position: usize, result: R) {
        if self.failed {
            return;
        }
        match self.slots.get_mut(position) {
            Some(slot) => *slot = Some(result),
            None => warn!(position, "Result for an unknown position, dropping it"),
        }
    }

    fn fail(&mut self, _error: &Error) {
        self.failed = true;
        self.slots.clear();
    }
}

/// Creates the two halves of the streaming result sink.
pub(crate) fn completion_channel<R>(
    discard_results: bool,
) -> (CompletionChannel<R>, CompletionReceiver<R>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let failure = Arc::new(OnceLock::new());
    (
        CompletionChannel {
            tx,
            failure: Arc::clone(&failure),
            discard_results,
        },
        CompletionReceiver {
            rx,
            failure,
            terminated: false,
        },
    )
}

/// Sending half of the streaming sink. It is unbounded so the consumer may wait for the run to
/// finish before it starts pulling results.
pub(crate) struct CompletionChannel<R> {
    tx: mpsc::UnboundedSender<Result<R>>,
    failure: Arc<OnceLock<Error>>,
    discard_results: bool,
}

impl<R: Send> ResultSink<R> for CompletionChannel<R> {
    fn deliver(&mut self, _position: usize, result: R) {
        if self.discard_results || self.failure.get().is_some() {
            return;
        }
        // the consumer may have dropped the stream, results are not needed anymore
        let _ = self.tx.send(Ok(result));
    }

    fn fail(&mut self, error: &Error) {
        if self.failure.set(error.clone()).is_ok() {
            // wakes up a consumer that is waiting on an empty channel
            let _ = self.tx.send(Err(error.clone()));
        }
    }
}

/// Receiving half of the streaming sink. A captured failure is reported ahead of any results still
/// buffered, after which the stream ends.
pub(crate) struct CompletionReceiver<R> {
    rx: mpsc::UnboundedReceiver<Result<R>>,
    failure: Arc<OnceLock<Error>>,
    terminated: bool,
}

impl<R> CompletionReceiver<R> {
    pub(crate) fn poll_next(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<R>>> {
        if self.terminated {
            return Poll::Ready(None);
        }

        if let Some(error) = self.failure.get() {
            self.terminated = true;
            return Poll::Ready(Some(Err(error.clone())));
        }

        match ready!(self.rx.poll_recv(cx)) {
            Some(Ok(result)) => Poll::Ready(Some(Ok(result))),
            Some(Err(error)) => {
                self.terminated = true;
                Poll::Ready(Some(Err(error)))
            }
            None => {
                self.terminated = true;
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;

    use super::*;

    #[test]
    fn test_ordered_buffer_keeps_input_order() {
        let mut buffer = OrderedBuffer::new(4);
        buffer.deliver(2, "c");
        buffer.deliver(0, "a");
        buffer.deliver(3, "d");
        buffer.deliver(1, "b");
        // out of range positions are ignored
        buffer.deliver(9, "z");
        assert_eq!(buffer.into_results().unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_ordered_buffer_missing_slot() {
        let mut buffer = OrderedBuffer::new(2);
        buffer.deliver(0, 1);
        assert!(matches!(buffer.into_results(), Err(Error::Task(_))));

        let buffer = OrderedBuffer::<u8>::new(0);
        assert!(buffer.into_results().unwrap().is_empty());
    }

    #[test]
    fn test_ordered_buffer_discards_after_failure() {
        let mut buffer = OrderedBuffer::new(3);
        buffer.deliver(0, 1);
        buffer.fail(&Error::operation("boom"));
        buffer.deliver(1, 2);
        assert!(buffer.slots.is_empty());
    }

    #[tokio::test]
    async fn test_completion_channel_delivers_in_completion_order() {
        let (mut sink, mut rx) = completion_channel(false);
        sink.deliver(3, "late item, first done");
        sink.deliver(0, "first item");
        drop(sink);

        let first = poll_fn(|cx| rx.poll_next(cx)).await.unwrap().unwrap();
        let second = poll_fn(|cx| rx.poll_next(cx)).await.unwrap().unwrap();
        assert_eq!(first, "late item, first done");
        assert_eq!(second, "first item");
        assert!(poll_fn(|cx| rx.poll_next(cx)).await.is_none());
    }

    #[tokio::test]
    async fn test_completion_channel_discard() {
        let (mut sink, mut rx) = completion_channel(true);
        sink.deliver(0, 1);
        sink.deliver(1, 2);
        drop(sink);
        assert!(poll_fn(|cx| rx.poll_next(cx)).await.is_none());
    }

    #[tokio::test]
    async fn test_completion_channel_failure_preempts_buffered_results() {
        let (mut sink, mut rx) = completion_channel(false);
        sink.deliver(0, 1);
        sink.fail(&Error::operation("first"));
        // only the first failure is kept, later results are dropped
        sink.fail(&Error::operation("second"));
        sink.deliver(1, 2);

        let err = poll_fn(|cx| rx.poll_next(cx)).await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Operation Error - first");
        assert!(poll_fn(|cx| rx.poll_next(cx)).await.is_none());
        assert!(poll_fn(|cx| rx.poll_next(cx)).await.is_none());
    }

    #[tokio::test]
    async fn test_completion_channel_failure_wakes_waiting_consumer() {
        let (mut sink, mut rx) = completion_channel::<u32>(true);
        let consumer = tokio::spawn(async move { poll_fn(|cx| rx.poll_next(cx)).await });
        tokio::task::yield_now().await;
        sink.fail(&Error::Task("panicked".into()));

        let outcome = consumer.await.unwrap();
        assert!(matches!(outcome, Some(Err(Error::Task(_)))));
    }
}
