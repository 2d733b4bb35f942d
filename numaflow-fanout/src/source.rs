//! Source is where the next item of a run comes from. It is either a finite [SequenceSource] whose
//! length is known up front, or an unbounded [QueueSource] a producer may keep feeding while the
//! run drains it. Retrieval is never parallel, the [Scheduler](crate::scheduler::Scheduler) pulls
//! one item at a time even though the resulting invocations overlap.

use std::sync::Arc;

use futures::Stream;
use futures::stream::BoxStream;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};

/// Raised when an item is requested from a source that has nothing left. It never leaves the
/// crate, the scheduler treats it as a no-op completion.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct OutOfItems;

/// Source of the items for a run.
pub enum Source<T> {
    Sequence(SequenceSource<T>),
    Queue(QueueSource<T>),
}

impl<T> Source<T> {
    /// Creates a queue backed source from any stream.
    pub fn from_stream(stream: impl Stream<Item = T> + Send + 'static) -> Self {
        Source::Queue(QueueSource::new(stream))
    }

    /// Number of items if it is known up front.
    pub fn len_hint(&self) -> Option<usize> {
        match self {
            Source::Sequence(seq) => Some(seq.len()),
            Source::Queue(_) => None,
        }
    }

    pub(crate) fn has_next(&self) -> bool {
        match self {
            Source::Sequence(seq) => seq.has_next(),
            Source::Queue(queue) => queue.has_next(),
        }
    }

    /// Returns the next item along with its position in the source.
    pub(crate) async fn next(&mut self) -> Result<(usize, T), OutOfItems> {
        match self {
            Source::Sequence(seq) => seq.next(),
            Source::Queue(queue) => queue.next().await,
        }
    }
}

/// Finite source, every position is handed out exactly once and in order.
pub struct SequenceSource<T> {
    items: std::vec::IntoIter<T>,
    len: usize,
    cursor: usize,
}

impl<T> SequenceSource<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            len: items.len(),
            items: items.into_iter(),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn has_next(&self) -> bool {
        self.cursor < self.len
    }

    fn next(&mut self) -> Result<(usize, T), OutOfItems> {
        let item = self.items.next().ok_or(OutOfItems)?;
        let position = self.cursor;
        self.cursor += 1;
        Ok((position, item))
    }
}

/// Unbounded source fed by a producer. Taking the next item waits while the queue is empty.
/// Once every producer is gone the queue can never yield again and it reports [OutOfItems].
///
/// Clones share the same underlying queue. A run only takes the items it launches, anything still
/// queued when the run ends stays in the queue for the other holders.
pub struct QueueSource<T> {
    stream: Arc<Mutex<BoxStream<'static, T>>>,
    /// items taken through this holder, used as their position
    received: usize,
    closed: bool,
}

impl<T> QueueSource<T> {
    pub fn new(stream: impl Stream<Item = T> + Send + 'static) -> Self {
        let stream: BoxStream<'static, T> = Box::pin(stream.fuse());
        Self {
            stream: Arc::new(Mutex::new(stream)),
            received: 0,
            closed: false,
        }
    }

    /// Takes the next item from the queue, waiting while it is empty. Returns `None` once every
    /// producer is gone. While a run is active it competes with the run for the items.
    pub async fn recv(&self) -> Option<T> {
        self.stream.lock().await.next().await
    }

    fn has_next(&self) -> bool {
        !self.closed
    }

    /// Waits for the next item. Cancel safe, dropping the future never loses an item.
    async fn next(&mut self) -> Result<(usize, T), OutOfItems> {
        match self.recv().await {
            Some(item) => {
                let position = self.received;
                self.received += 1;
                Ok((position, item))
            }
            None => {
                self.closed = true;
                Err(OutOfItems)
            }
        }
    }
}

impl<T> Clone for QueueSource<T> {
    fn clone(&self) -> Self {
        Self {
            stream: Arc::clone(&self.stream),
            received: 0,
            closed: self.closed,
        }
    }
}

impl<T: Send + 'static> From<mpsc::Receiver<T>> for QueueSource<T> {
    fn from(rx: mpsc::Receiver<T>) -> Self {
        QueueSource::new(ReceiverStream::new(rx))
    }
}

impl<T: Send + 'static> From<mpsc::UnboundedReceiver<T>> for QueueSource<T> {
    fn from(rx: mpsc::UnboundedReceiver<T>) -> Self {
        QueueSource::new(UnboundedReceiverStream::new(rx))
    }
}

impl<T> From<Vec<T>> for Source<T> {
    fn from(items: Vec<T>) -> Self {
        Source::Sequence(SequenceSource::new(items))
    }
}

impl<T> From<QueueSource<T>> for Source<T> {
    fn from(queue: QueueSource<T>) -> Self {
        Source::Queue(queue)
    }
}

impl<T: Send + 'static> From<mpsc::Receiver<T>> for Source<T> {
    fn from(rx: mpsc::Receiver<T>) -> Self {
        Source::Queue(QueueSource::from(rx))
    }
}

impl<T: Send + 'static> From<mpsc::UnboundedReceiver<T>> for Source<T> {
    fn from(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Source::Queue(QueueSource::from(rx))
    }
}

impl<T: Send + 'static> From<ReceiverStream<T>> for Source<T> {
    fn from(stream: ReceiverStream<T>) -> Self {
        Source::from_stream(stream)
    }
}

impl<T: Send + 'static> From<UnboundedReceiverStream<T>> for Source<T> {
    fn from(stream: UnboundedReceiverStream<T>) -> Self {
        Source::from_stream(stream)
    }
}
