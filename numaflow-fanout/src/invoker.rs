//! Invoker exposes every shape of user operation (async, synchronous, synchronous dispatched to an
//! offload pool) through a single "await a result or a failure" contract, so the
//! [Scheduler](crate::scheduler::Scheduler) can treat every invocation the same.

use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{BoxError, Error, Result};

type AsyncFn<T, R> = dyn Fn(T) -> BoxFuture<'static, std::result::Result<R, BoxError>> + Send + Sync;
type SyncFn<T, R> = dyn Fn(T) -> std::result::Result<R, BoxError> + Send + Sync;

/// The user supplied per-item operation.
pub enum Operation<T, R> {
    /// Awaited directly on the runtime.
    Async(Arc<AsyncFn<T, R>>),
    /// Called directly, or dispatched to the [OffloadPool] if one is configured.
    Sync(Arc<SyncFn<T, R>>),
}

impl<T, R> Operation<T, R> {
    /// Creates an operation from an async function.
    pub fn from_async<F, Fut, E>(f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
        T: 'static,
        R: 'static,
    {
        Operation::Async(Arc::new(
            move |item: T| -> BoxFuture<'static, std::result::Result<R, BoxError>> {
                let fut = f(item);
                Box::pin(async move { fut.await.map_err(Into::<BoxError>::into) })
            },
        ))
    }

    /// Creates an operation from a synchronous function. It should either be cheap or be paired
    /// with an [OffloadPool], otherwise it stalls the runtime worker it runs on.
    pub fn from_fn<F, E>(f: F) -> Self
    where
        F: Fn(T) -> std::result::Result<R, E> + Send + Sync + 'static,
        E: Into<BoxError>,
        T: 'static,
        R: 'static,
    {
        Operation::Sync(Arc::new(
            move |item: T| -> std::result::Result<R, BoxError> { f(item).map_err(Into::into) },
        ))
    }
}

impl<T, R> Clone for Operation<T, R> {
    fn clone(&self) -> Self {
        match self {
            Operation::Async(f) => Operation::Async(Arc::clone(f)),
            Operation::Sync(f) => Operation::Sync(Arc::clone(f)),
        }
    }
}

impl<T, R> fmt::Debug for Operation<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Async(_) => write!(f, "Operation::Async"),
            Operation::Sync(_) => write!(f, "Operation::Sync"),
        }
    }
}

/// External pool synchronous, CPU-bound operations are dispatched to.
#[derive(Debug, Clone)]
pub enum OffloadPool {
    /// Tokio's blocking thread pool, via [tokio::task::spawn_blocking].
    Blocking,
    /// A dedicated rayon pool.
    Rayon(Arc<rayon::ThreadPool>),
}

impl OffloadPool {
    async fn dispatch<T, R>(&self, f: Arc<SyncFn<T, R>>, item: T) -> Result<R>
    where
        T: Send + 'static,
        R: Send + 'static,
    {
        let output = match self {
            OffloadPool::Blocking => tokio::task::spawn_blocking(move || f(item))
                .await
                .map_err(|e| Error::Offload(format!("blocking task failed: {e}")))?,
            OffloadPool::Rayon(pool) => {
                let (tx, rx) = oneshot::channel();
                pool.spawn(move || {
                    // a panic escaping a rayon job aborts the process
                    let output = catch_unwind(AssertUnwindSafe(|| f(item)));
                    let _ = tx.send(output);
                });
                rx.await
                    .map_err(|_| Error::Offload("rayon pool dropped the invocation".into()))?
                    .map_err(|_| Error::Offload("operation panicked on the rayon pool".into()))?
            }
        };
        output.map_err(Error::operation)
    }
}

/// Invoker binds an [Operation] to the optional [OffloadPool] it runs on.
pub(crate) struct Invoker<T, R> {
    operation: Operation<T, R>,
    offload: Option<OffloadPool>,
}

impl<T, R> Invoker<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(operation: Operation<T, R>, offload: Option<OffloadPool>) -> Self {
        if let (Operation::Async(_), Some(pool)) = (&operation, &offload) {
            debug!(?pool, "Offload pool is ignored for async operations");
        }
        Self { operation, offload }
    }

    /// Runs the operation against one item.
    pub(crate) async fn invoke(&self, item: T) -> Result<R> {
        match (&self.operation, &self.offload) {
            (Operation::Async(f), _) => f(item).await.map_err(Error::operation),
            (Operation::Sync(f), None) => f(item).map_err(Error::operation),
            (Operation::Sync(f), Some(pool)) => pool.dispatch(Arc::clone(f), item).await,
        }
    }
}
