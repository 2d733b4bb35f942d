use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::BoxError;
use crate::invoker::Operation;

/// Records how many invocations are active at once and the highest count ever seen.
#[derive(Debug, Default)]
pub(crate) struct ActiveGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
    started: AtomicUsize,
}

impl ActiveGauge {
    pub(crate) fn enter(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub(crate) fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of invocations that have started so far.
    pub(crate) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

/// Async operation that squares its input after a delay that varies per item, so completion order
/// differs from input order. Items listed in `fail_on` fail instead.
pub(crate) fn squaring_op(gauge: Arc<ActiveGauge>, fail_on: Vec<u64>) -> Operation<u64, u64> {
    Operation::from_async(move |i: u64| {
        let gauge = Arc::clone(&gauge);
        let fail = fail_on.contains(&i);
        async move {
            gauge.enter();
            tokio::time::sleep(Duration::from_millis(1 + (i * 7) % 5)).await;
            gauge.exit();
            if fail {
                return Err(BoxError::from(format!("item {i} failed")));
            }
            Ok(i * i)
        }
    })
}
