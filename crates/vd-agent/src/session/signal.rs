//! One-shot close signal shared by a session's background tasks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Fires at most once, observed by any number of waiters.
///
/// Several paths race to close a session (runner EOF, write fault, child
/// exit, cancellation). Only the first `close()` wins and returns `true`;
/// every waiter sees the same single transition.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    fired: AtomicBool,
    notify: CancellationToken,
}

impl CloseSignal {
    /// Create an unfired signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn close(&self) -> bool {
        let won = self
            .inner
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.inner.notify.cancel();
        }
        won
    }

    /// Whether the signal has fired
    pub fn is_closed(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Wait until the signal fires (returns immediately if it already has)
    pub async fn closed(&self) {
        self.inner.notify.cancelled().await
    }
}
