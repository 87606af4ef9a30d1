//! Bounded single-producer/single-consumer byte queues
//!
//! Thin wrapper over `tokio::sync::mpsc` that makes the loss policy part of
//! the contract: `try_push` never waits and reports whether the item was
//! queued or dropped, and why.

use thiserror::Error;
use tokio::sync::mpsc;

/// Result of a non-blocking push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Item queued
    Sent,
    /// Queue at capacity, item dropped
    Full,
    /// Consumer gone, item dropped
    Closed,
}

/// The consumer side has been dropped
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("queue consumer has gone away")]
pub struct QueueClosed;

/// Create a bounded queue holding at most `capacity` pending items
pub fn channel<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueSender { tx }, QueueReceiver { rx })
}

/// Producer half
#[derive(Debug)]
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Queue `item` if there is room, never waiting
    pub fn try_push(&self, item: T) -> Offer {
        match self.tx.try_send(item) {
            Ok(()) => Offer::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Offer::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    /// Queue `item`, waiting for room
    pub async fn push(&self, item: T) -> Result<(), QueueClosed> {
        self.tx.send(item).await.map_err(|_| QueueClosed)
    }

    /// Queue `item` from a blocking thread, waiting for room.
    ///
    /// Must not be called from within an async context.
    pub fn blocking_push(&self, item: T) -> Result<(), QueueClosed> {
        self.tx.blocking_send(item).map_err(|_| QueueClosed)
    }
}

/// Consumer half
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Next item in push order; `None` once every producer is gone and the
    /// queue is drained
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next item if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}
