//! Inbound event routing
//!
//! Each registered handler gets its own bounded mailbox drained by its own
//! task. A handler may be registered for several event kinds at once; frames
//! for all of them share its mailbox and run in arrival order. A slow handler
//! only backs up its own mailbox. When a mailbox is full the frame is dropped
//! for that handler and the read loop moves on.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::FutureExt;

use vd_protocol::{decode, EventKind};

use crate::queue::{self, Offer, QueueSender};

/// Callback for one or more event kinds. Receives the frame's event and its
/// raw `data`.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event
    async fn handle(&self, event: EventKind, data: String);
}

/// Plain closures see only the data
#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, _event: EventKind, data: String) {
        (self)(data).await
    }
}

/// A handler's queue
#[derive(Clone)]
struct Mailbox {
    tx: QueueSender<(EventKind, String)>,
}

impl Mailbox {
    fn spawn(handler: Arc<dyn EventHandler>, capacity: usize) -> Self {
        let (tx, mut rx) = queue::channel::<(EventKind, String)>(capacity);

        tokio::spawn(async move {
            while let Some((event, data)) = rx.recv().await {
                let outcome = AssertUnwindSafe(handler.handle(event, data))
                    .catch_unwind()
                    .await;
                if let Err(panic) = outcome {
                    tracing::error!(
                        event = %event,
                        "Event handler panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
            tracing::trace!("Handler worker exiting");
        });

        Self { tx }
    }
}

/// Routes decoded event frames to registered handlers
pub struct Dispatcher {
    handlers: RwLock<HashMap<EventKind, Vec<Mailbox>>>,
    capacity: usize,
}

impl Dispatcher {
    /// Create a dispatcher whose mailboxes hold `capacity` pending frames
    pub fn new(capacity: usize) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Register one handler for every kind in `events`, behind a single
    /// mailbox. Must be called from within a tokio runtime.
    pub fn register(&self, events: &[EventKind], handler: Arc<dyn EventHandler>) {
        let mailbox = Mailbox::spawn(handler, self.capacity);
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        for event in events {
            handlers.entry(*event).or_default().push(mailbox.clone());
        }
    }

    /// Decode one text frame and hand it to every handler for its event.
    ///
    /// Returns how many handlers accepted the frame. Malformed frames,
    /// non-event frames and unknown events are logged and skipped.
    pub fn dispatch(&self, text: &str) -> usize {
        let frame = match decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Dropping malformed frame: {}", e);
                return 0;
            }
        };

        if !frame.is_dispatchable() {
            tracing::trace!("Ignoring {:?} frame", frame.frame_type);
            return 0;
        }

        let event = match frame.event_kind() {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!("Ignoring event frame: {}", e);
                return 0;
            }
        };
        let data = frame.data.unwrap_or_default();

        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let Some(mailboxes) = handlers.get(&event) else {
            tracing::debug!(event = %event, "No handler registered");
            return 0;
        };

        let mut delivered = 0;
        for mailbox in mailboxes {
            match mailbox.tx.try_push((event, data.clone())) {
                Offer::Sent => delivered += 1,
                Offer::Full => {
                    tracing::warn!(event = %event, "Handler queue full, dropping frame");
                }
                Offer::Closed => {
                    tracing::warn!(event = %event, "Handler worker gone, dropping frame");
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Dispatcher")
            .field("events", &handlers.keys().collect::<Vec<_>>())
            .field("capacity", &self.capacity)
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
