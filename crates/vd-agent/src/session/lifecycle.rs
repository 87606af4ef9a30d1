//! Per-session state

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use vd_core::SessionError;
use vd_protocol::SessionId;

use crate::queue::{self, Offer, QueueReceiver, QueueSender};
use super::signal::CloseSignal;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Registered, runner not started yet
    Created = 0,
    /// Runner is exchanging bytes
    Running = 1,
    /// Close fired; tasks are winding down
    Closing = 2,
    /// Removed from the registry
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// One interactive terminal multiplexed over the shared connection
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    cancel: CancellationToken,
    input: QueueSender<Bytes>,
    close: CloseSignal,
    state: AtomicU8,
}

/// Queue ends handed to the runner and the output pump when a session
/// starts. Each end has exactly one owner.
#[derive(Debug)]
pub struct SessionEndpoints {
    /// Runner reads input from here
    pub input: QueueReceiver<Bytes>,
    /// Runner writes output here
    pub output_tx: QueueSender<Bytes>,
    /// Output pump drains from here
    pub output_rx: QueueReceiver<Bytes>,
}

impl Session {
    /// Create a session whose cancellation scope is a child of `parent`
    pub fn new(
        id: SessionId,
        parent: &CancellationToken,
        input_capacity: usize,
        output_capacity: usize,
    ) -> (Arc<Self>, SessionEndpoints) {
        let (input_tx, input_rx) = queue::channel(input_capacity);
        let (output_tx, output_rx) = queue::channel(output_capacity);

        let session = Arc::new(Self {
            id,
            cancel: parent.child_token(),
            input: input_tx,
            close: CloseSignal::new(),
            state: AtomicU8::new(SessionState::Created as u8),
        });

        let endpoints = SessionEndpoints {
            input: input_rx,
            output_tx,
            output_rx,
        };

        (session, endpoints)
    }

    /// Session id
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Cancellation scope observed by the runner
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Close signal observed by the runner and the output pump
    pub fn close_signal(&self) -> &CloseSignal {
        &self.close
    }

    /// Whether input is still accepted
    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.close.is_closed()
    }

    /// Queue input without waiting.
    ///
    /// Returns `Closed` once the session is shutting down and
    /// `InputQueueFull` when the runner is not keeping up; in both cases the
    /// chunk is dropped.
    pub fn send_input(&self, data: Bytes) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::Closed(self.id.clone()));
        }

        match self.input.try_push(data) {
            Offer::Sent => Ok(()),
            Offer::Full => Err(SessionError::InputQueueFull(self.id.clone())),
            Offer::Closed => Err(SessionError::Closed(self.id.clone())),
        }
    }

    /// Request cancellation; the runner observes it and closes the session
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Move to `Closing`, fire the close signal and cancel the scope.
    ///
    /// Safe to call from any number of racing paths, including after a
    /// runner fired the signal itself; returns `true` only for the call that
    /// fired it.
    pub fn close(&self) -> bool {
        let fired = self.close.close();
        self.advance(SessionState::Closing);
        self.cancel.cancel();
        fired
    }

    pub(crate) fn mark_running(&self) {
        let _ = self.state.compare_exchange(
            SessionState::Created as u8,
            SessionState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn mark_closed(&self) {
        self.advance(SessionState::Closed);
    }

    /// States only move forward
    fn advance(&self, next: SessionState) {
        self.state.fetch_max(next as u8, Ordering::AcqRel);
    }
}
