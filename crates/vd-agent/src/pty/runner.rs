//! Runner abstraction used by the session manager

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use vd_protocol::SessionId;

use crate::queue::{QueueReceiver, QueueSender};
use crate::session::CloseSignal;

/// Everything a runner gets for one session
#[derive(Debug)]
pub struct SessionIo {
    /// Session being served
    pub session_id: SessionId,
    /// Keystrokes in arrival order
    pub input: QueueReceiver<Bytes>,
    /// Terminal output; pushing waits while the queue is full
    pub output: QueueSender<Bytes>,
    /// Cancelled when the session or the whole agent shuts down
    pub cancel: CancellationToken,
    /// Fired by whichever path ends the session first
    pub close: CloseSignal,
}

/// Drives the terminal behind a session
#[async_trait]
pub trait SessionRunner: Send + Sync + 'static {
    /// Run until the terminal ends, `io.cancel` is cancelled, or `io.close`
    /// fires. Any error ends the session.
    async fn run(&self, io: SessionIo) -> anyhow::Result<()>;
}
