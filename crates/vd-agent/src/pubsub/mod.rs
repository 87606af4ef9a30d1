//! Publish/subscribe transport to the control server
//!
//! One outbound WebSocket carries every event in both directions. The
//! [`PubSubClient`] owns that connection, keeps the durable subscription set,
//! routes inbound `event` frames to per-handler mailboxes and sends
//! heartbeats. [`maintain_connection`] wraps it in the reconnect policy.

mod client;
mod dispatch;
mod reconnect;

use async_trait::async_trait;
use vd_core::ConnectionError;
use vd_protocol::EventKind;

pub use client::{Disconnected, PubSubClient, TransportConfig};
pub use dispatch::{Dispatcher, EventHandler};
pub use reconnect::{maintain_connection, RetryPolicy, RetryState};

/// Anything that can publish an event to the control server
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `data` under `event`. Fails fast when there is no live
    /// connection.
    async fn publish(&self, event: EventKind, data: String) -> Result<(), ConnectionError>;
}
