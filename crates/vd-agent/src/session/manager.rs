//! Session lifecycle orchestration
//!
//! The manager reacts to `pty:session_started` and `pty:input` events. Both
//! arrive through one handler, so a session's input is never handled before
//! its start. Each session gets three tasks:
//!
//! - the runner, driving the terminal
//! - an output pump, publishing `pty:output` in production order
//! - a supervisor, which awaits the runner (even if it panics) and then
//!   runs cleanup exactly once
//!
//! Cleanup closes the session, gives the pump a bounded window to flush,
//! deregisters the session and publishes `pty:session_ended`.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vd_core::config::AgentConfig;
use vd_core::SessionError;
use vd_protocol::payload::{self, InputPayload, OutputPayload, SessionStartedPayload};
use vd_protocol::{EventKind, SessionId};

use super::lifecycle::{Session, SessionEndpoints};
use super::registry::SessionRegistry;
use crate::pty::{SessionIo, SessionRunner};
use crate::pubsub::{EventHandler, EventPublisher, PubSubClient};
use crate::queue::QueueReceiver;

/// Tunables for [`SessionManager`]
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Pending input chunks per session
    pub input_capacity: usize,
    /// Pending output chunks per session
    pub output_capacity: usize,
    /// Concurrent session cap
    pub max_sessions: Option<usize>,
    /// How long cleanup waits for the output pump to flush
    pub drain_timeout: Duration,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            input_capacity: 100,
            output_capacity: 100,
            max_sessions: None,
            drain_timeout: Duration::from_millis(500),
        }
    }
}

impl From<&AgentConfig> for SessionManagerConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            input_capacity: config.input_queue_capacity,
            output_capacity: config.output_queue_capacity,
            max_sessions: config.max_sessions,
            ..Self::default()
        }
    }
}

/// Owns every live session
pub struct SessionManager {
    registry: SessionRegistry,
    publisher: Arc<dyn EventPublisher>,
    runner: Arc<dyn SessionRunner>,
    /// Parent of every session's cancellation scope
    root: CancellationToken,
    config: SessionManagerConfig,
}

impl SessionManager {
    /// Create a manager with its own root cancellation scope
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        runner: Arc<dyn SessionRunner>,
        config: SessionManagerConfig,
    ) -> Arc<Self> {
        Self::with_root(publisher, runner, config, CancellationToken::new())
    }

    /// Create a manager whose sessions are children of `root`
    pub fn with_root(
        publisher: Arc<dyn EventPublisher>,
        runner: Arc<dyn SessionRunner>,
        config: SessionManagerConfig,
        root: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: SessionRegistry::new(),
            publisher,
            runner,
            root,
            config,
        })
    }

    /// Live sessions
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Register the session handler on `client`.
    ///
    /// The handler holds a weak reference, so the client never keeps the
    /// manager alive.
    pub async fn attach(self: &Arc<Self>, client: &PubSubClient) {
        client
            .subscribe_all(
                &[EventKind::PtySessionStarted, EventKind::PtyInput],
                SessionEvents(Arc::downgrade(self)),
            )
            .await;
    }

    /// React to a `pty:session_started` payload
    pub fn handle_session_started(self: &Arc<Self>, data: &str) {
        let payload: SessionStartedPayload = match payload::parse(data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    "Ignoring malformed {} payload: {}",
                    EventKind::PtySessionStarted,
                    e
                );
                return;
            }
        };

        match self.start_session(payload.session_id) {
            Ok(_) => {}
            Err(SessionError::AlreadyExists(id)) => {
                tracing::warn!(session_id = %id, "Session already running, ignoring start");
            }
            Err(e) => tracing::warn!("Refusing to start session: {}", e),
        }
    }

    /// React to a `pty:input` payload
    pub fn handle_input(&self, data: &str) {
        let payload: InputPayload = match payload::parse(data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Ignoring malformed {} payload: {}", EventKind::PtyInput, e);
                return;
            }
        };

        let id = payload.session_id.clone();
        match self.deliver_input(&id, payload.into_bytes()) {
            Ok(()) => tracing::trace!(session_id = %id, "Input queued"),
            Err(SessionError::NotFound(id)) => {
                tracing::debug!(session_id = %id, "Input for unknown session, dropping");
            }
            Err(SessionError::Closed(id)) => {
                tracing::debug!(session_id = %id, "Session closed, dropping input");
            }
            Err(SessionError::InputQueueFull(id)) => {
                tracing::warn!(session_id = %id, "Input queue full, dropping input");
            }
            Err(e) => tracing::warn!("Failed to deliver input: {}", e),
        }
    }

    /// Start a session and its runner.
    ///
    /// A second start for a live id fails with `AlreadyExists` and leaves
    /// the running session untouched.
    pub fn start_session(self: &Arc<Self>, id: SessionId) -> Result<Arc<Session>, SessionError> {
        if self.registry.get(&id).is_some() {
            return Err(SessionError::AlreadyExists(id));
        }
        if let Some(max) = self.config.max_sessions {
            if self.registry.len() >= max {
                return Err(SessionError::LimitExceeded(max));
            }
        }

        let (session, endpoints) = Session::new(
            id.clone(),
            &self.root,
            self.config.input_capacity,
            self.config.output_capacity,
        );
        let (session, existed) = self.registry.create(session);
        if existed {
            return Err(SessionError::AlreadyExists(id));
        }

        tracing::info!(session_id = %id, "Starting session");
        self.spawn_session(Arc::clone(&session), endpoints);
        Ok(session)
    }

    /// Queue input for a session without waiting
    pub fn deliver_input(&self, id: &SessionId, data: Bytes) -> Result<(), SessionError> {
        let session = self
            .registry
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        session.send_input(data)
    }

    /// Cancel every session. Their cleanup runs on their own supervisors.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down {} session(s)", self.registry.len());
        self.root.cancel();
    }

    fn spawn_session(self: &Arc<Self>, session: Arc<Session>, endpoints: SessionEndpoints) {
        let SessionEndpoints {
            input,
            output_tx,
            output_rx,
        } = endpoints;

        let pump = tokio::spawn(pump_output(
            Arc::clone(&self.publisher),
            Arc::clone(&session),
            output_rx,
        ));

        let io = SessionIo {
            session_id: session.id().clone(),
            input,
            output: output_tx,
            cancel: session.cancel_token().clone(),
            close: session.close_signal().clone(),
        };
        let runner = Arc::clone(&self.runner);
        let run = tokio::spawn(async move { runner.run(io).await });
        session.mark_running();

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let id = session.id().clone();
            match run.await {
                Ok(Ok(())) => tracing::debug!(session_id = %id, "Runner finished"),
                Ok(Err(e)) => tracing::warn!(session_id = %id, "Runner failed: {:#}", e),
                Err(e) if e.is_panic() => tracing::error!(session_id = %id, "Runner panicked"),
                Err(e) => tracing::warn!(session_id = %id, "Runner task aborted: {}", e),
            }
            manager.finish_session(session, pump).await;
        });
    }

    async fn finish_session(&self, session: Arc<Session>, pump: JoinHandle<()>) {
        session.close();

        if tokio::time::timeout(self.config.drain_timeout, pump)
            .await
            .is_err()
        {
            tracing::debug!(session_id = %session.id(), "Output pump did not drain in time");
        }

        if !self.registry.remove_if_same(&session) {
            tracing::debug!(session_id = %session.id(), "Session already deregistered");
            return;
        }
        session.mark_closed();
        tracing::info!(session_id = %session.id(), "Session ended");

        if let Err(e) = self
            .publisher
            .publish(EventKind::PtySessionEnded, session.id().to_string())
            .await
        {
            tracing::warn!(session_id = %session.id(), "Failed to publish session end: {}", e);
        }
    }
}

/// Routes both session events through one mailbox
struct SessionEvents(Weak<SessionManager>);

#[async_trait]
impl EventHandler for SessionEvents {
    async fn handle(&self, event: EventKind, data: String) {
        let Some(manager) = self.0.upgrade() else {
            return;
        };
        match event {
            EventKind::PtySessionStarted => manager.handle_session_started(&data),
            EventKind::PtyInput => manager.handle_input(&data),
            other => tracing::debug!(event = %other, "Not a session event"),
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Publish a session's output in order until the runner stops producing,
/// the session closes with nothing left queued, or a publish fails.
async fn pump_output(
    publisher: Arc<dyn EventPublisher>,
    session: Arc<Session>,
    mut output: QueueReceiver<Bytes>,
) {
    let close = session.close_signal().clone();

    loop {
        let chunk = tokio::select! {
            biased;
            chunk = output.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
            _ = close.closed() => break,
        };

        let data = match OutputPayload::new(session.id().clone(), chunk).to_json() {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(session_id = %session.id(), "Failed to encode output: {}", e);
                continue;
            }
        };

        if let Err(e) = publisher.publish(EventKind::PtyOutput, data).await {
            tracing::warn!(session_id = %session.id(), "Output pump stopping: {}", e);
            break;
        }
    }

    tracing::trace!(session_id = %session.id(), "Output pump exiting");
}
