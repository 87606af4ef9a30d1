//! Agent state management

use std::sync::Arc;

use vd_core::config::AgentConfig;
use vd_core::{SecretStore, VdError};
use vd_protocol::EventKind;

use crate::pty::SessionRunner;
use crate::pubsub::{maintain_connection, PubSubClient, RetryPolicy, TransportConfig};
use crate::session::{SessionManager, SessionManagerConfig};

/// Events the agent subscribes to on every connect
pub const DEFAULT_SUBSCRIPTIONS: [EventKind; 3] = [
    EventKind::AgentUpdated,
    EventKind::PtySessionStarted,
    EventKind::PtyInput,
];

/// Global state for the agent daemon
pub struct AgentState {
    /// Configuration
    pub config: AgentConfig,
    /// Connection to the control server
    pub client: Arc<PubSubClient>,
    /// Terminal sessions
    pub sessions: Arc<SessionManager>,
}

impl AgentState {
    /// Wire the client and session manager together and register handlers
    pub async fn new(
        config: AgentConfig,
        secrets: Arc<dyn SecretStore>,
        runner: Arc<dyn SessionRunner>,
    ) -> Self {
        let client = Arc::new(PubSubClient::new(
            TransportConfig::from(&config),
            secrets,
            DEFAULT_SUBSCRIPTIONS,
        ));
        let sessions = SessionManager::new(
            client.clone(),
            runner,
            SessionManagerConfig::from(&config),
        );
        sessions.attach(&client).await;

        client
            .subscribe(EventKind::AgentUpdated, |data: String| async move {
                tracing::info!("Agent record updated: {}", data);
            })
            .await;

        Self {
            config,
            client,
            sessions,
        }
    }

    /// Stay connected until the retry budget is spent. Returns at once if
    /// the configuration is unusable.
    pub async fn run(&self) -> VdError {
        if let Err(e) = self.config.validate() {
            return e.into();
        }
        let policy = RetryPolicy::from_config(&self.config.retry);
        maintain_connection(&self.client, &policy).await
    }

    /// Cancel every session
    pub fn shutdown(&self) {
        self.sessions.shutdown();
    }
}
