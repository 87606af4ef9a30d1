//! WebSocket publish/subscribe client

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use vd_core::config::AgentConfig;
use vd_core::{ConnectionError, SecretStore};
use vd_protocol::{encode_heartbeat, encode_publish, encode_subscribe, EventKind};

use super::dispatch::{Dispatcher, EventHandler};
use super::EventPublisher;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Grace period for flushing a close frame on teardown
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Floor for the heartbeat period; `tokio::time::interval` rejects zero
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Transport settings, usually derived from [`AgentConfig`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket endpoint
    pub server_url: String,
    /// Header carrying the agent token
    pub token_header: String,
    /// Interval between heartbeats
    pub heartbeat_interval: Duration,
    /// Handshake timeout
    pub connect_timeout: Duration,
    /// Pending frames per handler mailbox
    pub handler_queue_capacity: usize,
}

impl From<&AgentConfig> for TransportConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            server_url: config.server_url.clone(),
            token_header: config.token_header.clone(),
            heartbeat_interval: config.heartbeat_interval,
            connect_timeout: config.connect_timeout,
            handler_queue_capacity: config.handler_queue_capacity,
        }
    }
}

/// Why an established connection ended
#[derive(Debug)]
pub struct Disconnected {
    /// The failure that ended it
    pub reason: ConnectionError,
}

impl fmt::Display for Disconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "disconnected: {}", self.reason)
    }
}

/// Live-connection state. Subscriptions live here so that a subscribe racing
/// a reconnect is either in the snapshot sent at connect time or sent on
/// the installed sink, never both and never neither.
#[derive(Default)]
struct ConnectionState {
    subscriptions: Vec<EventKind>,
    sink: Option<WsSink>,
}

/// Client for the control server's pub/sub channel
pub struct PubSubClient {
    config: TransportConfig,
    secrets: Arc<dyn SecretStore>,
    dispatcher: Dispatcher,
    connection: Mutex<ConnectionState>,
}

impl PubSubClient {
    /// Create a disconnected client that will subscribe to
    /// `subscriptions` on every connect.
    pub fn new(
        config: TransportConfig,
        secrets: Arc<dyn SecretStore>,
        subscriptions: impl IntoIterator<Item = EventKind>,
    ) -> Self {
        let mut state = ConnectionState::default();
        for event in subscriptions {
            if !state.subscriptions.contains(&event) {
                state.subscriptions.push(event);
            }
        }

        Self {
            dispatcher: Dispatcher::new(config.handler_queue_capacity),
            config,
            secrets,
            connection: Mutex::new(state),
        }
    }

    /// Transport settings
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Whether a connection is currently established
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.sink.is_some()
    }

    /// Events subscribed on every connect
    pub async fn subscriptions(&self) -> Vec<EventKind> {
        self.connection.lock().await.subscriptions.clone()
    }

    /// Register `handler` for `event` and add the event to the durable
    /// subscription set. If connected and the event is new, a subscribe
    /// frame goes out immediately.
    pub async fn subscribe(&self, event: EventKind, handler: impl EventHandler) {
        self.subscribe_all(&[event], handler).await;
    }

    /// Register one `handler` for several events. Frames for any of them
    /// reach the handler in the order they were read.
    pub async fn subscribe_all(&self, events: &[EventKind], handler: impl EventHandler) {
        self.dispatcher.register(events, Arc::new(handler));

        let mut state = self.connection.lock().await;
        for &event in events {
            if state.subscriptions.contains(&event) {
                continue;
            }
            state.subscriptions.push(event);

            if let Some(sink) = state.sink.as_mut() {
                if let Err(e) = send_subscribe(sink, event).await {
                    tracing::warn!(event = %event, "Live subscribe failed: {}", e);
                }
            }
        }
    }

    /// Publish `data` under `event` on the live connection.
    ///
    /// Fails with [`ConnectionError::NotConnected`] without encoding
    /// anything when there is no connection.
    pub async fn publish(&self, event: EventKind, data: &str) -> Result<(), ConnectionError> {
        let mut state = self.connection.lock().await;
        let sink = state.sink.as_mut().ok_or(ConnectionError::NotConnected)?;

        let frame =
            encode_publish(event, data).map_err(|e| ConnectionError::Send(e.to_string()))?;
        sink.send(Message::text(frame))
            .await
            .map_err(|e| ConnectionError::Send(e.to_string()))
    }

    /// Dial the server, subscribe, and run the connection until it drops.
    ///
    /// Returns `Err` if no connection was established (token, handshake or
    /// initial subscribe failure) and `Ok` with the reason once an
    /// established connection ends.
    pub async fn connect(&self) -> Result<Disconnected, ConnectionError> {
        let token = self
            .secrets
            .token()
            .map_err(|e| ConnectionError::MissingToken(e.to_string()))?;
        let request = self.build_request(&token)?;

        tracing::debug!("Connecting to {}", self.config.server_url);
        let timeout = self.config.connect_timeout;
        let (ws, _response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| ConnectionError::Timeout(timeout))?
            .map_err(classify_handshake_error)?;

        let (sink, source) = ws.split();
        self.install(sink).await?;
        tracing::info!("Connected to {}", self.config.server_url);

        let reason = tokio::select! {
            reason = self.read_loop(source) => reason,
            reason = self.heartbeat_loop() => reason,
        };

        self.teardown().await;
        tracing::warn!("Connection to {} ended: {}", self.config.server_url, reason);
        Ok(Disconnected { reason })
    }

    fn build_request(&self, token: &str) -> Result<Request, ConnectionError> {
        let mut request = self
            .config
            .server_url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))?;

        let name = HeaderName::from_bytes(self.config.token_header.as_bytes())
            .map_err(|e| ConnectionError::InvalidRequest(e.to_string()))?;
        let value = HeaderValue::from_str(token).map_err(|_| {
            ConnectionError::InvalidRequest("token is not a valid header value".into())
        })?;
        request.headers_mut().insert(name, value);

        Ok(request)
    }

    /// Send the subscription snapshot and publish the sink, atomically with
    /// respect to `subscribe` and `publish`. Refuses while another
    /// connection is live.
    async fn install(&self, mut sink: WsSink) -> Result<(), ConnectionError> {
        let mut state = self.connection.lock().await;
        if state.sink.is_some() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
            return Err(ConnectionError::AlreadyConnected);
        }

        for event in state.subscriptions.clone() {
            if let Err(e) = send_subscribe(&mut sink, event).await {
                let _ = sink.close().await;
                return Err(e);
            }
            tracing::debug!(event = %event, "Subscribed");
        }

        state.sink = Some(sink);
        Ok(())
    }

    async fn read_loop(&self, mut source: WsSource) -> ConnectionError {
        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    self.dispatcher.dispatch(text.as_str());
                }
                Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        self.dispatcher.dispatch(text);
                    }
                    Err(_) => {
                        tracing::warn!(
                        "Dropping non-UTF-8 binary frame ({} bytes)",
                        bytes.len()
                    );
                    }
                },
                Ok(Message::Close(frame)) => {
                    tracing::debug!("Server sent close: {:?}", frame);
                    return ConnectionError::ClosedByServer;
                }
                Ok(_) => {}
                Err(e) => return ConnectionError::ConnectionLost(e.to_string()),
            }
        }
        ConnectionError::ConnectionLost("stream ended".to_string())
    }

    async fn heartbeat_loop(&self) -> ConnectionError {
        let period = self.config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let frame = match encode_heartbeat() {
                Ok(frame) => frame,
                Err(e) => return ConnectionError::Send(e.to_string()),
            };

            let mut state = self.connection.lock().await;
            let Some(sink) = state.sink.as_mut() else {
                return ConnectionError::NotConnected;
            };
            if let Err(e) = sink.send(Message::text(frame)).await {
                return ConnectionError::Send(e.to_string());
            }
            tracing::trace!("Heartbeat sent");
        }
    }

    async fn teardown(&self) {
        let sink = self.connection.lock().await.sink.take();
        if let Some(mut sink) = sink {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
        }
    }
}

#[async_trait]
impl EventPublisher for PubSubClient {
    async fn publish(&self, event: EventKind, data: String) -> Result<(), ConnectionError> {
        PubSubClient::publish(self, event, &data).await
    }
}

impl fmt::Debug for PubSubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSubClient")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

async fn send_subscribe(sink: &mut WsSink, event: EventKind) -> Result<(), ConnectionError> {
    let frame = encode_subscribe(event).map_err(|e| ConnectionError::Send(e.to_string()))?;
    sink.send(Message::text(frame))
        .await
        .map_err(|e| ConnectionError::Send(e.to_string()))
}

fn classify_handshake_error(error: tungstenite::Error) -> ConnectionError {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                ConnectionError::AuthRejected {
                    status: status.as_u16(),
                }
            } else {
                ConnectionError::Dial(format!("server answered HTTP {}", status))
            }
        }
        other => ConnectionError::Dial(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::net::TcpListener;
    use vd_core::StaticSecret;

    fn config(url: &str) -> TransportConfig {
        TransportConfig {
            server_url: url.to_string(),
            token_header: "X-Agente-Token".to_string(),
            heartbeat_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(2),
            handler_queue_capacity: 8,
        }
    }

    /// Accept one WebSocket on a local port; the server never reads unless
    /// the test does
    async fn loopback() -> (String, tokio::task::JoinHandle<WebSocketStream<TcpStream>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/pubsub/agente", listener.local_addr().unwrap());
        let accepted = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio_tungstenite::accept_async(stream).await.unwrap()
        });
        (url, accepted)
    }

    async fn wait_connected(client: &PubSubClient) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !client.is_connected().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("client never connected");
    }

    #[tokio::test]
    async fn test_initial_subscriptions_are_deduplicated() {
        let client = PubSubClient::new(
            config("ws://127.0.0.1:1/pubsub"),
            Arc::new(StaticSecret::new("t")),
            [EventKind::PtyInput, EventKind::PtyInput, EventKind::AgentUpdated],
        );
        assert_eq!(
            client.subscriptions().await,
            vec![EventKind::PtyInput, EventKind::AgentUpdated]
        );
    }

    #[tokio::test]
    async fn test_subscribe_while_disconnected_is_durable() {
        let client = PubSubClient::new(
            config("ws://127.0.0.1:1/pubsub"),
            Arc::new(StaticSecret::new("t")),
            [],
        );
        client.subscribe(EventKind::PtyInput, |_data: String| async {}).await;
        client.subscribe(EventKind::PtyInput, |_data: String| async {}).await;

        assert_eq!(client.subscriptions().await, vec![EventKind::PtyInput]);
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_publish_fails_fast_when_disconnected() {
        let client = PubSubClient::new(
            config("ws://127.0.0.1:1/pubsub"),
            Arc::new(StaticSecret::new("t")),
            [],
        );
        let big = "x".repeat(1 << 20);
        let result = tokio::time::timeout(
            Duration::from_millis(100),
            client.publish(EventKind::PtyOutput, &big),
        )
        .await
        .expect("publish should not wait");
        assert!(matches!(result, Err(ConnectionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_missing_token_does_not_dial() {
        let dir = tempfile::tempdir().unwrap();
        let client = PubSubClient::new(
            config("ws://127.0.0.1:1/pubsub"),
            Arc::new(vd_core::FileSecretStore::new(dir.path().join("agent.token"))),
            [],
        );
        assert!(matches!(
            client.connect().await,
            Err(ConnectionError::MissingToken(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_header_name_is_rejected() {
        let mut config = config("ws://127.0.0.1:1/pubsub");
        config.token_header = "bad header".to_string();
        let client = PubSubClient::new(config, Arc::new(StaticSecret::new("t")), []);
        assert!(matches!(
            client.connect().await,
            Err(ConnectionError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_all_adds_each_event_once() {
        let client = PubSubClient::new(
            config("ws://127.0.0.1:1/pubsub"),
            Arc::new(StaticSecret::new("t")),
            [EventKind::PtyInput],
        );
        client
            .subscribe_all(
                &[EventKind::PtySessionStarted, EventKind::PtyInput],
                |_data: String| async {},
            )
            .await;

        assert_eq!(
            client.subscriptions().await,
            vec![EventKind::PtyInput, EventKind::PtySessionStarted]
        );
    }

    #[tokio::test]
    async fn test_heartbeat_write_failure_ends_connection() {
        let (url, accepted) = loopback().await;
        let mut config = config(&url);
        config.heartbeat_interval = Duration::from_millis(50);
        let client = Arc::new(PubSubClient::new(config, Arc::new(StaticSecret::new("t")), []));

        let running = Arc::clone(&client);
        let connection = tokio::spawn(async move { running.connect().await });
        // Held open and never read, so nothing ends the read side
        let _server = accepted.await.unwrap();
        wait_connected(&client).await;

        // After our close frame the socket refuses further writes
        client
            .connection
            .lock()
            .await
            .sink
            .as_mut()
            .unwrap()
            .close()
            .await
            .unwrap();

        let ended = tokio::time::timeout(Duration::from_secs(2), connection)
            .await
            .expect("a failed heartbeat should end the connection")
            .unwrap()
            .expect("connection had been established");
        assert!(
            matches!(ended.reason, ConnectionError::Send(_)),
            "got {:?}",
            ended.reason
        );
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_zero_heartbeat_interval_still_beats() {
        let (url, accepted) = loopback().await;
        let mut config = config(&url);
        config.heartbeat_interval = Duration::ZERO;
        let client = Arc::new(PubSubClient::new(config, Arc::new(StaticSecret::new("t")), []));

        let running = Arc::clone(&client);
        let connection = tokio::spawn(async move { running.connect().await });
        let mut server = accepted.await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(2), server.next())
            .await
            .expect("no heartbeat")
            .unwrap()
            .unwrap();
        let text = match message {
            Message::Text(text) => text,
            other => panic!("unexpected message {:?}", other),
        };
        let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(frame, serde_json::json!({"type": "heartbeat"}));
        assert!(!connection.is_finished());
    }
}
