//! Loopback control server for integration tests

#![allow(dead_code)]

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

pub const TOKEN: &str = "test-token";
pub const TOKEN_HEADER: &str = "X-Agente-Token";

pub type ServerSocket = WebSocketStream<TcpStream>;

/// A server that accepts only [`TOKEN`] and hands each accepted socket to
/// the test.
pub struct TestServer {
    pub url: String,
    accepted: mpsc::UnboundedReceiver<ServerSocket>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/pubsub/agente", listener.local_addr().unwrap());
        let (tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let check_token =
                        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                            let token = request
                                .headers()
                                .get(TOKEN_HEADER)
                                .and_then(|value| value.to_str().ok());
                            if token == Some(TOKEN) {
                                Ok(response)
                            } else {
                                Err(Response::builder()
                                    .status(StatusCode::UNAUTHORIZED)
                                    .body(Some("invalid agent token".to_string()))
                                    .unwrap())
                            }
                        };
                    if let Ok(ws) = accept_hdr_async(stream, check_token).await {
                        let _ = tx.send(ws);
                    }
                });
            }
        });

        Self { url, accepted }
    }

    /// Next accepted connection
    pub async fn accept(&mut self) -> ServerSocket {
        tokio::time::timeout(Duration::from_secs(5), self.accepted.recv())
            .await
            .expect("no connection accepted")
            .expect("listener stopped")
    }

    /// Whether a connection arrives within `wait`
    pub async fn accepts_within(&mut self, wait: Duration) -> bool {
        matches!(
            tokio::time::timeout(wait, self.accepted.recv()).await,
            Ok(Some(_))
        )
    }
}

/// Next JSON text frame from the agent
pub async fn next_frame(ws: &mut ServerSocket) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let message = tokio::time::timeout_at(deadline, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .expect("read failed");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("agent sent invalid JSON");
        }
    }
}

/// Next frame that is not a heartbeat
pub async fn next_non_heartbeat(ws: &mut ServerSocket) -> Value {
    loop {
        let frame = next_frame(ws).await;
        if frame["type"] != "heartbeat" {
            return frame;
        }
    }
}

/// Read the subscribe frames sent right after connecting
pub async fn read_subscriptions(ws: &mut ServerSocket, count: usize) -> Vec<String> {
    let mut events = Vec::new();
    for _ in 0..count {
        let frame = next_frame(ws).await;
        assert_eq!(frame["type"], "subscribe", "unexpected frame {}", frame);
        events.push(frame["event"].as_str().unwrap().to_string());
    }
    events
}

/// Deliver an event to the agent
pub async fn send_event(ws: &mut ServerSocket, event: &str, data: &str) {
    let frame = serde_json::json!({ "type": "event", "event": event, "data": data });
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

/// Decode a `pty:output` publish frame into (session id, raw bytes)
pub fn decode_output(frame: &Value) -> (String, Vec<u8>) {
    assert_eq!(frame["type"], "publish");
    assert_eq!(frame["event"], "pty:output");
    let payload: Value = serde_json::from_str(frame["data"].as_str().unwrap()).unwrap();
    let output = STANDARD
        .decode(payload["output"].as_str().unwrap())
        .unwrap();
    (payload["session_id"].as_str().unwrap().to_string(), output)
}
