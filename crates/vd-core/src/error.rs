//! Core error types for the vrdeploy agent

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use vd_protocol::{ProtocolError, SessionId};

/// Top-level error type for the agent
#[derive(Error, Debug)]
pub enum VdError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Secret store error
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    /// The reconnect budget ran out
    #[error("Gave up after {attempts} connection attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: ConnectionError,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection-related errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// No auth token could be obtained; nothing was dialed
    #[error("Auth token unavailable: {0}")]
    MissingToken(String),

    /// The server URL or credential header could not form a request
    #[error("Invalid connection request: {0}")]
    InvalidRequest(String),

    /// TCP/TLS/WebSocket handshake failed
    #[error("Failed to connect: {0}")]
    Dial(String),

    /// Server refused the credential
    #[error("Authentication rejected by server (HTTP {status})")]
    AuthRejected { status: u16 },

    /// Handshake did not finish in time
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// Another connection is already live
    #[error("Already connected")]
    AlreadyConnected,

    /// No live connection to write to
    #[error("Not connected")]
    NotConnected,

    /// Writing a frame to the live connection failed
    #[error("Send failed: {0}")]
    Send(String),

    /// Reading from the live connection failed
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Server closed the connection
    #[error("Connection closed by server")]
    ClosedByServer,
}

/// Session-related errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// No session with this id is registered
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    /// A session with this id is already running
    #[error("Session already exists: {0}")]
    AlreadyExists(SessionId),

    /// Session is closing or closed and takes no more input
    #[error("Session closed: {0}")]
    Closed(SessionId),

    /// Input queue is at capacity; the chunk was dropped
    #[error("Input queue full for session {0}")]
    InputQueueFull(SessionId),

    /// Concurrent session cap reached
    #[error("Session limit of {0} reached")]
    LimitExceeded(usize),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Secret-store errors
#[derive(Error, Debug)]
pub enum SecretError {
    /// No token has been stored yet
    #[error("No token stored at {0}")]
    NotFound(PathBuf),

    /// A token entry exists but is blank
    #[error("Stored token is empty")]
    Empty,

    /// Reading the store failed
    #[error("Failed to read token: {0}")]
    Io(#[from] std::io::Error),
}
