//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding frames and payloads
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame or payload was not valid JSON for the expected shape
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A field required for this frame type was absent
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Event name outside the known set
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
}
