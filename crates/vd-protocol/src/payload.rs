//! Typed payloads for terminal session events
//!
//! The frame layer treats `data` as an opaque string. These types give the
//! session handlers something structured to work with:
//!
//! | Event | Payload |
//! |---|---|
//! | `pty:session_started` | `{"sessionId": "..."}` |
//! | `pty:input` | `{"sessionId": "...", "input": "..."}` |
//! | `pty:output` | `{"session_id": "...", "output": "<base64>"}` |
//! | `pty:session_ended` | the bare session id |
//!
//! Older control planes keyed sessions by the agent's integer id
//! (`idAgente`). That key is still accepted and becomes the session id in
//! decimal form.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProtocolError;
use crate::session::SessionId;

/// Request to open a new terminal session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartedPayload {
    /// Server-assigned session id
    #[serde(
        rename = "sessionId",
        alias = "idAgente",
        deserialize_with = "session_id_from_str_or_int"
    )]
    pub session_id: SessionId,
}

/// Keystrokes addressed to one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPayload {
    /// Target session
    #[serde(
        rename = "sessionId",
        alias = "idAgente",
        deserialize_with = "session_id_from_str_or_int"
    )]
    pub session_id: SessionId,
    /// Terminal input as typed
    pub input: String,
}

impl InputPayload {
    /// Input as the raw bytes to write to the terminal
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.input.into_bytes())
    }
}

/// Terminal output published by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPayload {
    /// Originating session
    pub session_id: SessionId,
    /// Raw terminal bytes
    #[serde(with = "base64_bytes")]
    pub output: Bytes,
}

impl OutputPayload {
    /// Create an output payload
    pub fn new(session_id: SessionId, output: Bytes) -> Self {
        Self { session_id, output }
    }

    /// Serialize to the string carried in a publish frame
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse a frame's `data` into a typed payload
pub fn parse<T: DeserializeOwned>(data: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(data)?)
}

fn session_id_from_str_or_int<'de, D>(deserializer: D) -> Result<SessionId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(id) => SessionId(id),
        RawId::Number(id) => SessionId(id.to_string()),
    })
}

/// Bytes as a standard-alphabet base64 string
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(de::Error::custom)
    }
}
