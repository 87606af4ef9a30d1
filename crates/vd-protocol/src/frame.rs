//! JSON text frames
//!
//! Every WebSocket text message is one frame of the shape
//! `{"type": ..., "event": ..., "data": ...}`. The agent writes
//! `subscribe`, `publish` and `heartbeat` frames and only acts on inbound
//! `event` frames; anything else the server sends (acks, subscription
//! confirmations) decodes as [`FrameType::Other`] and is ignored.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProtocolError;
use crate::event::EventKind;

/// Frame type discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    /// Declare interest in an event (agent → server)
    Subscribe,
    /// Emit an event (agent → server)
    Publish,
    /// Deliver a subscribed event (server → agent)
    Event,
    /// Keep-alive (agent → server)
    Heartbeat,
    /// Any type this agent does not act on
    #[serde(other)]
    Other,
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame type
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    /// Event name, absent on heartbeats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Opaque payload, interpreted only by handlers
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "data_as_text"
    )]
    pub data: Option<String>,
}

impl Frame {
    /// Whether this frame should be routed to event handlers
    pub fn is_dispatchable(&self) -> bool {
        self.frame_type == FrameType::Event && self.event.is_some()
    }

    /// Resolve the event name against the known kinds
    pub fn event_kind(&self) -> Result<EventKind, ProtocolError> {
        let name = self
            .event
            .as_deref()
            .ok_or(ProtocolError::MissingField("event"))?;
        EventKind::from_name(name).ok_or_else(|| ProtocolError::UnknownEvent(name.to_string()))
    }
}

/// Encode a subscribe request
pub fn encode_subscribe(event: EventKind) -> Result<String, ProtocolError> {
    let frame = Frame {
        frame_type: FrameType::Subscribe,
        event: Some(event.as_str().to_string()),
        data: None,
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Encode a publish request carrying `data`
pub fn encode_publish(event: EventKind, data: &str) -> Result<String, ProtocolError> {
    let frame = Frame {
        frame_type: FrameType::Publish,
        event: Some(event.as_str().to_string()),
        data: Some(data.to_string()),
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Encode a heartbeat
pub fn encode_heartbeat() -> Result<String, ProtocolError> {
    let frame = Frame {
        frame_type: FrameType::Heartbeat,
        event: None,
        data: None,
    };
    Ok(serde_json::to_string(&frame)?)
}

/// Decode one inbound text frame
pub fn decode(text: &str) -> Result<Frame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Servers relay payloads as strings, but a structured payload is accepted
/// and kept as its JSON text so handlers see the same thing either way.
fn data_as_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_round_trip() {
        let text = encode_subscribe(EventKind::PtyInput).unwrap();
        assert_eq!(text, r#"{"type":"subscribe","event":"pty:input"}"#);

        let frame = decode(&text).unwrap();
        assert_eq!(frame.frame_type, FrameType::Subscribe);
        assert_eq!(frame.event.as_deref(), Some("pty:input"));
        assert_eq!(frame.data, None);
    }

    #[test]
    fn test_publish_preserves_payload_exactly() {
        let payload = "line one\r\n\t\u{1b}[31mred\u{1b}[0m \"quoted\" \\ é ✓ \u{0}\u{7f}";
        let text = encode_publish(EventKind::PtyOutput, payload).unwrap();

        let frame = decode(&text).unwrap();
        assert_eq!(frame.frame_type, FrameType::Publish);
        assert_eq!(frame.event.as_deref(), Some("pty:output"));
        assert_eq!(frame.data.as_deref(), Some(payload));
    }

    #[test]
    fn test_heartbeat_shape() {
        assert_eq!(encode_heartbeat().unwrap(), r#"{"type":"heartbeat"}"#);
    }

    #[test]
    fn test_event_frame_is_dispatchable() {
        let frame =
            decode(r#"{"type":"event","event":"pty:input","data":"{\"sessionId\":\"s1\"}"}"#)
                .unwrap();
        assert!(frame.is_dispatchable());
        assert_eq!(frame.data.as_deref(), Some(r#"{"sessionId":"s1"}"#));
    }

    #[test]
    fn test_server_acks_decode_as_other() {
        let ack = decode(r#"{"type":"ack"}"#).unwrap();
        assert_eq!(ack.frame_type, FrameType::Other);
        assert!(!ack.is_dispatchable());

        let subscribed = decode(r#"{"type":"subscribed","event":"pty:input"}"#).unwrap();
        assert_eq!(subscribed.frame_type, FrameType::Other);
        assert!(!subscribed.is_dispatchable());
    }

    #[test]
    fn test_publish_frames_are_not_dispatchable() {
        let frame = decode(r#"{"type":"publish","event":"pty:input","data":"x"}"#).unwrap();
        assert!(!frame.is_dispatchable());
    }

    #[test]
    fn test_structured_data_is_kept_as_json_text() {
        let frame =
            decode(r#"{"type":"event","event":"pty:session_started","data":{"sessionId":"s9"}}"#)
                .unwrap();
        let data: serde_json::Value = serde_json::from_str(frame.data.as_deref().unwrap()).unwrap();
        assert_eq!(data["sessionId"], "s9");
    }

    #[test]
    fn test_event_kind_validation() {
        let known = decode(r#"{"type":"event","event":"pty:input","data":""}"#).unwrap();
        assert_eq!(known.event_kind().unwrap(), EventKind::PtyInput);

        let unknown = decode(r#"{"type":"event","event":"pty:resize","data":""}"#).unwrap();
        assert!(matches!(
            unknown.event_kind(),
            Err(ProtocolError::UnknownEvent(name)) if name == "pty:resize"
        ));

        let heartbeat = decode(r#"{"type":"heartbeat"}"#).unwrap();
        assert!(matches!(
            heartbeat.event_kind(),
            Err(ProtocolError::MissingField("event"))
        ));
    }

    #[test]
    fn test_malformed_frame_is_a_decode_error() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(decode(r#"{"event":"x"}"#), Err(ProtocolError::Json(_))));
    }
}
