//! vd-protocol: Wire protocol for the vrdeploy agent
//!
//! This crate defines the JSON text frames exchanged between the agent and
//! the control server over a single publish/subscribe WebSocket, plus the
//! typed payloads carried by the terminal session events.

pub mod error;
pub mod event;
pub mod frame;
pub mod payload;
pub mod session;

pub use error::ProtocolError;
pub use event::EventKind;
pub use frame::{decode, encode_heartbeat, encode_publish, encode_subscribe, Frame, FrameType};
pub use payload::{InputPayload, OutputPayload, SessionStartedPayload};
pub use session::SessionId;
