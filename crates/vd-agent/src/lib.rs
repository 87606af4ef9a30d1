//! vd-agent: Host-resident remote-management agent
//!
//! The agent dials out to the control server over one authenticated
//! WebSocket, subscribes to its events, and multiplexes any number of
//! interactive terminal sessions over that single connection.

pub mod pty;
pub mod pubsub;
pub mod queue;
pub mod session;
pub mod state;

pub use state::AgentState;
