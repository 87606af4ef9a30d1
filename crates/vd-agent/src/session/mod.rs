//! Terminal sessions multiplexed over the shared connection

mod lifecycle;
mod manager;
mod registry;
mod signal;

pub use lifecycle::{Session, SessionEndpoints, SessionState};
pub use manager::{SessionManager, SessionManagerConfig};
pub use registry::SessionRegistry;
pub use signal::CloseSignal;
