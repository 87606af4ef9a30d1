//! Terminal runners
//!
//! A runner drives one interactive terminal for one session: it consumes
//! the session's input queue, produces its output queue, and returns when
//! the terminal ends or the session is closed.

mod native;
mod runner;

pub use native::PtyRunner;
pub use runner::{SessionIo, SessionRunner};
