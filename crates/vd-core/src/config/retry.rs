//! Reconnect policy configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// How the supervisor retries a dropped or failed connection.
///
/// The defaults are a fixed five second delay and five attempts. Raising
/// `multiplier` above 1.0 turns the fixed delay into exponential backoff
/// capped at `max_delay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Consecutive failed attempts tolerated before giving up
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_secs")]
    pub delay: Duration,

    /// Upper bound for the delay
    #[serde(with = "duration_secs")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each attempt
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 1.0,
            jitter: 0.0,
        }
    }
}
