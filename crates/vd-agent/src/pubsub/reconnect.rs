//! Bounded retry for the control-server connection

use std::time::Duration;

use vd_core::config::RetryConfig;
use vd_core::VdError;

use super::PubSubClient;

/// How many times to retry and how long to wait in between
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Consecutive failed attempts tolerated before giving up
    max_attempts: u32,
    /// Delay before the first retry
    initial: Duration,
    /// Maximum delay
    max: Duration,
    /// Multiplier
    multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    jitter: f64,
}

impl RetryPolicy {
    /// Create a policy from configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.delay,
            config.max_delay,
            config.multiplier,
            config.jitter,
        )
    }

    /// Create a policy with custom parameters
    pub fn new(
        max_attempts: u32,
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial,
            max: max.max(initial),
            multiplier: multiplier.max(1.0),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Same delay every time, no jitter
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::new(max_attempts, delay, delay, 1.0, 0.0)
    }

    /// Retry budget
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Start a fresh run of attempts
    pub fn start(&self) -> RetryState {
        RetryState {
            current: self.initial,
            attempts: 0,
            policy: self.clone(),
        }
    }
}

/// Progress through a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    /// Current delay
    current: Duration,
    /// Retries handed out so far
    attempts: u32,
}

impl RetryState {
    /// Get the next delay and advance, or `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;

        let delay = self.current;

        let next = Duration::from_secs_f64(self.current.as_secs_f64() * self.policy.multiplier);
        self.current = std::cmp::min(next, self.policy.max);

        let jitter_amount = delay.as_secs_f64() * self.policy.jitter * rand::random::<f64>();
        Some(delay + Duration::from_secs_f64(jitter_amount))
    }

    /// Retries handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Restore the full budget and the initial delay
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = self.policy.initial;
    }
}

/// Keep `client` connected until the retry budget runs out.
///
/// A connection that was established and later dropped restores the full
/// budget; only consecutive failures count against it. Never returns while
/// the connection keeps coming back.
pub async fn maintain_connection(client: &PubSubClient, policy: &RetryPolicy) -> VdError {
    let mut retry = policy.start();

    loop {
        let failure = match client.connect().await {
            Ok(disconnected) => {
                retry.reset();
                disconnected.reason
            }
            Err(e) => {
                tracing::warn!("Connection attempt failed: {}", e);
                e
            }
        };

        match retry.next_delay() {
            Some(delay) => {
                tracing::info!(
                    "Reconnecting in {:?} (attempt {}/{})",
                    delay,
                    retry.attempts(),
                    policy.max_attempts()
                );
                tokio::time::sleep(delay).await;
            }
            None => {
                tracing::error!(
                    "Giving up after {} attempts: {}",
                    retry.attempts() + 1,
                    failure
                );
                return VdError::RetriesExhausted {
                    attempts: retry.attempts() + 1,
                    last: failure,
                };
            }
        }
    }
}
