//! Agent configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::retry::RetryConfig;
use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Configuration for the host agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// WebSocket endpoint of the control server's agent pub/sub channel
    pub server_url: String,

    /// Request header carrying the agent token at connect time
    pub token_header: String,

    /// Where the registration flow stored the agent token
    pub token_path: PathBuf,

    /// Interval between heartbeat frames
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Connection (handshake) timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Pending input chunks buffered per session before new input is dropped
    pub input_queue_capacity: usize,

    /// Pending output chunks buffered per session before the runner waits
    pub output_queue_capacity: usize,

    /// Frames buffered per event handler before new frames are dropped
    pub handler_queue_capacity: usize,

    /// Maximum number of concurrent sessions
    pub max_sessions: Option<usize>,

    /// Default shell to spawn
    pub default_shell: Option<String>,

    /// Default environment variables for sessions
    pub default_env: Vec<(String, String)>,

    /// Reconnect policy applied by the process supervisor
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:3000/pubsub/agente".to_string(),
            token_header: "X-Agente-Token".to_string(),
            token_path: super::default_config_dir().join("agent.token"),
            heartbeat_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            input_queue_capacity: 100,
            output_queue_capacity: 100,
            handler_queue_capacity: 256,
            max_sessions: None,
            default_shell: None,
            default_env: vec![("TERM".to_string(), "xterm-256color".to_string())],
            retry: RetryConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Reject values the agent cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server_url is empty".to_string()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "heartbeat_interval must be at least one second".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "connect_timeout must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(config.input_queue_capacity, 100);
        assert_eq!(config.output_queue_capacity, 100);
        assert_eq!(config.token_header, "X-Agente-Token");
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.max_sessions.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AgentConfig = toml::from_str(
            r#"
server_url = "wss://deploy.example.com/pubsub/agente"
heartbeat_interval = 15

[retry]
max_attempts = 10
"#,
        )
        .unwrap();

        assert_eq!(config.server_url, "wss://deploy.example.com/pubsub/agente");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.retry.delay, Duration::from_secs(5));
        assert_eq!(config.input_queue_capacity, 100);
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(AgentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_heartbeat_is_invalid() {
        let config: AgentConfig = toml::from_str("heartbeat_interval = 0").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid(message)) if message.contains("heartbeat_interval")
        ));
    }

    #[test]
    fn test_zero_connect_timeout_is_invalid() {
        let config: AgentConfig = toml::from_str("connect_timeout = 0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
