//! vd-core: Core configuration and errors for the vrdeploy agent
//!
//! This crate provides the error taxonomy, the TOML configuration model and
//! the secret-store seam shared by the agent library and binary.

pub mod config;
pub mod error;
pub mod secret;

pub use error::{ConfigError, ConnectionError, SecretError, SessionError, VdError};
pub use secret::{FileSecretStore, SecretStore, StaticSecret};
