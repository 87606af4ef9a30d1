//! Agent token storage
//!
//! The registration flow issues a token once and stores it locally. The
//! transport only ever reads it, right before each connection attempt, so a
//! token rotated on disk is picked up on the next reconnect.

use std::path::{Path, PathBuf};

use crate::error::SecretError;

/// Source of the pre-issued agent token
pub trait SecretStore: Send + Sync {
    /// Fetch the current token
    fn token(&self) -> Result<String, SecretError>;
}

/// Token kept in a file, surrounding whitespace ignored
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    /// Create a store reading from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the token file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SecretStore for FileSecretStore {
    fn token(&self) -> Result<String, SecretError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SecretError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let token = content.trim();
        if token.is_empty() {
            return Err(SecretError::Empty);
        }
        tracing::trace!("Loaded agent token from {:?}", self.path);
        Ok(token.to_string())
    }
}

/// Token supplied up front (environment variable, tests)
#[derive(Debug, Clone)]
pub struct StaticSecret(String);

impl StaticSecret {
    /// Wrap a token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl SecretStore for StaticSecret {
    fn token(&self) -> Result<String, SecretError> {
        if self.0.trim().is_empty() {
            return Err(SecretError::Empty);
        }
        Ok(self.0.clone())
    }
}
