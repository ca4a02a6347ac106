//! Client error types.

use crate::config::ConfigError;
use anisync_core::CoreError;
use anisync_storage::StorageError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine error: {0}")]
    Core(#[from] CoreError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot resolve server address {0}")]
    Resolve(String),

    #[error("client is banned: {0}")]
    Banned(String),

    #[error("timed out waiting for the server")]
    Timeout,
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) | ClientError::Resolve(_) | ClientError::Timeout => true,
            ClientError::Core(e) => e.is_retryable(),
            _ => false,
        }
    }
}
