//! Core error types.

use anisync_protocol::ProtocolError;
use thiserror::Error;

/// Errors from the protocol engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{verb} requires a session")]
    NoSession { verb: String },

    #[error("client is banned: {reason}")]
    Banned { reason: String },

    #[error("unknown packet tag: {0}")]
    UnknownTag(u64),

    #[error("{verb} command is missing parameter {key}")]
    MissingParam { verb: String, key: &'static str },

    #[error("malformed {kind} reply: {reason}")]
    MalformedRecord { kind: &'static str, reason: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError {
    /// Returns whether this error indicates the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Io(_) | CoreError::Storage(_) => true,
            CoreError::Protocol(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns a stable identifier for logs and CLI output.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Protocol(_) => "PROTOCOL",
            CoreError::Io(_) => "IO",
            CoreError::NoSession { .. } => "NO_SESSION",
            CoreError::Banned { .. } => "BANNED",
            CoreError::UnknownTag(_) => "UNKNOWN_TAG",
            CoreError::MissingParam { .. } => "MISSING_PARAM",
            CoreError::MalformedRecord { .. } => "MALFORMED_RECORD",
            CoreError::Storage(_) => "STORAGE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CoreError::UnknownTag(3).error_code(), "UNKNOWN_TAG");
        assert_eq!(
            CoreError::Banned {
                reason: "flood".into()
            }
            .error_code(),
            "BANNED"
        );
    }

    #[test]
    fn test_retryable() {
        assert!(CoreError::Storage("disk full".into()).is_retryable());
        assert!(CoreError::Protocol(ProtocolError::Decompress("x".into())).is_retryable());
        assert!(!CoreError::Banned { reason: "x".into() }.is_retryable());
        assert!(!CoreError::NoSession { verb: "ANIME".into() }.is_retryable());
    }
}
