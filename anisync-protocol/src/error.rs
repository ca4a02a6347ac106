//! Protocol error types.

use thiserror::Error;

/// Errors raised while building commands or interpreting datagrams.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty reply")]
    EmptyReply,

    #[error("malformed reply header: {0:?}")]
    MalformedReply(String),

    #[error("malformed command: {0:?}")]
    MalformedCommand(String),

    #[error("unknown field {field:?} in layout {layout}")]
    UnknownField { layout: &'static str, field: String },

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether the datagram that produced this error may be retried.
    ///
    /// A reply that could not be decompressed or parsed is dropped, so the
    /// originating packet falls through to the normal retry path.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Decompress(_)
                | ProtocolError::EmptyReply
                | ProtocolError::MalformedReply(_)
                | ProtocolError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ProtocolError::Decompress("bad".into()).is_retryable());
        assert!(ProtocolError::MalformedReply("x".into()).is_retryable());
        assert!(!ProtocolError::MalformedCommand("x".into()).is_retryable());
        assert!(!ProtocolError::UnknownField {
            layout: "anime",
            field: "nope".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ProtocolError::UnknownField {
            layout: "anime",
            field: "nope".into(),
        };
        assert!(err.to_string().contains("nope"));
        assert!(err.to_string().contains("anime"));

        let err = ProtocolError::InvalidValue {
            key: "aid",
            value: "abc".into(),
        };
        assert!(err.to_string().contains("aid"));
    }
}
