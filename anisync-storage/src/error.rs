//! Storage error types.

use anisync_core::CoreError;
use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid record header at offset {offset}: {reason}")]
    InvalidHeader { offset: u64, reason: String },

    #[error("corrupted record at offset {offset}: expected crc {expected:08x}, got {actual:08x}")]
    CorruptedRecord {
        offset: u64,
        expected: u32,
        actual: u32,
    },

    #[error("record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("data corruption: {0}")]
    Corruption(String),
}

impl StorageError {
    /// Damage found while reading the journal, as opposed to an I/O failure.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidHeader { .. }
                | StorageError::CorruptedRecord { .. }
                | StorageError::RecordTooLarge { .. }
                | StorageError::Corruption(_)
        )
    }
}

impl From<StorageError> for CoreError {
    fn from(e: StorageError) -> Self {
        CoreError::Storage(e.to_string())
    }
}
