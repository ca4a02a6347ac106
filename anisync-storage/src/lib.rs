//! # anisync-storage
//!
//! Storage layer for anisync.
//!
//! This crate provides:
//! - A checksummed, append-only packet journal implementing `PacketStore`
//! - A catalog store persisting one JSON file per record kind

pub mod catalog;
pub mod error;
pub mod frame;
pub mod journal;

pub use catalog::JsonCatalogStore;
pub use error::StorageError;
pub use frame::{Frame, FrameType, FRAME_HEADER_SIZE, JOURNAL_MAGIC, MAX_FRAME_SIZE};
pub use journal::{CompactionResult, JournalPacketStore};
