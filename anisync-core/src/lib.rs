//! # anisync-core
//!
//! Client engine for the anisync catalog protocol.
//!
//! This crate provides:
//! - A durable-by-contract packet queue with single in-flight delivery and
//!   bounded retry
//! - The session/authentication/ban state machine
//! - A duplicate-request guard keyed by catalog subject
//! - Typed catalog records and the reply decoders that build them
//! - The response dispatcher and the tick-driven `ProtocolEngine`

pub mod decode;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod event;
pub mod guard;
pub mod notify;
pub mod queue;
pub mod record;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{ResponseDispatcher, Route};
pub use engine::{
    Credentials, EngineConfig, EnqueueResult, MylistAdd, ProtocolEngine, TickSummary,
};
pub use error::CoreError;
pub use event::EngineEvent;
pub use guard::{InFlightRequestGuard, RequestKey};
pub use notify::{ExportPoller, PollAction};
pub use queue::{PacketQueue, TickEffect};
pub use record::{
    AnimeInfo, CatalogRecord, EpisodeInfo, FileInfo, GroupInfo, MylistEntry, Notification,
    NotificationSource, RecordKind, Subject,
};
pub use session::{SessionPhase, SessionState};
pub use store::{
    CatalogStore, MemoryCatalog, MemoryPacketStore, OutgoingPacket, PacketOp, PacketStore,
};
pub use transport::{DatagramSocket, Transport};
