//! Events published by the engine to its subscribers.

use crate::guard::RequestKey;
use crate::record::CatalogRecord;
use anisync_protocol::ReplyCode;

/// Something the engine observed or did.
///
/// Events are published in dispatch order, so events for one tag arrive in
/// the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    LoggedIn { new_version: bool },
    LoggedOut,
    LoginFailed,
    /// The server dropped the session; the request is replayed after login.
    SessionExpired { tag: u64 },
    Banned { reason: String },

    /// A record was decoded and stored. `partial` records have a follow-up
    /// request queued for their missing fields.
    Record {
        tag: u64,
        record: CatalogRecord,
        partial: bool,
    },
    FollowUpQueued { tag: u64, followup: u64 },
    NotFound { tag: u64, key: Option<RequestKey> },
    MylistAdded { tag: u64, lid: Option<u64>, edited: bool },
    /// The reply code every completed request ended with.
    Replied { tag: u64, code: ReplyCode },
    /// Retries exhausted; the outcome of the request is unknown.
    TimedOut { tag: u64, command: String },
    /// A failed attempt was counted and the request goes out again.
    Retrying { tag: u64, retry_count: u32 },

    ExportQueued,
    ExportReady { nid: u64 },
    ExportPollExpired,
    Notification { nid: u64 },
    Diagnostic { tag: Option<u64>, code: ReplyCode, text: String },
}
