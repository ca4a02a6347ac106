//! Persistence contracts for outgoing packets and catalog records.
//!
//! The engine only talks to these traits. `MemoryPacketStore` and
//! `MemoryCatalog` live here; the durable implementations live in
//! `anisync-storage`.

use crate::error::CoreError;
use crate::record::{CatalogRecord, RecordKind};
use anisync_protocol::FieldMask;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A queued command and its delivery state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingPacket {
    pub tag: u64,
    /// Stored command form, without session and tag.
    pub command: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub got_reply: bool,
    pub reply_code: Option<String>,
    pub retry_count: u32,
}

impl OutgoingPacket {
    pub fn new(tag: u64, command: impl Into<String>) -> Self {
        Self {
            tag,
            command: command.into(),
            sent_at: None,
            got_reply: false,
            reply_code: None,
            retry_count: 0,
        }
    }

    /// Sent and still waiting for its reply.
    pub fn is_in_flight(&self) -> bool {
        self.sent_at.is_some() && !self.got_reply
    }

    /// Waiting to be sent.
    pub fn is_sendable(&self) -> bool {
        self.sent_at.is_none() && !self.got_reply
    }
}

/// A single state change of the packet table.
///
/// Durable stores write these as journal records and rebuild the table by
/// applying them in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PacketOp {
    Enqueued { tag: u64, command: String },
    Sent { tag: u64, at: DateTime<Utc> },
    Replied { tag: u64, code: String },
    Retried { tag: u64 },
    Requeued { tag: u64 },
}

impl PacketOp {
    pub fn tag(&self) -> u64 {
        match self {
            PacketOp::Enqueued { tag, .. }
            | PacketOp::Sent { tag, .. }
            | PacketOp::Replied { tag, .. }
            | PacketOp::Retried { tag }
            | PacketOp::Requeued { tag } => *tag,
        }
    }
}

/// Storage for outgoing packets.
///
/// Writes are fallible because durable stores hit the disk; reads come from
/// the in-memory table every implementation keeps.
pub trait PacketStore {
    /// Stores a new command and returns its tag.
    fn enqueue(&mut self, command: &str) -> Result<u64, CoreError>;

    fn mark_sent(&mut self, tag: u64, at: DateTime<Utc>) -> Result<(), CoreError>;

    fn mark_replied(&mut self, tag: u64, code: &str) -> Result<(), CoreError>;

    /// Clears `sent_at` and bumps the retry count.
    fn mark_retried(&mut self, tag: u64) -> Result<(), CoreError>;

    /// Clears `sent_at`, leaving the retry count alone.
    fn requeue(&mut self, tag: u64) -> Result<(), CoreError>;

    /// Oldest packet that was never sent and has no reply.
    fn peek_next_sendable(&self) -> Option<OutgoingPacket>;

    fn get(&self, tag: u64) -> Option<OutgoingPacket>;

    /// Tag of an unsent, unreplied packet with exactly this command.
    fn find_unsent(&self, command: &str) -> Option<u64>;

    /// The packet sent and not yet answered, if any.
    fn in_flight(&self) -> Option<OutgoingPacket>;

    /// Total number of packets, completed ones included.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Packets without a reply.
    fn pending_len(&self) -> usize;
}

/// In-memory packet table.
#[derive(Debug, Default, Clone)]
pub struct MemoryPacketStore {
    packets: BTreeMap<u64, OutgoingPacket>,
    next_tag: u64,
}

impl MemoryPacketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag the next enqueue will get. Tags start at 1; 0 is the tagless
    /// reply marker.
    pub fn next_tag(&self) -> u64 {
        self.next_tag.max(1)
    }

    /// Raises the next tag to at least `tag`. Used when a compacted journal
    /// no longer holds the packet that carried the highest tag.
    pub fn bump_next_tag(&mut self, tag: u64) {
        self.next_tag = self.next_tag.max(tag);
    }

    /// Applies one state change. Unknown tags are ignored so a journal with
    /// a lost record still replays.
    pub fn apply(&mut self, op: &PacketOp) {
        match op {
            PacketOp::Enqueued { tag, command } => {
                self.packets
                    .insert(*tag, OutgoingPacket::new(*tag, command.clone()));
                self.next_tag = self.next_tag.max(tag + 1);
            }
            PacketOp::Sent { tag, at } => {
                if let Some(p) = self.packets.get_mut(tag) {
                    p.sent_at = Some(*at);
                }
            }
            PacketOp::Replied { tag, code } => {
                if let Some(p) = self.packets.get_mut(tag) {
                    p.got_reply = true;
                    p.reply_code = Some(code.clone());
                }
            }
            PacketOp::Retried { tag } => {
                if let Some(p) = self.packets.get_mut(tag) {
                    p.sent_at = None;
                    p.retry_count += 1;
                }
            }
            PacketOp::Requeued { tag } => {
                if let Some(p) = self.packets.get_mut(tag) {
                    p.sent_at = None;
                }
            }
        }
    }

    /// Builds the op for an enqueue without applying it.
    pub fn enqueue_op(&self, command: &str) -> PacketOp {
        PacketOp::Enqueued {
            tag: self.next_tag(),
            command: command.to_string(),
        }
    }

    /// Returns an error if `tag` is not in the table.
    pub fn check(&self, tag: u64) -> Result<(), CoreError> {
        if self.packets.contains_key(&tag) {
            Ok(())
        } else {
            Err(CoreError::UnknownTag(tag))
        }
    }

    pub fn packets(&self) -> impl Iterator<Item = &OutgoingPacket> {
        self.packets.values()
    }
}

impl PacketStore for MemoryPacketStore {
    fn enqueue(&mut self, command: &str) -> Result<u64, CoreError> {
        let op = self.enqueue_op(command);
        let tag = op.tag();
        self.apply(&op);
        Ok(tag)
    }

    fn mark_sent(&mut self, tag: u64, at: DateTime<Utc>) -> Result<(), CoreError> {
        self.check(tag)?;
        self.apply(&PacketOp::Sent { tag, at });
        Ok(())
    }

    fn mark_replied(&mut self, tag: u64, code: &str) -> Result<(), CoreError> {
        self.check(tag)?;
        self.apply(&PacketOp::Replied {
            tag,
            code: code.to_string(),
        });
        Ok(())
    }

    fn mark_retried(&mut self, tag: u64) -> Result<(), CoreError> {
        self.check(tag)?;
        self.apply(&PacketOp::Retried { tag });
        Ok(())
    }

    fn requeue(&mut self, tag: u64) -> Result<(), CoreError> {
        self.check(tag)?;
        self.apply(&PacketOp::Requeued { tag });
        Ok(())
    }

    fn peek_next_sendable(&self) -> Option<OutgoingPacket> {
        self.packets.values().find(|p| p.is_sendable()).cloned()
    }

    fn get(&self, tag: u64) -> Option<OutgoingPacket> {
        self.packets.get(&tag).cloned()
    }

    fn find_unsent(&self, command: &str) -> Option<u64> {
        self.packets
            .values()
            .find(|p| p.is_sendable() && p.command == command)
            .map(|p| p.tag)
    }

    fn in_flight(&self) -> Option<OutgoingPacket> {
        self.packets.values().find(|p| p.is_in_flight()).cloned()
    }

    fn len(&self) -> usize {
        self.packets.len()
    }

    fn pending_len(&self) -> usize {
        self.packets.values().filter(|p| !p.got_reply).count()
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Storage for decoded catalog records.
pub trait CatalogStore: Send + Sync {
    /// Inserts a record, merging into an existing one of the same kind and id.
    fn upsert(&self, record: CatalogRecord) -> Result<(), CoreError>;

    fn exists(&self, kind: RecordKind, id: u64) -> bool;

    fn get(&self, kind: RecordKind, id: u64) -> Option<CatalogRecord>;

    /// Fields already held for a mask-driven record.
    fn known_fields(&self, kind: RecordKind, id: u64) -> Option<FieldMask> {
        self.get(kind, id).and_then(|r| r.known_mask())
    }
}

/// Catalog kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    records: DashMap<(RecordKind, u64), CatalogRecord>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of one kind, ordered by id.
    pub fn records_of(&self, kind: RecordKind) -> Vec<CatalogRecord> {
        let mut out: Vec<CatalogRecord> = self
            .records
            .iter()
            .filter(|e| e.key().0 == kind)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|r| r.id());
        out
    }
}

impl CatalogStore for MemoryCatalog {
    fn upsert(&self, record: CatalogRecord) -> Result<(), CoreError> {
        let key = (record.kind(), record.id());
        match self.records.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut e) => e.get_mut().merge(record),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(record);
            }
        }
        Ok(())
    }

    fn exists(&self, kind: RecordKind, id: u64) -> bool {
        self.records.contains_key(&(kind, id))
    }

    fn get(&self, kind: RecordKind, id: u64) -> Option<CatalogRecord> {
        self.records.get(&(kind, id)).map(|r| r.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AnimeInfo;
    use anisync_protocol::FieldBag;

    #[test]
    fn test_tags_start_at_one() {
        let mut store = MemoryPacketStore::new();
        assert_eq!(store.enqueue("PING").unwrap(), 1);
        assert_eq!(store.enqueue("LOGOUT").unwrap(), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.pending_len(), 2);
    }

    #[test]
    fn test_packet_lifecycle() {
        let mut store = MemoryPacketStore::new();
        let tag = store.enqueue("EPISODE eid=2").unwrap();
        assert_eq!(store.peek_next_sendable().unwrap().tag, tag);
        assert_eq!(store.find_unsent("EPISODE eid=2"), Some(tag));

        let now = Utc::now();
        store.mark_sent(tag, now).unwrap();
        assert!(store.peek_next_sendable().is_none());
        assert_eq!(store.in_flight().unwrap().sent_at, Some(now));
        assert_eq!(store.find_unsent("EPISODE eid=2"), None);

        store.mark_retried(tag).unwrap();
        let p = store.get(tag).unwrap();
        assert_eq!(p.retry_count, 1);
        assert!(p.sent_at.is_none());

        store.mark_sent(tag, now).unwrap();
        store.requeue(tag).unwrap();
        assert_eq!(store.get(tag).unwrap().retry_count, 1);

        store.mark_replied(tag, "240").unwrap();
        let p = store.get(tag).unwrap();
        assert!(p.got_reply);
        assert_eq!(p.reply_code.as_deref(), Some("240"));
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut store = MemoryPacketStore::new();
        assert!(matches!(
            store.mark_sent(9, Utc::now()),
            Err(CoreError::UnknownTag(9))
        ));
    }

    #[test]
    fn test_replay_restores_next_tag() {
        let mut store = MemoryPacketStore::new();
        store.apply(&PacketOp::Enqueued {
            tag: 7,
            command: "PING".into(),
        });
        store.apply(&PacketOp::Replied {
            tag: 7,
            code: "300".into(),
        });
        assert_eq!(store.next_tag(), 8);
        assert_eq!(store.enqueue("PING").unwrap(), 8);
    }

    #[test]
    fn test_packet_op_json() {
        let op = PacketOp::Retried { tag: 4 };
        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(json, r#"{"op":"retried","tag":4}"#);
    }

    #[test]
    fn test_catalog_upsert_merges() {
        let catalog = MemoryCatalog::new();
        let mut a = FieldBag::new();
        a.insert("year".into(), "2001".into());
        catalog
            .upsert(CatalogRecord::Anime(AnimeInfo::new(1, a)))
            .unwrap();

        let mut b = FieldBag::new();
        b.insert("episodes".into(), "26".into());
        catalog
            .upsert(CatalogRecord::Anime(AnimeInfo::new(1, b)))
            .unwrap();

        assert!(catalog.exists(RecordKind::Anime, 1));
        assert!(!catalog.exists(RecordKind::File, 1));
        assert_eq!(catalog.len(), 1);

        let known = catalog.known_fields(RecordKind::Anime, 1).unwrap();
        assert_eq!(known.to_hex(), "20008000000000");
        assert!(catalog.known_fields(RecordKind::Anime, 2).is_none());
    }
}
