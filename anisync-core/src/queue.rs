//! Outgoing packet queue with single in-flight delivery and bounded retry.

use crate::error::CoreError;
use crate::store::{OutgoingPacket, PacketStore};
use anisync_protocol::{Command, MAX_RETRIES, REPLY_TIMEOUT, TIMEOUT_CODE};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// What `on_tick` did to the in-flight packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickEffect {
    /// The reply timed out; the packet goes back into line.
    Retried { tag: u64, retry_count: u32 },
    /// Retries are exhausted; the packet is closed with `TIMEOUT`.
    TimedOut { tag: u64, command: String },
}

/// Queue over a `PacketStore`.
pub struct PacketQueue<S: PacketStore> {
    store: S,
}

impl<S: PacketStore> PacketQueue<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Queues a command and returns its tag.
    ///
    /// An identical command that has not been sent yet is not queued twice;
    /// its tag is returned instead.
    pub fn enqueue(&mut self, command: &Command) -> Result<u64, CoreError> {
        let stored = command.render();
        if let Some(tag) = self.store.find_unsent(&stored) {
            debug!("Command already queued as tag {}: {}", tag, command);
            return Ok(tag);
        }
        let tag = self.store.enqueue(&stored)?;
        debug!("Queued tag {}: {}", tag, command);
        Ok(tag)
    }

    /// Oldest waiting packet, provided nothing is in flight.
    pub fn next_sendable(&self) -> Option<OutgoingPacket> {
        if self.store.in_flight().is_some() {
            return None;
        }
        self.store.peek_next_sendable()
    }

    pub fn mark_sent(&mut self, tag: u64, at: DateTime<Utc>) -> Result<(), CoreError> {
        self.store.mark_sent(tag, at)
    }

    /// Closes a packet with the reply code it received.
    pub fn complete(&mut self, tag: u64, code: &str) -> Result<(), CoreError> {
        self.store.mark_replied(tag, code)
    }

    /// Puts a sent packet back into line without counting an attempt.
    pub fn requeue(&mut self, tag: u64) -> Result<(), CoreError> {
        self.store.requeue(tag)
    }

    /// Counts a failed attempt for `tag`.
    ///
    /// Returns `Retried` while attempts remain, otherwise closes the packet
    /// with `TIMEOUT`.
    pub fn fail_attempt(&mut self, tag: u64) -> Result<TickEffect, CoreError> {
        let packet = self.store.get(tag).ok_or(CoreError::UnknownTag(tag))?;
        if packet.retry_count < MAX_RETRIES {
            self.store.mark_retried(tag)?;
            let retry_count = packet.retry_count + 1;
            debug!("Retrying tag {} (attempt {})", tag, retry_count);
            Ok(TickEffect::Retried { tag, retry_count })
        } else {
            self.store.mark_replied(tag, TIMEOUT_CODE)?;
            warn!("Tag {} timed out after {} retries", tag, packet.retry_count);
            Ok(TickEffect::TimedOut {
                tag,
                command: packet.command,
            })
        }
    }

    /// Checks the in-flight packet against the reply timeout.
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Result<Vec<TickEffect>, CoreError> {
        let Some(packet) = self.store.in_flight() else {
            return Ok(Vec::new());
        };
        let Some(sent_at) = packet.sent_at else {
            return Ok(Vec::new());
        };

        // A clock that went backwards reads as "not yet".
        let waited = (now - sent_at).to_std().unwrap_or_default();
        if waited < REPLY_TIMEOUT {
            return Ok(Vec::new());
        }

        Ok(vec![self.fail_attempt(packet.tag)?])
    }

    pub fn get(&self, tag: u64) -> Option<OutgoingPacket> {
        self.store.get(tag)
    }

    pub fn in_flight(&self) -> Option<OutgoingPacket> {
        self.store.in_flight()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.store.pending_len()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPacketStore;
    use chrono::Duration;

    fn queue() -> PacketQueue<MemoryPacketStore> {
        PacketQueue::new(MemoryPacketStore::new())
    }

    #[test]
    fn test_enqueue_is_idempotent_until_sent() {
        let mut q = queue();
        let a = q.enqueue(&Command::episode(5)).unwrap();
        let b = q.enqueue(&Command::episode(5)).unwrap();
        assert_eq!(a, b);
        assert_eq!(q.len(), 1);

        q.mark_sent(a, Utc::now()).unwrap();
        let c = q.enqueue(&Command::episode(5)).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_single_in_flight() {
        let mut q = queue();
        let a = q.enqueue(&Command::episode(1)).unwrap();
        let b = q.enqueue(&Command::episode(2)).unwrap();

        assert_eq!(q.next_sendable().unwrap().tag, a);
        q.mark_sent(a, Utc::now()).unwrap();
        assert!(q.next_sendable().is_none());

        q.complete(a, "240").unwrap();
        assert_eq!(q.next_sendable().unwrap().tag, b);
    }

    #[test]
    fn test_retry_then_timeout() {
        let mut q = queue();
        let tag = q.enqueue(&Command::group(3)).unwrap();
        let mut now = Utc::now();

        for expected in 1..=MAX_RETRIES {
            q.mark_sent(tag, now).unwrap();
            assert!(q.on_tick(now + Duration::seconds(9)).unwrap().is_empty());

            now += Duration::seconds(10);
            let effects = q.on_tick(now).unwrap();
            assert_eq!(
                effects,
                vec![TickEffect::Retried {
                    tag,
                    retry_count: expected
                }]
            );
            assert_eq!(q.get(tag).unwrap().retry_count, expected);
            assert_eq!(q.next_sendable().unwrap().tag, tag);
        }

        q.mark_sent(tag, now).unwrap();
        now += Duration::seconds(10);
        let effects = q.on_tick(now).unwrap();
        assert_eq!(
            effects,
            vec![TickEffect::TimedOut {
                tag,
                command: "GROUP gid=3".into()
            }]
        );

        let packet = q.get(tag).unwrap();
        assert!(packet.got_reply);
        assert_eq!(packet.reply_code.as_deref(), Some(TIMEOUT_CODE));
        assert!(q.next_sendable().is_none());
        assert!(q.on_tick(now + Duration::seconds(60)).unwrap().is_empty());
    }

    #[test]
    fn test_requeue_keeps_retry_count() {
        let mut q = queue();
        let tag = q.enqueue(&Command::mylist(8)).unwrap();
        q.mark_sent(tag, Utc::now()).unwrap();
        q.fail_attempt(tag).unwrap();
        q.mark_sent(tag, Utc::now()).unwrap();
        q.requeue(tag).unwrap();

        let packet = q.next_sendable().unwrap();
        assert_eq!(packet.tag, tag);
        assert_eq!(packet.retry_count, 1);
    }

    #[test]
    fn test_backwards_clock_does_not_retry() {
        let mut q = queue();
        let tag = q.enqueue(&Command::ping()).unwrap();
        let now = Utc::now();
        q.mark_sent(tag, now).unwrap();
        assert!(q.on_tick(now - Duration::seconds(30)).unwrap().is_empty());
    }
}
