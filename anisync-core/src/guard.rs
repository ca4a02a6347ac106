//! Duplicate-request guard.

use crate::record::Subject;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Default time a subject stays claimed, in seconds.
///
/// Longer than a full retry chain (four 10 s waits plus the send cadence).
pub const DEFAULT_GUARD_EXPIRY_SECS: i64 = 60;

/// What a request is about, for duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestKey {
    Subject(Subject),
    /// A file looked up by size and hash, before its fid is known.
    FileHash { size: u64, ed2k: String },
}

impl From<Subject> for RequestKey {
    fn from(subject: Subject) -> Self {
        RequestKey::Subject(subject)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKey::Subject(s) => write!(f, "{}", s),
            RequestKey::FileHash { size, ed2k } => write!(f, "file:{}:{}", size, ed2k),
        }
    }
}

/// Remembers which subjects have a request outstanding.
///
/// An entry expires on its own so a request whose reply never arrives does
/// not block the subject forever.
pub struct InFlightRequestGuard<K> {
    entries: Mutex<HashMap<K, DateTime<Utc>>>,
    expiry: Duration,
}

impl<K: Eq + Hash + Clone> InFlightRequestGuard<K> {
    pub fn new(expiry: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            expiry,
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Claims `key`. Returns false if it is already claimed and not expired.
    pub fn try_acquire(&self, key: K, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock();
        let expiry = self.expiry;
        entries.retain(|_, since| now - *since < expiry);

        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, now);
        true
    }

    pub fn release(&self, key: &K) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Releases `key` only if it is still the claim taken at `acquired_at`.
    ///
    /// Once a claim expires the subject can be claimed again; a late release
    /// of the old claim must leave the new one alone.
    pub fn release_claim(&self, key: &K, acquired_at: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(since) if *since == acquired_at => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for InFlightRequestGuard<K> {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_GUARD_EXPIRY_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;

    #[test]
    fn test_duplicate_rejected_within_window() {
        let guard = InFlightRequestGuard::default();
        let now = Utc::now();
        let subject = Subject::new(RecordKind::Anime, 1);

        assert!(guard.try_acquire(subject, now));
        assert!(!guard.try_acquire(subject, now + Duration::seconds(59)));
        assert!(guard.try_acquire(Subject::new(RecordKind::Episode, 1), now));
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn test_expired_entry_accepted() {
        let guard = InFlightRequestGuard::new(Duration::seconds(60));
        let now = Utc::now();
        assert!(guard.try_acquire(7u64, now));
        assert!(guard.try_acquire(7u64, now + Duration::seconds(60)));
    }

    #[test]
    fn test_file_hash_keys() {
        let guard = InFlightRequestGuard::default();
        let now = Utc::now();
        let key = RequestKey::FileHash {
            size: 10,
            ed2k: "abc".into(),
        };
        assert!(guard.try_acquire(key.clone(), now));
        assert!(!guard.try_acquire(key.clone(), now));
        assert_eq!(key.to_string(), "file:10:abc");
    }

    #[test]
    fn test_release() {
        let guard = InFlightRequestGuard::default();
        let now = Utc::now();
        assert!(guard.try_acquire("a", now));
        assert!(guard.contains(&"a"));
        assert!(guard.release(&"a"));
        assert!(!guard.release(&"a"));
        assert!(guard.try_acquire("a", now));
    }

    #[test]
    fn test_stale_release_keeps_newer_claim() {
        let guard = InFlightRequestGuard::new(Duration::seconds(60));
        let first = Utc::now();
        let second = first + Duration::seconds(61);

        assert!(guard.try_acquire("a", first));
        assert!(guard.try_acquire("a", second));

        assert!(!guard.release_claim(&"a", first));
        assert!(guard.contains(&"a"));
        assert!(!guard.try_acquire("a", second + Duration::seconds(1)));

        assert!(guard.release_claim(&"a", second));
        assert!(!guard.contains(&"a"));
    }
}
