//! Time-windowed duplicate suppression.
//!
//! A notification is described by a set of keys (message id, content
//! fingerprint, message id + source). If any key was recorded within the
//! window, the notification is a duplicate. Entries older than three windows
//! are purged on every check.

use std::{collections::HashMap, time::Duration};

use crate::env::Timepoint;

/// Entries live this many windows before they are purged.
pub const RETENTION_WINDOWS: u32 = 3;

/// One suppression key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Server message id.
    Message(String),
    /// Truncated, normalized content.
    Content(String),
    /// Message id scoped to the delivery source.
    Source {
        /// Server message id
        message_id: String,
        /// Delivery source label
        source: &'static str,
    },
}

/// Normalized content fingerprint: lowercase, whitespace collapsed, first
/// `chars` characters.
pub fn fingerprint(content: &str, chars: usize) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .take(chars)
        .collect()
}

/// Windowed deduplicator.
#[derive(Debug, Clone)]
pub struct Deduplicator<I> {
    window: Duration,
    entries: HashMap<DedupKey, I>,
}

impl<I: Timepoint> Deduplicator<I> {
    /// Create with the given suppression window.
    pub fn new(window: Duration) -> Self {
        Self { window, entries: HashMap::new() }
    }

    /// Returns `true` if any key was seen within the window.
    ///
    /// On a miss every key is recorded at `now`. A hit records nothing, so a
    /// stream of duplicates cannot keep extending its own window.
    pub fn check(&mut self, keys: &[DedupKey], now: I) -> bool {
        self.purge(now);

        let window = self.window;
        let duplicate = keys
            .iter()
            .any(|key| self.entries.get(key).is_some_and(|seen| seen.until(now) < window));

        if !duplicate {
            for key in keys {
                self.entries.insert(key.clone(), now);
            }
        }
        duplicate
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn purge(&mut self, now: I) {
        let retention = self.window.saturating_mul(RETENTION_WINDOWS);
        self.entries.retain(|_, seen| seen.until(now) <= retention);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    const WINDOW: Duration = Duration::from_secs(3);

    fn id(raw: &str) -> DedupKey {
        DedupKey::Message(raw.to_string())
    }

    #[test]
    fn same_key_within_window_is_duplicate() {
        let t0 = Instant::now();
        let mut dedup = Deduplicator::new(WINDOW);

        assert!(!dedup.check(&[id("m1")], t0));
        assert!(dedup.check(&[id("m1")], t0 + Duration::from_secs(2)));
        assert!(!dedup.check(&[id("m2")], t0 + Duration::from_secs(2)));
    }

    #[test]
    fn any_matching_key_suppresses() {
        let t0 = Instant::now();
        let mut dedup = Deduplicator::new(WINDOW);

        dedup.check(&[id("m1"), DedupKey::Content("hello".into())], t0);
        assert!(dedup.check(&[id("m2"), DedupKey::Content("hello".into())], t0));
    }

    #[test]
    fn duplicates_do_not_extend_the_window() {
        let t0 = Instant::now();
        let mut dedup = Deduplicator::new(WINDOW);

        dedup.check(&[id("m1")], t0);
        assert!(dedup.check(&[id("m1")], t0 + Duration::from_secs(2)));
        assert!(!dedup.check(&[id("m1")], t0 + Duration::from_secs(4)));
    }

    #[test]
    fn entries_older_than_retention_are_purged() {
        let t0 = Instant::now();
        let mut dedup = Deduplicator::new(WINDOW);

        dedup.check(&[id("m1"), id("m2")], t0);
        assert_eq!(dedup.len(), 2);

        dedup.check(&[id("m3")], t0 + Duration::from_secs(10));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn fingerprint_normalizes_and_truncates() {
        assert_eq!(fingerprint("  Hello   World ", 50), "hello world");
        assert_eq!(fingerprint("abcdef", 3), "abc");
        assert_eq!(fingerprint("ÄÖÜ", 2), "äö");
    }
}
