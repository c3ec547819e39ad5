//! Recently broadcast message ids.
//!
//! A `message_created` event for an id that was fanned out less than `ttl`
//! ago is skipped. The set is a bounded LRU: when full, the least recently
//! marked id is forgotten first. Expired entries are swept from the cold end
//! on every lookup.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parley_core::MessageId;
use tokio::time::Instant;

/// Bounded, time-limited memory of delivered message ids.
///
/// Owned by the message drain task, so it needs no lock.
pub struct MessageDeduplicator {
    entries: Option<LruCache<MessageId, Instant>>,
    ttl: Duration,
}

impl MessageDeduplicator {
    /// Remember up to `capacity` ids for `ttl` each. A zero capacity
    /// disables deduplication.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
            ttl,
        }
    }

    /// A deduplicator that never reports a duplicate.
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Whether `id` was marked within the last `ttl`.
    pub fn already_sent(&mut self, id: MessageId) -> bool {
        let _ = self.sweep();
        self.entries.as_ref().is_some_and(|e| e.contains(&id))
    }

    /// Record `id` as delivered now, refreshing it if already present.
    pub fn mark_sent(&mut self, id: MessageId) {
        if let Some(entries) = &mut self.entries {
            let _ = entries.put(id, Instant::now());
        }
    }

    /// Forget entries older than `ttl`. Returns how many were removed.
    pub fn sweep(&mut self) -> usize {
        let ttl = self.ttl;
        let Some(entries) = &mut self.entries else {
            return 0;
        };
        let now = Instant::now();
        let mut removed = 0;
        loop {
            let expired = entries
                .peek_lru()
                .is_some_and(|(_, marked)| now.duration_since(*marked) > ttl);
            if !expired {
                return removed;
            }
            let _ = entries.pop_lru();
            removed += 1;
        }
    }

    /// Ids currently remembered.
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, LruCache::len)
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
