//! Time-windowed message deduplication
//!
//! The sole mechanism preventing relay loops and duplicate delivery in a
//! flooding mesh. `should_process` is the check-and-mark primitive every
//! inbound handler calls first; callers hold the cache's write lock, so
//! one call observes and records an identity in a single critical section.

use embermesh_protocol::MessageId;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Seen-identity tracking with a freshness window and bounded capacity
#[derive(Debug)]
pub struct DeduplicationCache {
    capacity: usize,
    window: Duration,
    records: HashMap<MessageId, Instant>,
    /// Insertion order for oldest-first pruning; entries whose instant no
    /// longer matches the map are leftovers from a re-mark and are skipped.
    order: VecDeque<(MessageId, Instant)>,
}

impl DeduplicationCache {
    /// Create a cache holding at most `capacity` records, each fresh for
    /// `window` after first sight
    pub fn new(capacity: usize, window: Duration) -> Self {
        DeduplicationCache {
            capacity,
            window,
            records: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Check-and-mark: true exactly once per freshness window for an id
    pub fn should_process(&mut self, id: MessageId) -> bool {
        if self.is_fresh(&id) {
            return false;
        }
        self.mark(id);
        true
    }

    /// Read-only variant for diagnostics, honoring the same expiry
    pub fn has_seen(&self, id: &MessageId) -> bool {
        self.is_fresh(id)
    }

    /// Record an identity without checking it first
    pub fn mark(&mut self, id: MessageId) {
        let now = Instant::now();
        self.records.insert(id, now);
        self.order.push_back((id, now));

        if self.records.len() > self.capacity {
            self.prune_oldest();
        }
    }

    /// Physically remove records older than the freshness window
    pub fn sweep_expired(&mut self) {
        let window = self.window;
        self.records.retain(|_, first_seen| first_seen.elapsed() <= window);
        let records = &self.records;
        self.order
            .retain(|(id, seen)| records.get(id) == Some(seen));
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is recorded
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn is_fresh(&self, id: &MessageId) -> bool {
        self.records
            .get(id)
            .map(|first_seen| first_seen.elapsed() <= self.window)
            .unwrap_or(false)
    }

    /// Drop the oldest ~10% of records by first sight, independent of expiry
    fn prune_oldest(&mut self) {
        let target = (self.capacity / 10).max(1);
        let mut removed = 0;

        while removed < target {
            match self.order.pop_front() {
                Some((id, seen)) => {
                    // Skip stale order entries left behind by a re-mark
                    if self.records.get(&id) == Some(&seen) {
                        self.records.remove(&id);
                        removed += 1;
                    }
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embermesh_protocol::PeerId;

    fn id(byte: u8) -> MessageId {
        MessageId::from_bytes([byte; 16])
    }

    #[tokio::test]
    async fn test_should_process_is_true_exactly_once() {
        let mut cache = DeduplicationCache::new(100, Duration::from_secs(300));

        assert!(cache.should_process(id(1)));
        assert!(!cache.should_process(id(1)));
        assert!(!cache.should_process(id(1)));

        // A different identity is unaffected
        assert!(cache.should_process(id(2)));
    }

    #[tokio::test]
    async fn test_has_seen_does_not_mark() {
        let mut cache = DeduplicationCache::new(100, Duration::from_secs(300));

        assert!(!cache.has_seen(&id(1)));
        cache.mark(id(1));
        assert!(cache.has_seen(&id(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_expires_after_window() {
        let mut cache = DeduplicationCache::new(100, Duration::from_secs(300));

        assert!(cache.should_process(id(1)));
        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!cache.should_process(id(1)));

        tokio::time::advance(Duration::from_secs(2)).await;
        // Expired record reads as not-seen and can be re-marked
        assert!(!cache.has_seen(&id(1)));
        assert!(cache.should_process(id(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired_records() {
        let mut cache = DeduplicationCache::new(100, Duration::from_secs(10));

        cache.mark(id(1));
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.mark(id(2));

        tokio::time::advance(Duration::from_secs(6)).await;
        cache.sweep_expired();

        assert_eq!(cache.len(), 1);
        assert!(cache.has_seen(&id(2)));
        assert!(!cache.has_seen(&id(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_prunes_oldest_tenth() {
        let mut cache = DeduplicationCache::new(50, Duration::from_secs(300));

        for byte in 0..51u8 {
            cache.mark(id(byte));
            tokio::time::advance(Duration::from_millis(1)).await;
        }

        // 51st insert pushed out the oldest 5 (10% of 50)
        assert_eq!(cache.len(), 46);
        for byte in 0..5u8 {
            assert!(!cache.has_seen(&id(byte)));
        }
        assert!(cache.has_seen(&id(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remark_refreshes_first_seen() {
        let mut cache = DeduplicationCache::new(100, Duration::from_secs(10));

        cache.mark(id(1));
        tokio::time::advance(Duration::from_secs(11)).await;

        // Second sighting after expiry opens a new window
        assert!(cache.should_process(id(1)));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(cache.has_seen(&id(1)));

        cache.sweep_expired();
        assert_eq!(cache.len(), 1);
    }
}
