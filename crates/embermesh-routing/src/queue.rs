//! Bounded priority queue for outgoing envelopes

use embermesh_protocol::Envelope;
use std::collections::BTreeMap;

/// Ordering key: priority first, then creation time, then an insertion
/// counter so equal-priority envelopes leave in strict FIFO order.
type QueueKey = (u8, u64, u64);

/// Counters for queue admission outcomes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Envelopes accepted
    pub enqueued: u64,
    /// Resident envelopes pushed out by a more urgent arrival
    pub evicted: u64,
    /// Arrivals refused because the queue was full of more urgent work
    pub dropped: u64,
}

/// Bounded outgoing buffer ordered by priority, then arrival time
///
/// When full, an arriving envelope that is strictly more urgent than the
/// least urgent resident evicts it; anything else is silently dropped.
/// The queue therefore always holds the most urgent pending envelopes.
#[derive(Debug)]
pub struct PriorityQueue {
    entries: BTreeMap<QueueKey, Envelope>,
    capacity: usize,
    seq: u64,
    stats: QueueStats,
}

impl PriorityQueue {
    /// Create a queue holding at most `capacity` envelopes
    pub fn new(capacity: usize) -> Self {
        PriorityQueue {
            entries: BTreeMap::new(),
            capacity,
            seq: 0,
            stats: QueueStats::default(),
        }
    }

    /// Admit an envelope; never fails and never grows past capacity
    pub fn enqueue(&mut self, envelope: Envelope) {
        if self.capacity == 0 {
            self.stats.dropped += 1;
            return;
        }

        if self.entries.len() >= self.capacity {
            // Least urgent resident sits at the largest key
            match self.entries.last_key_value().map(|(key, _)| *key) {
                Some(least_urgent) if envelope.priority < least_urgent.0 => {
                    self.entries.remove(&least_urgent);
                    self.stats.evicted += 1;
                }
                _ => {
                    self.stats.dropped += 1;
                    return;
                }
            }
        }

        let key = (envelope.priority, envelope.created_at, self.seq);
        self.seq += 1;
        self.entries.insert(key, envelope);
        self.stats.enqueued += 1;
    }

    /// Remove and return the most urgent envelope
    pub fn dequeue(&mut self) -> Option<Envelope> {
        self.entries.pop_first().map(|(_, envelope)| envelope)
    }

    /// Look at the most urgent envelope without removing it
    pub fn peek(&self) -> Option<&Envelope> {
        self.entries.first_key_value().map(|(_, envelope)| envelope)
    }

    /// Number of pending envelopes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Admission counters
    pub fn stats(&self) -> QueueStats {
        self.stats
    }
}
