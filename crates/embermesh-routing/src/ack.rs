//! Acknowledgment tracking with bounded retry
//!
//! Per-message state machine: Pending -> Acked (terminal), or on each
//! deadline expiry a retransmission until the attempt budget is spent,
//! then Failed (terminal, surfaced to the caller). Peer loss immediately
//! fails every entry addressed to that peer.

use embermesh_protocol::{Envelope, MessageId, PeerId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// An envelope awaiting acknowledgment
#[derive(Debug, Clone)]
pub struct PendingAck {
    /// Kept whole so a retry can re-enter the outbound queue
    pub envelope: Envelope,
    /// Peer expected to acknowledge
    pub target: PeerId,
    /// Retransmissions performed so far
    pub attempts: u32,
    /// When the next retransmission is due
    pub deadline: Instant,
}

/// Work produced by one tracker tick
#[derive(Debug, Default)]
pub struct AckTick {
    /// Envelopes to re-enqueue (attempt budget remains)
    pub retries: Vec<Envelope>,
    /// Deliveries that exhausted their attempts
    pub failures: Vec<(MessageId, PeerId)>,
}

/// Tracks unacknowledged envelopes and their retry budget
#[derive(Debug)]
pub struct AckTracker {
    timeout: Duration,
    max_attempts: u32,
    pending: HashMap<MessageId, PendingAck>,
}

impl AckTracker {
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        AckTracker {
            timeout,
            max_attempts,
            pending: HashMap::new(),
        }
    }

    /// Start tracking an envelope sent to `target`
    pub fn track(&mut self, envelope: Envelope, target: PeerId) {
        let id = envelope.id;
        self.pending.insert(
            id,
            PendingAck {
                envelope,
                target,
                attempts: 0,
                deadline: Instant::now() + self.timeout,
            },
        );
    }

    /// Terminal: the matching ack arrived. Returns true when the id was
    /// actually being tracked.
    pub fn on_ack(&mut self, id: &MessageId) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Collect due retries and exhausted entries
    pub fn tick(&mut self) -> AckTick {
        let now = Instant::now();
        let mut outcome = AckTick::default();
        let mut exhausted = Vec::new();

        for (id, entry) in self.pending.iter_mut() {
            if entry.deadline > now {
                continue;
            }

            if entry.attempts < self.max_attempts {
                entry.attempts += 1;
                entry.deadline = now + self.timeout;
                outcome.retries.push(entry.envelope.clone());
            } else {
                exhausted.push(*id);
            }
        }

        for id in exhausted {
            if let Some(entry) = self.pending.remove(&id) {
                outcome.failures.push((id, entry.target));
            }
        }

        outcome
    }

    /// Peer loss: fail every entry addressed to `peer` immediately
    pub fn fail_peer(&mut self, peer: &PeerId) -> Vec<MessageId> {
        let failed: Vec<MessageId> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.target == *peer)
            .map(|(id, _)| *id)
            .collect();

        for id in &failed {
            self.pending.remove(id);
        }
        failed
    }

    /// Entries still waiting
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
