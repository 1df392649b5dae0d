//! Connection arbitration
//!
//! Two peers in radio range can both decide to connect at once. A
//! deterministic total order over peer identities picks the initiating
//! side, a per-peer guard keeps a single connect/accept in flight per
//! pair, and a cooldown after a failed or dropped attempt stops
//! connection storms under high peer density.

use embermesh_protocol::PeerId;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Tie-break, in-flight guard and cooldown for link setup
#[derive(Debug)]
pub struct ConnectionArbitration {
    local: PeerId,
    cooldown: Duration,
    in_flight: HashSet<PeerId>,
    /// Peers blocked from retry, with the instant the block lifts
    cooldowns: HashMap<PeerId, Instant>,
}

impl ConnectionArbitration {
    pub fn new(local: PeerId, cooldown: Duration) -> Self {
        ConnectionArbitration {
            local,
            cooldown,
            in_flight: HashSet::new(),
            cooldowns: HashMap::new(),
        }
    }

    /// Whether the local peer is the initiating side toward `remote`
    ///
    /// Byte-lexical comparison of identities; the lower-ordered peer
    /// initiates, the other only accepts.
    pub fn should_initiate(&self, remote: &PeerId) -> bool {
        self.local < *remote
    }

    /// Try to claim the single connect/accept slot for `peer`
    ///
    /// False while an attempt is already in flight or the peer is
    /// cooling down.
    pub fn try_begin(&mut self, peer: PeerId) -> bool {
        if self.in_flight.contains(&peer) || self.is_cooling_down(&peer) {
            return false;
        }
        self.in_flight.insert(peer);
        true
    }

    /// Finish the in-flight attempt for `peer`; a failure starts the
    /// cooldown window
    pub fn complete(&mut self, peer: &PeerId, success: bool) {
        self.in_flight.remove(peer);
        if success {
            self.cooldowns.remove(peer);
        } else {
            self.cooldowns.insert(*peer, Instant::now() + self.cooldown);
        }
    }

    /// Peer loss: release the slot and block immediate reconnection
    pub fn release(&mut self, peer: &PeerId) {
        self.in_flight.remove(peer);
        self.cooldowns.insert(*peer, Instant::now() + self.cooldown);
    }

    /// Whether retry toward `peer` is currently blocked
    pub fn is_cooling_down(&self, peer: &PeerId) -> bool {
        self.cooldowns
            .get(peer)
            .map(|until| Instant::now() < *until)
            .unwrap_or(false)
    }

    /// Trim expired cooldown entries
    pub fn sweep_expired(&mut self) {
        let now = Instant::now();
        self.cooldowns.retain(|_, until| now < *until);
    }

    /// Number of attempts currently in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}
