//! Control-plane messages: topology announcements, reactive route
//! discovery and acknowledgments
//!
//! Control messages share the envelope's identity and flood discipline
//! (TTL + visited set) but never travel through the data priority queue.

use serde::{Deserialize, Serialize};

use crate::envelope::{now_millis, MessageId};
use crate::types::PeerId;

/// One peer's locally observed adjacency at a point in time
///
/// Relayed up to `ttl` hops; the receiving topology table replaces its
/// snapshot for `sender` wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyAnnouncement {
    /// Unique announcement identifier
    pub id: MessageId,

    /// Peer whose adjacency this describes
    pub sender: PeerId,

    /// The sender's direct neighbors at `timestamp`
    pub neighbors: Vec<PeerId>,

    /// Observation time (Unix time in milliseconds)
    pub timestamp: u64,

    /// Maximum hops this announcement may travel
    pub ttl: u8,

    /// Hops already travelled
    pub hop_count: u8,

    /// Relays this announcement passed through
    pub visited: Vec<PeerId>,
}

impl TopologyAnnouncement {
    /// Create a fresh announcement for `sender`
    pub fn new(sender: PeerId, neighbors: Vec<PeerId>, ttl: u8) -> Self {
        let timestamp = now_millis();
        TopologyAnnouncement {
            id: MessageId::generate(&sender, timestamp, rand::random::<u64>()),
            sender,
            neighbors,
            timestamp,
            ttl,
            hop_count: 0,
            visited: Vec::new(),
        }
    }

    /// Whether the announcement is older than `threshold_ms` at `now_ms`
    pub fn is_stale(&self, now_ms: u64, threshold_ms: u64) -> bool {
        now_ms.saturating_sub(self.timestamp) > threshold_ms
    }

    /// Produce the copy a relay forwards onward, or None when the TTL is
    /// exhausted or the local peer already relayed it
    pub fn relay_copy(&self, local: PeerId) -> Option<TopologyAnnouncement> {
        if self.hop_count >= self.ttl || self.visited.contains(&local) || self.sender == local {
            return None;
        }

        let mut copy = self.clone();
        copy.hop_count += 1;
        copy.visited.push(local);
        Some(copy)
    }
}

/// On-demand route discovery request, flooded toward `destination`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Unique request identifier (dedup key)
    pub request_id: MessageId,

    /// Peer that needs the route
    pub origin: PeerId,

    /// Peer being looked for
    pub destination: PeerId,

    /// Maximum hops this request may travel
    pub ttl: u8,

    /// Hops already travelled
    pub hop_count: u8,

    /// Relays between the origin and the current holder, in order
    pub path_so_far: Vec<PeerId>,
}

impl RouteRequest {
    /// Create a fresh request at `origin`
    pub fn new(origin: PeerId, destination: PeerId, ttl: u8) -> Self {
        RouteRequest {
            request_id: MessageId::random(&origin),
            origin,
            destination,
            ttl,
            hop_count: 0,
            path_so_far: Vec::new(),
        }
    }

    /// Produce the copy a relay floods onward, accumulating itself on the
    /// path; None when the TTL is exhausted or the peer already forwarded it
    pub fn forwarded(&self, local: PeerId) -> Option<RouteRequest> {
        if self.hop_count >= self.ttl
            || self.path_so_far.contains(&local)
            || self.origin == local
        {
            return None;
        }

        let mut copy = self.clone();
        copy.hop_count += 1;
        copy.path_so_far.push(local);
        Some(copy)
    }
}

/// Answer to a RouteRequest, retraced hop by hop toward the origin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteReply {
    /// The request this answers
    pub request_id: MessageId,

    /// Peer that asked
    pub origin: PeerId,

    /// Peer that was looked for
    pub destination: PeerId,

    /// Relays between origin (exclusive) and the replying peer (inclusive)
    pub path: Vec<PeerId>,

    /// Hops this reply has travelled back so far
    pub hop_count: u8,
}

impl RouteReply {
    /// The origin's next hop toward the destination
    pub fn first_hop(&self) -> Option<PeerId> {
        self.path.first().copied()
    }

    /// The peer this reply should be handed to next on its way back to
    /// the origin, given the peer currently holding it
    pub fn next_toward_origin(&self, holder: &PeerId) -> Option<PeerId> {
        let pos = self.path.iter().position(|p| p == holder)?;
        if pos == 0 {
            Some(self.origin)
        } else {
            Some(self.path[pos - 1])
        }
    }
}

/// Notice that a previously advertised path no longer works
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteError {
    /// Unique error identifier (dedup key)
    pub id: MessageId,

    /// Destination whose route broke
    pub destination: PeerId,

    /// The next hop that stopped working
    pub broken_next_hop: PeerId,

    /// Peer that observed the failure
    pub reporter: PeerId,
}

impl RouteError {
    /// Create a route error reported by `reporter`
    pub fn new(reporter: PeerId, destination: PeerId, broken_next_hop: PeerId) -> Self {
        RouteError {
            id: MessageId::random(&reporter),
            destination,
            broken_next_hop,
            reporter,
        }
    }
}

/// Receipt confirmation for an envelope with `requires_ack`
///
/// Routed hop by hop back toward the envelope's sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    /// The envelope being acknowledged
    pub message_id: MessageId,

    /// Peer that received the envelope
    pub from: PeerId,

    /// The envelope's original sender, who is waiting on this ack
    pub to: PeerId,
}
