//! Message envelope and identity

use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ProtocolError, Result};
use crate::types::{PeerId, Recipient};

/// Size of a message ID in bytes
pub const MESSAGE_ID_SIZE: usize = 16;

/// Maximum envelope payload size (64 KiB)
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Default time-to-live in hops
pub const DEFAULT_TTL: u8 = 8;

/// Current Unix time in milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// A unique identifier for a message, announcement or route request
///
/// One identity type covers every flooded thing in the mesh so the
/// deduplication cache needs a single key domain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId([u8; MESSAGE_ID_SIZE]);

impl MessageId {
    /// Generate a message ID from the sender, creation time and a nonce
    /// Uses BLAKE2b(sender + timestamp + nonce)[0..16]
    pub fn generate(sender: &PeerId, timestamp: u64, nonce: u64) -> Self {
        let mut hasher = Blake2b512::new();

        hasher.update(sender.as_bytes());
        hasher.update(timestamp.to_le_bytes());
        hasher.update(nonce.to_le_bytes());

        let hash = hasher.finalize();

        let mut id = [0u8; MESSAGE_ID_SIZE];
        id.copy_from_slice(&hash[..MESSAGE_ID_SIZE]);

        MessageId(id)
    }

    /// Generate a fresh random ID for a locally created message
    pub fn random(sender: &PeerId) -> Self {
        Self::generate(sender, now_millis(), rand::random::<u64>())
    }

    /// Create from bytes
    pub fn from_bytes(bytes: [u8; MESSAGE_ID_SIZE]) -> Self {
        MessageId(bytes)
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_SIZE] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| ProtocolError::InvalidMessageId)?;

        if bytes.len() != MESSAGE_ID_SIZE {
            return Err(ProtocolError::InvalidMessageId);
        }

        let mut arr = [0u8; MESSAGE_ID_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(MessageId(arr))
    }
}

impl std::fmt::Debug for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageId({}...)", &self.to_hex()[..12])
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}

/// Kind of application message carried by an envelope
///
/// Each kind maps to a default numeric priority; lower numbers are served
/// first by the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Life-safety traffic, preempts everything
    Emergency,
    /// Urgent but non-life-safety notices
    Alert,
    /// Coordination of meeting points
    Meetup,
    /// Position sharing
    Location,
    /// Conversational text
    Chat,
    /// Generic request/response traffic
    Request,
}

impl MessageKind {
    /// Default priority for this kind (0 = most urgent)
    pub fn default_priority(&self) -> u8 {
        match self {
            MessageKind::Emergency => 0,
            MessageKind::Alert => 1,
            MessageKind::Meetup => 2,
            MessageKind::Location => 3,
            MessageKind::Request => 3,
            MessageKind::Chat => 4,
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Emergency => "Emergency",
            MessageKind::Alert => "Alert",
            MessageKind::Meetup => "Meetup",
            MessageKind::Location => "Location",
            MessageKind::Chat => "Chat",
            MessageKind::Request => "Request",
        }
    }
}

/// An application message travelling through the mesh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message identifier
    pub id: MessageId,

    /// Originating peer
    pub sender: PeerId,

    /// Delivery target
    pub recipient: Recipient,

    /// Application payload
    pub payload: Vec<u8>,

    /// Creation time (Unix time in milliseconds)
    pub created_at: u64,

    /// Message kind
    pub kind: MessageKind,

    /// Queue priority (0 = most urgent); defaults from `kind`
    pub priority: u8,

    /// Maximum hops this envelope may travel
    pub ttl: u8,

    /// Hops already travelled
    pub hop_count: u8,

    /// Peers this envelope has passed through, in order
    pub visited: Vec<PeerId>,

    /// Whether the recipient must acknowledge receipt
    pub requires_ack: bool,
}

impl Envelope {
    /// Create a new envelope originating at `sender`
    pub fn new(
        sender: PeerId,
        recipient: Recipient,
        kind: MessageKind,
        payload: Vec<u8>,
    ) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let created_at = now_millis();
        let id = MessageId::generate(&sender, created_at, rand::random::<u64>());

        Ok(Envelope {
            id,
            sender,
            recipient,
            payload,
            created_at,
            kind,
            priority: kind.default_priority(),
            ttl: DEFAULT_TTL,
            hop_count: 0,
            visited: Vec::new(),
            requires_ack: false,
        })
    }

    /// Override the default priority
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Override the default TTL
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Request an acknowledgment from the recipient
    pub fn with_ack(mut self) -> Self {
        self.requires_ack = true;
        self
    }

    /// Whether this envelope may travel further
    pub fn can_relay(&self) -> bool {
        self.hop_count < self.ttl
    }

    /// Whether the given peer already relayed this envelope
    pub fn was_visited(&self, peer: &PeerId) -> bool {
        self.visited.contains(peer)
    }

    /// Produce the copy a relay forwards onward
    ///
    /// Returns None when the TTL is exhausted or the local peer is already
    /// on the path; the visited set stays duplicate-free.
    pub fn relay_copy(&self, local: PeerId) -> Option<Envelope> {
        if !self.can_relay() || self.was_visited(&local) || self.sender == local {
            return None;
        }

        let mut copy = self.clone();
        copy.hop_count += 1;
        copy.visited.push(local);
        Some(copy)
    }
}
