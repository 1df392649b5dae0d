//! Core protocol types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProtocolError;

/// Size of a peer ID in bytes (16 bytes / 128 bits)
pub const PEER_ID_SIZE: usize = 16;

/// A unique identifier for a peer in the mesh
///
/// Ordered byte-lexically; the total order is what connection arbitration
/// uses to pick the initiating side of a link.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId([u8; PEER_ID_SIZE]);

impl PeerId {
    /// Create a PeerId from a byte array
    pub fn from_bytes(bytes: [u8; PEER_ID_SIZE]) -> Self {
        PeerId(bytes)
    }

    /// Get the bytes of this PeerId
    pub fn as_bytes(&self) -> &[u8; PEER_ID_SIZE] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self, ProtocolError> {
        let bytes = hex::decode(s).map_err(|_| ProtocolError::InvalidPeerId)?;

        if bytes.len() != PEER_ID_SIZE {
            return Err(ProtocolError::InvalidPeerId);
        }

        let mut arr = [0u8; PEER_ID_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(PeerId(arr))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.to_hex())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

/// Delivery target of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    /// A single peer
    Peer(PeerId),
    /// Every reachable peer
    Broadcast,
}

impl Recipient {
    /// Check if this recipient names a specific peer
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Recipient::Peer(id) => Some(*id),
            Recipient::Broadcast => None,
        }
    }

    /// Check if the given peer is addressed by this recipient
    pub fn addresses(&self, peer: &PeerId) -> bool {
        match self {
            Recipient::Peer(id) => id == peer,
            Recipient::Broadcast => true,
        }
    }
}
