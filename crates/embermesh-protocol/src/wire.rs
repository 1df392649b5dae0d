//! Wire encoding of everything the transport carries
//!
//! A single closed sum type covers the data plane and the control plane;
//! the inbound dispatch point matches on it exhaustively.

use serde::{Deserialize, Serialize};

use crate::control::{Ack, RouteError, RouteReply, RouteRequest, TopologyAnnouncement};
use crate::envelope::Envelope;
use crate::error::{ProtocolError, Result};

/// Maximum size of a single wire message (1 MiB)
pub const MAX_WIRE_SIZE: usize = 1024 * 1024;

/// Everything that can cross a link between two peers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    /// Application data envelope
    Envelope(Envelope),
    /// Periodic adjacency broadcast
    Topology(TopologyAnnouncement),
    /// Reactive route discovery request
    RouteRequest(RouteRequest),
    /// Reactive route discovery answer
    RouteReply(RouteReply),
    /// Broken-path notice
    RouteError(RouteError),
    /// Receipt confirmation
    Ack(Ack),
}

impl WireMessage {
    /// Encode for the transport
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes =
            bincode::serialize(self).map_err(|e| ProtocolError::EncodeFailed(e.to_string()))?;

        if bytes.len() > MAX_WIRE_SIZE {
            return Err(ProtocolError::WireTooLarge {
                size: bytes.len(),
                max: MAX_WIRE_SIZE,
            });
        }

        Ok(bytes)
    }

    /// Decode bytes received from the transport
    pub fn decode(bytes: &[u8]) -> Result<WireMessage> {
        if bytes.len() > MAX_WIRE_SIZE {
            return Err(ProtocolError::WireTooLarge {
                size: bytes.len(),
                max: MAX_WIRE_SIZE,
            });
        }

        bincode::deserialize(bytes).map_err(|e| ProtocolError::DecodeFailed(e.to_string()))
    }

    /// Short name for logging
    pub fn kind_name(&self) -> &'static str {
        match self {
            WireMessage::Envelope(_) => "envelope",
            WireMessage::Topology(_) => "topology",
            WireMessage::RouteRequest(_) => "route-request",
            WireMessage::RouteReply(_) => "route-reply",
            WireMessage::RouteError(_) => "route-error",
            WireMessage::Ack(_) => "ack",
        }
    }
}
