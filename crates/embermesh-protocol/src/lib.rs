//! Embermesh Protocol Module
//!
//! This module defines the core protocol data structures and message
//! formats for the embermesh network:
//! - Peer and message identities
//! - The application envelope with priority, TTL and route path
//! - Control messages (topology, route discovery, acknowledgments)
//! - The tagged wire encoding handed to the transport

pub mod control;
pub mod envelope;
pub mod error;
pub mod types;
pub mod wire;

pub use control::{Ack, RouteError, RouteReply, RouteRequest, TopologyAnnouncement};
pub use envelope::{Envelope, MessageId, MessageKind};
pub use error::{ProtocolError, Result};
pub use types::{PeerId, Recipient};
pub use wire::WireMessage;
