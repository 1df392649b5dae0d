//! Transport collaborator seam
//!
//! The routing core never owns sockets or radios; everything physical
//! lives behind this trait. The embedding layer implements it and feeds
//! inbound bytes and link events back through the router's
//! `handle_inbound` / `on_peer_connected` / `on_peer_lost` entry points.

use crate::error::Result;
use embermesh_protocol::PeerId;

/// Byte-level link to directly connected peers
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Hand encoded bytes to the link toward `peer`
    ///
    /// `peer` is always a direct neighbor; multi-hop forwarding is the
    /// router's business, not the transport's.
    async fn send_to_peer(&self, peer: PeerId, bytes: Vec<u8>) -> Result<()>;
}
