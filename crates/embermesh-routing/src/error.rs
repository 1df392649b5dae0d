//! Routing error types

use embermesh_protocol::PeerId;
use thiserror::Error;

/// Routing-specific errors
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("No route to destination {0}")]
    NoRoute(PeerId),

    #[error("Local delivery channel closed")]
    DeliveryChannelClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] embermesh_protocol::ProtocolError),
}

/// Result type for routing operations
pub type Result<T> = std::result::Result<T, RoutingError>;
