//! Error types for protocol operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Wire message too large: {size} bytes (max: {max})")]
    WireTooLarge { size: usize, max: usize },

    #[error("TTL exhausted")]
    TtlExhausted,

    #[error("Invalid peer ID")]
    InvalidPeerId,

    #[error("Invalid message ID")]
    InvalidMessageId,

    #[error("Encoding failed: {0}")]
    EncodeFailed(String),

    #[error("Decoding failed: {0}")]
    DecodeFailed(String),
}
