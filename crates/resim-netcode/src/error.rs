//! Error types for resim-netcode

use thiserror::Error;

/// Netcode error type
#[derive(Debug, Error)]
pub enum Error {
    /// Input ring overflow
    #[error("input ring full, cannot buffer more inputs")]
    InputRingFull,

    /// Wire payload ended before the declared shape was complete
    #[error("unexpected end of wire payload at offset {0}")]
    UnexpectedEof(usize),

    /// The declared future-delta exceeds the configured cap
    #[error("future delta {got} exceeds configured maximum {max}")]
    FutureDeltaTooLarge { got: u8, max: u8 },

    /// A wire payload referenced a kind id this side has not registered
    #[error("unknown kind id {0} in wire payload")]
    UnknownKind(u16),

    /// An authoritative frame could not be mapped into the local frame line
    #[error("authoritative frame {frame} with offset {offset} is outside the local frame line")]
    OffsetOutOfRange { frame: u64, offset: i64 },

    /// Typed payload blob failed to (de)serialize
    #[error("payload codec error: {0}")]
    Payload(#[from] bincode::Error),
}

/// Result type for netcode operations
pub type Result<T> = std::result::Result<T, Error>;
