//! Error types for resim-engine

use resim_core::InstanceId;
use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum Error {
    /// An operation referenced an instance the control context never
    /// registered (or already unregistered)
    #[error("unknown instance {0}")]
    UnknownInstance(InstanceId),

    /// A frame-indexed input was offered to an instance that is not under
    /// the buffered input policy
    #[error("instance {0} has no buffered input ring")]
    NotBuffered(InstanceId),

    /// Netcode error (wire codec, input ring)
    #[error(transparent)]
    Netcode(#[from] resim_netcode::Error),

    /// History error (rollback outside the retained window)
    #[error(transparent)]
    History(#[from] resim_history::HistoryError),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
