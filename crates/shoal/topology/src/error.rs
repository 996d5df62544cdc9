//! Error types for the topology store

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TopologyError {
    /// The caller's lease was superseded by a newer election.
    #[error("leader lease revoked (current epoch {current_epoch})")]
    LeaseRevoked { current_epoch: u64 },

    /// Another writer committed first.
    #[error("revision conflict: expected {expected}, found {actual}")]
    RevisionConflict { expected: u64, actual: u64 },

    /// A stored value could not be encoded or decoded.
    #[error("codec error for key {key}: {reason}")]
    Codec { key: String, reason: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl TopologyError {
    /// Both lease loss and lost races are resolved by re-reading.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TopologyError::LeaseRevoked { .. }
                | TopologyError::RevisionConflict { .. }
                | TopologyError::Storage(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TopologyError>;
