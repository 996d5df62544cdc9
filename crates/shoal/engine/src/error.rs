//! Error types for engine calls

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine unreachable: {0}")]
    Unreachable(String),

    #[error("engine call timed out")]
    Timeout,

    /// The submitted config version was not current + 1.
    #[error("replica set version conflict: expected {expected}, got {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("replica set not initialised")]
    NotInitialised,

    #[error("replica set already initialised")]
    AlreadyInitialised,

    /// Command must run on the primary and this member is not it.
    #[error("not primary")]
    NotPrimary,

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("user already exists: {0}")]
    UserExists(String),

    #[error("engine rejected command: {0}")]
    CommandFailed(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Unreachable(_) | EngineError::Timeout | EngineError::NotPrimary
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
