//! Error types for backup and restore

use thiserror::Error;

use shoal_health::{GuardError, Transient};
use shoal_topology::TopologyError;
use shoal_types::{BackupId, ErrorClass};

/// Failure reported by the backup agent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("backup agent unavailable: {0}")]
    Unavailable(String),

    #[error("backup agent has no storage configured")]
    NotConfigured,

    #[error("backup {0} not found in storage")]
    UnknownBackup(String),

    #[error("backup agent failed: {0}")]
    Failed(String),
}

impl Transient for AgentError {
    fn is_transient(&self) -> bool {
        matches!(self, AgentError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("not leader")]
    NotLeader,

    #[error("lost leadership during {0}")]
    LostLeadership(&'static str),

    #[error("missing object storage credentials")]
    MissingStorageCredentials,

    #[error("backup {0} is still in progress")]
    BackupInProgress(BackupId),

    #[error("unknown backup id {0:?}")]
    UnknownBackupId(String),

    /// A remap target collides with another name in the backup.
    #[error("remap conflict: {0}")]
    RemapConflict(String),

    #[error("invalid remap pattern: {0}")]
    InvalidRemap(String),

    /// A membership change is running or queued.
    #[error("cluster is reconfiguring, restore refused")]
    ClusterNotQuiesced,

    #[error("deferred: {0}")]
    Deferred(String),

    #[error("backup agent error: {0}")]
    Agent(AgentError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),
}

impl BackupError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BackupError::NotLeader => ErrorClass::Unauthorized,
            BackupError::LostLeadership(_) | BackupError::Deferred(_) => ErrorClass::Transient,
            BackupError::MissingStorageCredentials => ErrorClass::MissingDependency,
            BackupError::BackupInProgress(_)
            | BackupError::RemapConflict(_)
            | BackupError::ClusterNotQuiesced => ErrorClass::SafetyViolation,
            BackupError::UnknownBackupId(_) => ErrorClass::NotFound,
            BackupError::InvalidRemap(_) => ErrorClass::Invalid,
            BackupError::Agent(AgentError::NotConfigured) => ErrorClass::MissingDependency,
            BackupError::Agent(AgentError::UnknownBackup(_)) => ErrorClass::NotFound,
            BackupError::Agent(e) if e.is_transient() => ErrorClass::Transient,
            BackupError::Agent(_) => ErrorClass::Internal,
            BackupError::Topology(e) if e.is_transient() => ErrorClass::Transient,
            BackupError::Topology(_) => ErrorClass::Internal,
        }
    }
}

impl From<GuardError<AgentError>> for BackupError {
    fn from(err: GuardError<AgentError>) -> Self {
        match err {
            GuardError::Rejected(e) => BackupError::Agent(e),
            deferred => BackupError::Deferred(deferred.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
