//! Error types for event dispatch

use thiserror::Error;

use shoal_backup::BackupError;
use shoal_credentials::CredentialError;
use shoal_membership::MembershipError;
use shoal_provision::ProvisionError;
use shoal_tls::TlsError;
use shoal_topology::TopologyError;
use shoal_types::ErrorClass;

#[derive(Debug, Error)]
pub enum ControlError {
    /// Leader-only action on a unit without the lease.
    #[error("not leader")]
    NotLeader,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Membership(#[from] MembershipError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),
}

impl ControlError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ControlError::NotLeader => ErrorClass::Unauthorized,
            ControlError::InvalidRequest(_) => ErrorClass::Invalid,
            ControlError::Membership(e) => e.class(),
            ControlError::Credential(e) => e.class(),
            ControlError::Provision(e) => e.class(),
            ControlError::Tls(e) => e.class(),
            ControlError::Backup(e) => e.class(),
            ControlError::Topology(e) if e.is_transient() => ErrorClass::Transient,
            ControlError::Topology(_) => ErrorClass::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
