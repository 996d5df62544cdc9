//! Error types for relation provisioning

use thiserror::Error;

use shoal_credentials::CredentialError;
use shoal_engine::EngineError;
use shoal_health::GuardError;
use shoal_topology::TopologyError;
use shoal_types::ErrorClass;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("not leader")]
    NotLeader,

    #[error("lost leadership during {0}")]
    LostLeadership(&'static str),

    #[error("invalid database name {name:?}: {reason}")]
    InvalidDatabaseName { name: String, reason: &'static str },

    /// Legacy and authenticated client relations cannot coexist.
    #[error("cannot have both legacy and new relations")]
    MixedRelationKinds,

    #[error("deferred: {0}")]
    Deferred(String),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),
}

impl ProvisionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProvisionError::NotLeader => ErrorClass::Unauthorized,
            ProvisionError::LostLeadership(_) | ProvisionError::Deferred(_) => {
                ErrorClass::Transient
            }
            ProvisionError::InvalidDatabaseName { .. } => ErrorClass::Invalid,
            ProvisionError::MixedRelationKinds => ErrorClass::SafetyViolation,
            ProvisionError::Credential(e) => e.class(),
            ProvisionError::Engine(e) if e.is_transient() => ErrorClass::Transient,
            ProvisionError::Topology(e) if e.is_transient() => ErrorClass::Transient,
            ProvisionError::Engine(_) | ProvisionError::Topology(_) => ErrorClass::Internal,
        }
    }
}

impl From<GuardError<EngineError>> for ProvisionError {
    fn from(err: GuardError<EngineError>) -> Self {
        match err {
            GuardError::Rejected(e) => ProvisionError::Engine(e),
            deferred => ProvisionError::Deferred(deferred.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
