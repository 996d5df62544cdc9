//! Error types for credential management

use thiserror::Error;

use shoal_engine::EngineError;
use shoal_health::GuardError;
use shoal_topology::TopologyError;
use shoal_types::ErrorClass;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("not leader")]
    NotLeader,

    #[error("lost leadership during {0}")]
    LostLeadership(&'static str),

    #[error("no such scope: {0}")]
    NoSuchScope(String),

    #[error("invalid secret: {0}")]
    InvalidSecret(String),

    /// Internal users have not been created yet.
    #[error("credentials not bootstrapped for {0}")]
    NotBootstrapped(String),

    #[error("deferred: {0}")]
    Deferred(String),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),
}

impl CredentialError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CredentialError::NotLeader => ErrorClass::Unauthorized,
            CredentialError::LostLeadership(_)
            | CredentialError::NotBootstrapped(_)
            | CredentialError::Deferred(_) => ErrorClass::Transient,
            CredentialError::NoSuchScope(_) => ErrorClass::NotFound,
            CredentialError::InvalidSecret(_) => ErrorClass::Invalid,
            CredentialError::Engine(e) if e.is_transient() => ErrorClass::Transient,
            CredentialError::Topology(e) if e.is_transient() => ErrorClass::Transient,
            CredentialError::Engine(_) | CredentialError::Topology(_) => ErrorClass::Internal,
        }
    }
}

impl From<GuardError<EngineError>> for CredentialError {
    fn from(err: GuardError<EngineError>) -> Self {
        match err {
            GuardError::Rejected(e) => CredentialError::Engine(e),
            deferred => CredentialError::Deferred(deferred.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CredentialError>;
