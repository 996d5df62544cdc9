//! Error types for certificate coordination

use thiserror::Error;

use shoal_health::{GuardError, Transient};
use shoal_topology::TopologyError;
use shoal_types::ErrorClass;

/// Failure reported by the certificate authority.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaError {
    #[error("certificate authority unavailable: {0}")]
    Unavailable(String),

    #[error("signing request rejected: {0}")]
    Rejected(String),
}

impl Transient for CaError {
    fn is_transient(&self) -> bool {
        matches!(self, CaError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("not leader")]
    NotLeader,

    #[error("lost leadership during {0}")]
    LostLeadership(&'static str),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("invalid signing request: {0}")]
    InvalidCsr(String),

    #[error("deferred: {0}")]
    Deferred(String),

    #[error("certificate authority error: {0}")]
    Authority(CaError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),
}

impl TlsError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TlsError::NotLeader => ErrorClass::Unauthorized,
            TlsError::LostLeadership(_) | TlsError::Deferred(_) => ErrorClass::Transient,
            TlsError::InvalidPrivateKey(_) | TlsError::InvalidCsr(_) => ErrorClass::Invalid,
            TlsError::Authority(e) if e.is_transient() => ErrorClass::Transient,
            TlsError::Authority(_) => ErrorClass::Internal,
            TlsError::Topology(e) if e.is_transient() => ErrorClass::Transient,
            TlsError::Topology(_) => ErrorClass::Internal,
        }
    }
}

impl From<GuardError<CaError>> for TlsError {
    fn from(err: GuardError<CaError>) -> Self {
        match err {
            GuardError::Rejected(e) => TlsError::Authority(e),
            deferred => TlsError::Deferred(deferred.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TlsError>;
