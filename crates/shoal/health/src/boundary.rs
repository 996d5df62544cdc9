//! Collaborator boundaries and transient-failure classification.

use serde::{Deserialize, Serialize};
use std::fmt;

use shoal_engine::EngineError;

/// External collaborators the control loop may block on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Boundary {
    Engine,
    CertificateAuthority,
    ObjectStorage,
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::Engine => write!(f, "engine"),
            Boundary::CertificateAuthority => write!(f, "certificate-authority"),
            Boundary::ObjectStorage => write!(f, "object-storage"),
        }
    }
}

/// Errors that may succeed when simply tried again later.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for EngineError {
    fn is_transient(&self) -> bool {
        EngineError::is_transient(self)
    }
}
