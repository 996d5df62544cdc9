//! TLS certificate material.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::credential::Secret;

/// Which certificate a piece of material belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertScope {
    /// Shared by all members for intra-cluster TLS.
    Internal,
    /// Per member, client facing.
    External,
}

impl fmt::Display for CertScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertScope::Internal => write!(f, "internal"),
            CertScope::External => write!(f, "external"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CertificateState {
    #[default]
    Unset,
    Requested,
    Issued,
    Renewing,
}

impl fmt::Display for CertificateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateState::Unset => write!(f, "unset"),
            CertificateState::Requested => write!(f, "requested"),
            CertificateState::Issued => write!(f, "issued"),
            CertificateState::Renewing => write!(f, "renewing"),
        }
    }
}

/// Key, request and certificate for one scope.
///
/// While `Renewing`, `certificate` and `private_key` stay the active pair and
/// `pending_key` holds the key behind the outstanding `csr` when it differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMaterial {
    pub scope: CertScope,
    pub state: CertificateState,
    pub private_key: Option<Secret>,
    #[serde(default)]
    pub pending_key: Option<Secret>,
    pub csr: Option<String>,
    pub certificate: Option<String>,
    pub ca: Option<String>,
    #[serde(default)]
    pub chain: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CertificateMaterial {
    pub fn unset(scope: CertScope) -> Self {
        Self {
            scope,
            state: CertificateState::Unset,
            private_key: None,
            pending_key: None,
            csr: None,
            certificate: None,
            ca: None,
            chain: Vec::new(),
            expires_at: None,
        }
    }

    /// True when a certificate is currently serving traffic.
    pub fn is_active(&self) -> bool {
        self.certificate.is_some()
            && matches!(
                self.state,
                CertificateState::Issued | CertificateState::Renewing
            )
    }

    pub fn awaiting(&self, csr: &str) -> bool {
        matches!(
            self.state,
            CertificateState::Requested | CertificateState::Renewing
        ) && self.csr.as_deref() == Some(csr)
    }
}
