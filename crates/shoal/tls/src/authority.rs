//! The external certificate authority.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use shoal_types::{CertScope, CertificateDelivery, UnitId};

use crate::error::CaError;
use crate::keys::armour;

/// Accepts signing requests; certificates come back asynchronously as a
/// [`CertificateDelivery`] on the certificates relation.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn submit(&self, unit: &UnitId, scope: CertScope, csr: &str) -> Result<(), CaError>;
}

/// One request as received by [`MockCertificateAuthority`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub unit: UnitId,
    pub scope: CertScope,
    pub csr: String,
}

/// Records requests and issues certificates on demand.
#[derive(Clone, Default)]
pub struct MockCertificateAuthority {
    submissions: Arc<Mutex<Vec<Submission>>>,
    unavailable: Arc<AtomicBool>,
}

impl MockCertificateAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Most recent request for `scope`.
    pub fn last_request(&self, scope: CertScope) -> Option<Submission> {
        self.submissions().into_iter().rev().find(|s| s.scope == scope)
    }

    /// Sign `csr`, valid for `valid_for` from now.
    pub fn issue(&self, csr: &str, valid_for: Duration) -> CertificateDelivery {
        let serial = Uuid::new_v4();
        CertificateDelivery {
            csr: csr.to_string(),
            certificate: armour("CERTIFICATE", serial.as_bytes()),
            ca: armour("CERTIFICATE", b"shoal-mock-ca"),
            chain: vec![armour("CERTIFICATE", b"shoal-mock-root")],
            expires_at: Utc::now() + valid_for,
        }
    }
}

#[async_trait]
impl CertificateAuthority for MockCertificateAuthority {
    async fn submit(&self, unit: &UnitId, scope: CertScope, csr: &str) -> Result<(), CaError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CaError::Unavailable("no route to authority".into()));
        }
        self.submissions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Submission {
                unit: unit.clone(),
                scope,
                csr: csr.to_string(),
            });
        Ok(())
    }
}
