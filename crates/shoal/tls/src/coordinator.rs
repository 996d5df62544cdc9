//! Certificate lifecycle per scope.
//!
//! `Unset -> Requested -> Issued -> Renewing -> Issued`, and back to
//! `Unset` when the certificates relation is removed. External material is
//! unit data owned by each member; internal material is application data
//! written by the leader and read by every member.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use shoal_health::BoundaryGuard;
use shoal_topology::{mutate, LeaderLease, TopologyError, TopologyStore};
use shoal_types::{
    CertScope, CertificateDelivery, CertificateMaterial, CertificateState, Secret, UnitId,
};

use crate::authority::CertificateAuthority;
use crate::config::{FallbackPolicy, TlsConfig};
use crate::csr;
use crate::error::{Result, TlsError};
use crate::keys::{generate_private_key, parse_private_key};

const SCOPES: [CertScope; 2] = [CertScope::External, CertScope::Internal];

pub struct CertificateCoordinator {
    unit: UnitId,
    store: Arc<dyn TopologyStore>,
    authority: Arc<dyn CertificateAuthority>,
    guard: Arc<BoundaryGuard>,
    config: TlsConfig,
}

impl CertificateCoordinator {
    pub fn new(
        unit: UnitId,
        store: Arc<dyn TopologyStore>,
        authority: Arc<dyn CertificateAuthority>,
        guard: Arc<BoundaryGuard>,
        config: TlsConfig,
    ) -> Self {
        Self {
            unit,
            store,
            authority,
            guard,
            config,
        }
    }

    /// `lease` if it is ours and still current.
    async fn leader<'a>(&self, lease: Option<&'a LeaderLease>) -> Result<Option<&'a LeaderLease>> {
        let Some(lease) = lease.filter(|l| l.holder == self.unit) else {
            return Ok(None);
        };
        match self.store.verify_lease(lease).await {
            Ok(()) => Ok(Some(lease)),
            Err(TopologyError::LeaseRevoked { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Scopes this unit may act on right now.
    async fn scopes<'a>(
        &self,
        lease: Option<&'a LeaderLease>,
    ) -> Result<(Vec<CertScope>, Option<&'a LeaderLease>)> {
        let leader = self.leader(lease).await?;
        let scopes = SCOPES
            .into_iter()
            .filter(|s| *s == CertScope::External || leader.is_some())
            .collect();
        Ok((scopes, leader))
    }

    pub async fn material(&self, scope: CertScope) -> Result<CertificateMaterial> {
        let stored = match scope {
            CertScope::External => self
                .store
                .load_unit(&self.unit)
                .await?
                .and_then(|d| d.external_certificate),
            CertScope::Internal => self.store.load().await?.value.internal_certificate,
        };
        Ok(stored.unwrap_or_else(|| CertificateMaterial::unset(scope)))
    }

    async fn save(&self, lease: Option<&LeaderLease>, material: CertificateMaterial) -> Result<()> {
        match material.scope {
            CertScope::External => {
                let mut data = self.store.load_unit(&self.unit).await?.unwrap_or_default();
                data.external_certificate = Some(material);
                self.store.commit_unit(&self.unit, &data).await?;
                Ok(())
            }
            CertScope::Internal => {
                let lease = lease.ok_or(TlsError::NotLeader)?;
                mutate(self.store.as_ref(), lease, |state| {
                    state.internal_certificate = Some(material.clone());
                    Ok::<_, TlsError>(())
                })
                .await
                .map_err(|e| match e {
                    TlsError::Topology(TopologyError::LeaseRevoked { .. }) => {
                        TlsError::LostLeadership("certificate update")
                    }
                    other => other,
                })
            }
        }
    }

    /// Subject and SANs for a request.
    async fn identity(&self, scope: CertScope) -> Result<(String, Vec<String>)> {
        match scope {
            CertScope::Internal => {
                let app = self.unit.app().to_string();
                Ok((app.clone(), vec![app]))
            }
            CertScope::External => {
                let subject = self.unit.as_str().replace('/', "-");
                let mut sans = vec![subject.clone()];
                if let Some(data) = self.store.load_unit(&self.unit).await? {
                    let host = data
                        .address
                        .rsplit_once(':')
                        .map_or(data.address.as_str(), |(host, _)| host);
                    if !host.is_empty() {
                        sans.push(host.to_string());
                    }
                }
                Ok((subject, sans))
            }
        }
    }

    /// Build and submit a request, keeping any active certificate in place
    /// until its replacement arrives.
    async fn request(
        &self,
        lease: Option<&LeaderLease>,
        material: CertificateMaterial,
        new_key: Option<Secret>,
    ) -> Result<CertificateMaterial> {
        let scope = material.scope;
        let key_pem = new_key
            .or_else(|| material.private_key.clone())
            .unwrap_or_else(generate_private_key);
        let key = parse_private_key(&key_pem)?;
        let (subject, sans) = self.identity(scope).await?;
        let request = csr::build(&key, &subject, &sans)?;

        let (authority, unit, pem) = (self.authority.as_ref(), &self.unit, request.as_str());
        self.guard
            .call("submit_csr", move || authority.submit(unit, scope, pem))
            .await?;

        let mut next = material;
        if next.is_active() {
            next.state = CertificateState::Renewing;
            next.pending_key = (next.private_key.as_ref() != Some(&key_pem)).then_some(key_pem);
        } else {
            next.state = CertificateState::Requested;
            next.private_key = Some(key_pem);
            next.pending_key = None;
        }
        next.csr = Some(request);
        self.save(lease, next.clone()).await?;

        info!(%scope, state = %next.state, "Certificate requested");
        Ok(next)
    }

    /// Request certificates for every scope that has none.
    #[instrument(skip(self, lease), fields(unit = %self.unit))]
    pub async fn on_relation_available(
        &self,
        lease: Option<&LeaderLease>,
    ) -> Result<Vec<CertScope>> {
        let (scopes, leader) = self.scopes(lease).await?;
        let mut requested = Vec::new();
        for scope in scopes {
            let material = self.material(scope).await?;
            if material.state == CertificateState::Unset {
                self.request(leader, material, None).await?;
                requested.push(scope);
            }
        }
        Ok(requested)
    }

    /// Replace the key for `scope` with `key`, or a generated one, and
    /// request a certificate for it. Internal keys are leader-only.
    #[instrument(skip(self, lease, key), fields(unit = %self.unit, %scope))]
    pub async fn set_private_key(
        &self,
        lease: Option<&LeaderLease>,
        scope: CertScope,
        key: Option<Secret>,
    ) -> Result<CertificateMaterial> {
        let leader = self.leader(lease).await?;
        if scope == CertScope::Internal && leader.is_none() {
            return Err(TlsError::NotLeader);
        }
        let key = match key {
            Some(key) => {
                parse_private_key(&key)?;
                key
            }
            None => generate_private_key(),
        };
        let material = self.material(scope).await?;
        self.request(leader, material, Some(key)).await
    }

    /// Store a certificate delivered by the authority.
    ///
    /// Deliveries are matched to the outstanding request; anything else is
    /// stale and ignored.
    #[instrument(skip(self, lease, delivery), fields(unit = %self.unit))]
    pub async fn on_certificate_available(
        &self,
        lease: Option<&LeaderLease>,
        delivery: &CertificateDelivery,
    ) -> Result<Option<CertScope>> {
        let (scopes, leader) = self.scopes(lease).await?;
        for scope in scopes {
            let mut material = self.material(scope).await?;
            if !material.awaiting(&delivery.csr) {
                continue;
            }
            if let Some(key) = material.pending_key.take() {
                material.private_key = Some(key);
            }
            material.certificate = Some(delivery.certificate.clone());
            material.ca = Some(delivery.ca.clone());
            material.chain = delivery.chain.clone();
            material.expires_at = Some(delivery.expires_at);
            material.state = CertificateState::Issued;
            self.save(leader, material).await?;

            info!(%scope, expires_at = %delivery.expires_at, "Certificate issued");
            return Ok(Some(scope));
        }
        debug!("Ignoring certificate for a request that is not outstanding");
        Ok(None)
    }

    /// Renew certificates inside the renewal window, reusing their keys.
    pub async fn check_expiry(
        &self,
        lease: Option<&LeaderLease>,
        now: DateTime<Utc>,
    ) -> Result<Vec<CertScope>> {
        let window = chrono::Duration::from_std(self.config.renew_before)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        let (scopes, leader) = self.scopes(lease).await?;
        let mut renewed = Vec::new();
        for scope in scopes {
            let material = self.material(scope).await?;
            let due = material.state == CertificateState::Issued
                && material.expires_at.is_some_and(|at| at - window <= now);
            if due {
                self.request(leader, material, None).await?;
                renewed.push(scope);
            }
        }
        Ok(renewed)
    }

    /// Drop material after the certificates relation is removed.
    #[instrument(skip(self, lease), fields(unit = %self.unit))]
    pub async fn on_certificates_removed(
        &self,
        lease: Option<&LeaderLease>,
    ) -> Result<FallbackPolicy> {
        let (scopes, leader) = self.scopes(lease).await?;
        for scope in scopes {
            if self.material(scope).await?.state != CertificateState::Unset {
                self.save(leader, CertificateMaterial::unset(scope)).await?;
                info!(%scope, "Certificate removed");
            }
        }
        Ok(self.config.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::MockCertificateAuthority;
    use shoal_health::{Boundary, GuardConfig, RetryConfig};
    use shoal_topology::{InMemoryTopologyStore, UnitData};
    use std::time::Duration;

    struct Fixture {
        store: InMemoryTopologyStore,
        ca: MockCertificateAuthority,
        lease: LeaderLease,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = InMemoryTopologyStore::new();
            let lease = store.acquire_lease(&UnitId::new("shoal/0")).await.unwrap();
            for (unit, addr) in [("shoal/0", "10.0.0.1:27017"), ("shoal/1", "10.0.0.2:27017")] {
                store
                    .commit_unit(&UnitId::new(unit), &UnitData::at(addr))
                    .await
                    .unwrap();
            }
            Self {
                store,
                ca: MockCertificateAuthority::new(),
                lease,
            }
        }

        fn coordinator(&self, unit: &str) -> CertificateCoordinator {
            CertificateCoordinator::new(
                UnitId::new(unit),
                Arc::new(self.store.clone()),
                Arc::new(self.ca.clone()),
                Arc::new(BoundaryGuard::new(
                    Boundary::CertificateAuthority,
                    GuardConfig {
                        retry: RetryConfig::once(Duration::from_secs(5)),
                        ..Default::default()
                    },
                )),
                TlsConfig::default(),
            )
        }
    }

    #[tokio::test]
    async fn test_leader_requests_both_scopes() {
        let fx = Fixture::new().await;
        let tls = fx.coordinator("shoal/0");

        let requested = tls.on_relation_available(Some(&fx.lease)).await.unwrap();
        assert_eq!(requested, vec![CertScope::External, CertScope::Internal]);
        assert_eq!(fx.ca.submissions().len(), 2);

        let external = tls.material(CertScope::External).await.unwrap();
        assert_eq!(external.state, CertificateState::Requested);
        let request = csr::parse(external.csr.as_deref().unwrap()).unwrap();
        assert_eq!(request.subject, "shoal-0");
        assert!(request.sans.contains(&"10.0.0.1".to_string()));

        // Replaying does not send new requests.
        assert!(tls.on_relation_available(Some(&fx.lease)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_follower_requests_external_only() {
        let fx = Fixture::new().await;
        let tls = fx.coordinator("shoal/1");
        let requested = tls.on_relation_available(Some(&fx.lease)).await.unwrap();
        assert_eq!(requested, vec![CertScope::External]);

        let err = tls
            .set_private_key(None, CertScope::Internal, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TlsError::NotLeader));
    }

    #[tokio::test]
    async fn test_delivery_issues_and_stale_is_ignored() {
        let fx = Fixture::new().await;
        let tls = fx.coordinator("shoal/0");
        tls.on_relation_available(Some(&fx.lease)).await.unwrap();

        let stale = fx.ca.issue("not-a-request", chrono::Duration::days(90));
        assert_eq!(
            tls.on_certificate_available(Some(&fx.lease), &stale).await.unwrap(),
            None
        );

        let submission = fx.ca.last_request(CertScope::Internal).unwrap();
        let delivery = fx.ca.issue(&submission.csr, chrono::Duration::days(90));
        assert_eq!(
            tls.on_certificate_available(Some(&fx.lease), &delivery)
                .await
                .unwrap(),
            Some(CertScope::Internal)
        );
        let internal = tls.material(CertScope::Internal).await.unwrap();
        assert_eq!(internal.state, CertificateState::Issued);
        assert!(internal.is_active());

        // Another member sees the shared internal material.
        let other = fx.coordinator("shoal/1");
        assert_eq!(other.material(CertScope::Internal).await.unwrap(), internal);
    }

    #[tokio::test]
    async fn test_renewal_keeps_old_certificate_until_replaced() {
        let fx = Fixture::new().await;
        let tls = fx.coordinator("shoal/1");
        tls.on_relation_available(None).await.unwrap();
        let first = fx.ca.last_request(CertScope::External).unwrap();
        tls.on_certificate_available(None, &fx.ca.issue(&first.csr, chrono::Duration::days(3)))
            .await
            .unwrap();
        let issued = tls.material(CertScope::External).await.unwrap();

        let renewed = tls.check_expiry(None, Utc::now()).await.unwrap();
        assert_eq!(renewed, vec![CertScope::External]);
        let renewing = tls.material(CertScope::External).await.unwrap();
        assert_eq!(renewing.state, CertificateState::Renewing);
        assert_eq!(renewing.certificate, issued.certificate);
        assert_eq!(renewing.private_key, issued.private_key);
        assert_ne!(renewing.csr, issued.csr);

        let second = fx.ca.last_request(CertScope::External).unwrap();
        tls.on_certificate_available(None, &fx.ca.issue(&second.csr, chrono::Duration::days(90)))
            .await
            .unwrap();
        let reissued = tls.material(CertScope::External).await.unwrap();
        assert_eq!(reissued.state, CertificateState::Issued);
        assert_ne!(reissued.certificate, issued.certificate);
        assert!(tls.check_expiry(None, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_key_applies_on_delivery() {
        let fx = Fixture::new().await;
        let tls = fx.coordinator("shoal/1");
        tls.on_relation_available(None).await.unwrap();
        let first = fx.ca.last_request(CertScope::External).unwrap();
        tls.on_certificate_available(None, &fx.ca.issue(&first.csr, chrono::Duration::days(90)))
            .await
            .unwrap();
        let old_key = tls.material(CertScope::External).await.unwrap().private_key;

        let supplied = generate_private_key();
        let material = tls
            .set_private_key(None, CertScope::External, Some(supplied.clone()))
            .await
            .unwrap();
        assert_eq!(material.state, CertificateState::Renewing);
        assert_eq!(material.private_key, old_key);
        assert_eq!(material.pending_key, Some(supplied.clone()));

        let second = fx.ca.last_request(CertScope::External).unwrap();
        tls.on_certificate_available(None, &fx.ca.issue(&second.csr, chrono::Duration::days(90)))
            .await
            .unwrap();
        let material = tls.material(CertScope::External).await.unwrap();
        assert_eq!(material.private_key, Some(supplied));
        assert!(material.pending_key.is_none());
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_without_request() {
        let fx = Fixture::new().await;
        let tls = fx.coordinator("shoal/1");
        let err = tls
            .set_private_key(None, CertScope::External, Some(Secret::new("not a key")))
            .await
            .unwrap_err();
        assert!(matches!(err, TlsError::InvalidPrivateKey(_)));
        assert!(fx.ca.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_authority_defers() {
        let fx = Fixture::new().await;
        fx.ca.set_available(false);
        let tls = fx.coordinator("shoal/1");
        let err = tls.on_relation_available(None).await.unwrap_err();
        assert!(matches!(err, TlsError::Deferred(_)));
        assert_eq!(
            tls.material(CertScope::External).await.unwrap().state,
            CertificateState::Unset
        );
    }

    #[tokio::test]
    async fn test_removal_resets_material() {
        let fx = Fixture::new().await;
        let tls = fx.coordinator("shoal/0");
        tls.on_relation_available(Some(&fx.lease)).await.unwrap();
        let policy = tls.on_certificates_removed(Some(&fx.lease)).await.unwrap();
        assert_eq!(policy, FallbackPolicy::Unsecured);
        for scope in SCOPES {
            assert_eq!(
                tls.material(scope).await.unwrap().state,
                CertificateState::Unset
            );
        }
    }
}
