//! Builder for [`UnitAgent`]
//!
//! Collaborators are injected as trait objects so the same agent runs
//! against the simulated engine in tests and a live engine in production.

use std::sync::{Arc, Mutex};

use shoal_backup::{BackupAgent, BackupCoordinator};
use shoal_credentials::CredentialManager;
use shoal_engine::DatabaseEngine;
use shoal_health::{Boundary, BoundaryGuard, GuardConfig};
use shoal_membership::{ReconfigConfig, Reconfigurator};
use shoal_provision::{ProvisionConfig, RelationUserProvisioner, ShardingCoordinator};
use shoal_tls::{CertificateAuthority, CertificateCoordinator, TlsConfig};
use shoal_topology::TopologyStore;
use shoal_types::UnitId;

use crate::agent::UnitAgent;
use crate::audit::EventAggregator;
use crate::error::{ControlError, Result};
use crate::retry::{RetryQueue, RetryQueueConfig};
use crate::status::StatusBoard;

pub struct UnitAgentBuilder {
    unit: UnitId,
    address: String,
    store: Option<Arc<dyn TopologyStore>>,
    engine: Option<Arc<dyn DatabaseEngine>>,
    authority: Option<Arc<dyn CertificateAuthority>>,
    backup_agent: Option<Arc<dyn BackupAgent>>,
    events: Option<EventAggregator>,
    reconfig: ReconfigConfig,
    provision: ProvisionConfig,
    tls: TlsConfig,
    retry_queue: RetryQueueConfig,
    engine_guard: GuardConfig,
    authority_guard: GuardConfig,
    storage_guard: GuardConfig,
}

impl UnitAgentBuilder {
    /// `address` is the `host:port` other members reach this unit on.
    pub fn new(unit: UnitId, address: impl Into<String>) -> Self {
        Self {
            unit,
            address: address.into(),
            store: None,
            engine: None,
            authority: None,
            backup_agent: None,
            events: None,
            reconfig: ReconfigConfig::default(),
            provision: ProvisionConfig::default(),
            tls: TlsConfig::default(),
            retry_queue: RetryQueueConfig::default(),
            engine_guard: GuardConfig::default(),
            authority_guard: GuardConfig::default(),
            storage_guard: GuardConfig::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn TopologyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn DatabaseEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_certificate_authority(mut self, authority: Arc<dyn CertificateAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn with_backup_agent(mut self, agent: Arc<dyn BackupAgent>) -> Self {
        self.backup_agent = Some(agent);
        self
    }

    /// Share an audit stream between agents. Each agent gets its own
    /// otherwise.
    pub fn with_events(mut self, events: EventAggregator) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_reconfig_config(mut self, config: ReconfigConfig) -> Self {
        self.reconfig = config;
        self
    }

    pub fn with_provision_config(mut self, config: ProvisionConfig) -> Self {
        self.provision = config;
        self
    }

    pub fn with_tls_config(mut self, config: TlsConfig) -> Self {
        self.tls = config;
        self
    }

    pub fn with_retry_queue_config(mut self, config: RetryQueueConfig) -> Self {
        self.retry_queue = config;
        self
    }

    pub fn with_guard_config(mut self, boundary: Boundary, config: GuardConfig) -> Self {
        match boundary {
            Boundary::Engine => self.engine_guard = config,
            Boundary::CertificateAuthority => self.authority_guard = config,
            Boundary::ObjectStorage => self.storage_guard = config,
        }
        self
    }

    pub fn build(self) -> Result<UnitAgent> {
        let store = self
            .store
            .ok_or_else(|| ControlError::InvalidRequest("store required".into()))?;
        let engine = self
            .engine
            .ok_or_else(|| ControlError::InvalidRequest("engine required".into()))?;
        let authority = self
            .authority
            .ok_or_else(|| ControlError::InvalidRequest("certificate authority required".into()))?;
        let backup_agent = self
            .backup_agent
            .ok_or_else(|| ControlError::InvalidRequest("backup agent required".into()))?;
        if self.address.is_empty() {
            return Err(ControlError::InvalidRequest("address required".into()));
        }

        let unit = self.unit;
        let engine_guard = Arc::new(BoundaryGuard::new(Boundary::Engine, self.engine_guard));
        let authority_guard = Arc::new(BoundaryGuard::new(
            Boundary::CertificateAuthority,
            self.authority_guard,
        ));
        let storage_guard = Arc::new(BoundaryGuard::new(
            Boundary::ObjectStorage,
            self.storage_guard,
        ));

        let credentials = Arc::new(CredentialManager::new(
            unit.clone(),
            store.clone(),
            engine.clone(),
            engine_guard.clone(),
        ));

        Ok(UnitAgent {
            membership: Reconfigurator::new(
                unit.clone(),
                store.clone(),
                engine.clone(),
                engine_guard.clone(),
                self.reconfig,
            ),
            provisioner: RelationUserProvisioner::new(
                unit.clone(),
                store.clone(),
                engine.clone(),
                engine_guard.clone(),
                self.provision,
            ),
            sharding: ShardingCoordinator::new(
                unit.clone(),
                store.clone(),
                engine,
                engine_guard,
                credentials.clone(),
            ),
            certificates: CertificateCoordinator::new(
                unit.clone(),
                store.clone(),
                authority,
                authority_guard,
                self.tls,
            ),
            backups: BackupCoordinator::new(
                unit.clone(),
                store.clone(),
                backup_agent,
                storage_guard,
            ),
            credentials,
            events: self.events.unwrap_or_default(),
            retries: Mutex::new(RetryQueue::new(self.retry_queue)),
            board: Mutex::new(StatusBoard::new()),
            address: self.address,
            store,
            unit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_backup::InMemoryBackupAgent;
    use shoal_engine::SimulatedEngine;
    use shoal_tls::MockCertificateAuthority;
    use shoal_topology::InMemoryTopologyStore;

    #[test]
    fn test_missing_dependency_rejected() {
        let result = UnitAgentBuilder::new(UnitId::new("shoal/0"), "10.0.0.1:27017")
            .with_engine(Arc::new(SimulatedEngine::new()))
            .build();
        assert!(matches!(
            result,
            Err(ControlError::InvalidRequest(msg)) if msg == "store required"
        ));
    }

    #[test]
    fn test_build_with_all_dependencies() {
        let agent = UnitAgentBuilder::new(UnitId::new("shoal/0"), "10.0.0.1:27017")
            .with_store(Arc::new(InMemoryTopologyStore::new()))
            .with_engine(Arc::new(SimulatedEngine::new()))
            .with_certificate_authority(Arc::new(MockCertificateAuthority::new()))
            .with_backup_agent(Arc::new(InMemoryBackupAgent::new("shoal")))
            .build()
            .unwrap();
        assert_eq!(agent.unit().as_str(), "shoal/0");
        assert_eq!(agent.pending_retries(), 0);
    }
}
