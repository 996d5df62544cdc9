//! In-memory topology store for development and testing.
//!
//! Holds application state in its encoded data-bag form so that every read
//! and commit goes through the same codec a peer-relation backend would use.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use shoal_types::{DataBag, UnitId};

use crate::codec;
use crate::error::{Result, TopologyError};
use crate::lease::LeaderLease;
use crate::state::{TopologyState, UnitData};
use crate::store::{TopologyStore, Versioned};

#[derive(Default)]
struct AppData {
    bag: DataBag,
    revision: u64,
    lease: Option<LeaderLease>,
    epoch: u64,
}

/// In-memory topology store shared by several simulated units.
#[derive(Clone, Default)]
pub struct InMemoryTopologyStore {
    app: Arc<RwLock<AppData>>,
    units: Arc<DashMap<UnitId, UnitData>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryTopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoded application data as a peer would see it.
    pub async fn databag(&self) -> DataBag {
        self.app.read().await.bag.clone()
    }

    pub async fn revision(&self) -> u64 {
        self.app.read().await.revision
    }

    /// Make every call fail with a storage error until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TopologyError::Storage("peer data unavailable".into()));
        }
        Ok(())
    }

    fn check_lease(app: &AppData, lease: &LeaderLease) -> Result<()> {
        match &app.lease {
            Some(current) if current.same_term(lease) => Ok(()),
            _ => Err(TopologyError::LeaseRevoked {
                current_epoch: app.epoch,
            }),
        }
    }
}

#[async_trait]
impl TopologyStore for InMemoryTopologyStore {
    async fn load(&self) -> Result<Versioned<TopologyState>> {
        self.check_available()?;
        let app = self.app.read().await;
        Ok(Versioned {
            revision: app.revision,
            value: codec::decode(&app.bag)?,
        })
    }

    async fn commit(
        &self,
        lease: &LeaderLease,
        expected_revision: u64,
        state: &TopologyState,
    ) -> Result<u64> {
        self.check_available()?;
        let bag = codec::encode(state)?;

        let mut app = self.app.write().await;
        Self::check_lease(&app, lease)?;
        if app.revision != expected_revision {
            return Err(TopologyError::RevisionConflict {
                expected: expected_revision,
                actual: app.revision,
            });
        }

        app.bag = bag;
        app.revision += 1;
        debug!(revision = app.revision, holder = %lease.holder, "Committed topology state");
        Ok(app.revision)
    }

    async fn acquire_lease(&self, unit: &UnitId) -> Result<LeaderLease> {
        self.check_available()?;
        let mut app = self.app.write().await;
        app.epoch += 1;
        let lease = LeaderLease::new(unit.clone(), app.epoch);
        app.lease = Some(lease.clone());
        info!(unit = %unit, epoch = lease.epoch, "Leader lease acquired");
        Ok(lease)
    }

    async fn current_lease(&self) -> Result<Option<LeaderLease>> {
        self.check_available()?;
        Ok(self.app.read().await.lease.clone())
    }

    async fn verify_lease(&self, lease: &LeaderLease) -> Result<()> {
        self.check_available()?;
        Self::check_lease(&*self.app.read().await, lease)
    }

    async fn load_unit(&self, unit: &UnitId) -> Result<Option<UnitData>> {
        self.check_available()?;
        Ok(self.units.get(unit).map(|d| d.clone()))
    }

    async fn commit_unit(&self, unit: &UnitId, data: &UnitData) -> Result<()> {
        self.check_available()?;
        self.units.insert(unit.clone(), data.clone());
        Ok(())
    }

    async fn list_units(&self) -> Result<BTreeMap<UnitId, UnitData>> {
        self.check_available()?;
        Ok(self
            .units
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn remove_unit(&self, unit: &UnitId) -> Result<()> {
        self.check_available()?;
        self.units.remove(unit);
        Ok(())
    }
}
