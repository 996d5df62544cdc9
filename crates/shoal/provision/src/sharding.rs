//! Config-server / shard handshake.
//!
//! The config-server leader hands each joining shard its operator password
//! and keyfile; once the shard announces its name and hosts it is added to
//! the cluster. The shard-side leader adopts what it was handed so both
//! sides authenticate with the same secrets.

use std::sync::Arc;

use tracing::{info, instrument};

use shoal_credentials::CredentialManager;
use shoal_engine::DatabaseEngine;
use shoal_health::BoundaryGuard;
use shoal_topology::{mutate, LeaderLease, ShardRecord, TopologyStore};
use shoal_types::{
    CredentialScope, InternalRole, RelationId, ShardAnnouncement, ShardHandshake, UnitId,
};

use crate::error::{ProvisionError, Result};
use crate::provisioner::{ensure_leader, leadership};

const OPERATOR: CredentialScope = CredentialScope::Internal(InternalRole::Operator);

pub struct ShardingCoordinator {
    unit: UnitId,
    store: Arc<dyn TopologyStore>,
    engine: Arc<dyn DatabaseEngine>,
    guard: Arc<BoundaryGuard>,
    credentials: Arc<CredentialManager>,
}

impl ShardingCoordinator {
    pub fn new(
        unit: UnitId,
        store: Arc<dyn TopologyStore>,
        engine: Arc<dyn DatabaseEngine>,
        guard: Arc<BoundaryGuard>,
        credentials: Arc<CredentialManager>,
    ) -> Self {
        Self {
            unit,
            store,
            engine,
            guard,
            credentials,
        }
    }

    /// Secrets to publish to a shard joining on `relation_id`.
    #[instrument(skip(self, lease), fields(relation = %relation_id))]
    pub async fn handshake_for(
        &self,
        lease: &LeaderLease,
        relation_id: RelationId,
    ) -> Result<ShardHandshake> {
        ensure_leader(self.store.as_ref(), &self.unit, lease).await?;
        let state = self.store.load().await?.value;
        let keyfile = state
            .keyfile
            .clone()
            .ok_or_else(|| ProvisionError::Deferred("keyfile not generated".into()))?;
        let operator_password = self.credentials.credential(&OPERATOR).await?.secret;

        if !state.shards.contains_key(&relation_id) {
            mutate(self.store.as_ref(), lease, |state| {
                state.shards.entry(relation_id).or_insert(ShardRecord {
                    relation_id,
                    name: None,
                    hosts: Vec::new(),
                    added: false,
                });
                Ok::<_, ProvisionError>(())
            })
            .await
            .map_err(leadership("shard_handshake"))?;
        }

        Ok(ShardHandshake {
            operator_password,
            keyfile,
        })
    }

    /// Add the announced shard to the cluster. Returns `false` if it is
    /// already added under that name.
    #[instrument(
        skip(self, lease, announcement),
        fields(relation = %relation_id, shard = %announcement.shard_name)
    )]
    pub async fn on_shard_announced(
        &self,
        lease: &LeaderLease,
        relation_id: RelationId,
        announcement: &ShardAnnouncement,
    ) -> Result<bool> {
        ensure_leader(self.store.as_ref(), &self.unit, lease).await?;
        let state = self.store.load().await?.value;
        let already = state.shards.get(&relation_id).is_some_and(|r| {
            r.added && r.name.as_deref() == Some(announcement.shard_name.as_str())
        });
        if already {
            return Ok(false);
        }

        let engine = self.engine.as_ref();
        let (name, hosts) = (announcement.shard_name.as_str(), announcement.hosts.as_slice());
        self.guard
            .call("add_shard", move || engine.add_shard(name, hosts))
            .await?;

        mutate(self.store.as_ref(), lease, |state| {
            state.shards.insert(
                relation_id,
                ShardRecord {
                    relation_id,
                    name: Some(announcement.shard_name.clone()),
                    hosts: announcement.hosts.clone(),
                    added: true,
                },
            );
            Ok::<_, ProvisionError>(())
        })
        .await
        .map_err(leadership("shard_added"))?;

        info!("Shard added");
        Ok(true)
    }

    /// Remove the shard that was on `relation_id`, if one was added.
    /// Returns the removed shard's name.
    #[instrument(skip(self, lease), fields(relation = %relation_id))]
    pub async fn on_shard_broken(
        &self,
        lease: &LeaderLease,
        relation_id: RelationId,
    ) -> Result<Option<String>> {
        ensure_leader(self.store.as_ref(), &self.unit, lease).await?;
        let state = self.store.load().await?.value;
        let Some(record) = state.shards.get(&relation_id).cloned() else {
            return Ok(None);
        };

        let removed = match record.name.as_deref().filter(|_| record.added) {
            Some(name) => {
                let engine = self.engine.as_ref();
                self.guard
                    .call("remove_shard", move || engine.remove_shard(name))
                    .await?;
                Some(name.to_string())
            }
            None => None,
        };

        mutate(self.store.as_ref(), lease, |state| {
            state.shards.remove(&relation_id);
            Ok::<_, ProvisionError>(())
        })
        .await
        .map_err(leadership("shard_removed"))?;

        if let Some(name) = &removed {
            info!(shard = %name, "Shard removed");
        }
        Ok(removed)
    }

    /// Shard side: take on the config-server's keyfile and operator
    /// password. Returns true if anything changed.
    #[instrument(skip(self, lease, handshake))]
    pub async fn adopt_handshake(
        &self,
        lease: &LeaderLease,
        handshake: &ShardHandshake,
    ) -> Result<bool> {
        ensure_leader(self.store.as_ref(), &self.unit, lease).await?;
        let mut changed = self
            .credentials
            .adopt_keyfile(lease, handshake.keyfile.clone())
            .await?;

        let current = self.credentials.credential(&OPERATOR).await?;
        if current.secret != handshake.operator_password {
            self.credentials
                .rotate(lease, OPERATOR, Some(handshake.operator_password.clone()))
                .await?;
            changed = true;
        }
        if changed {
            info!("Adopted config-server credentials");
        }
        Ok(changed)
    }

    /// What this shard announces to its config-server.
    pub async fn announcement(&self) -> Result<Option<ShardAnnouncement>> {
        let state = self.store.load().await?.value;
        Ok(state.replica_set.map(|rs| ShardAnnouncement {
            hosts: rs.hosts(),
            shard_name: rs.name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_engine::SimulatedEngine;
    use shoal_health::{Boundary, GuardConfig};
    use shoal_topology::{InMemoryTopologyStore, TopologyError};
    use shoal_types::{Member, ReplicaSetConfig};

    struct Side {
        store: InMemoryTopologyStore,
        engine: SimulatedEngine,
        lease: LeaderLease,
        credentials: Arc<CredentialManager>,
        coordinator: ShardingCoordinator,
    }

    async fn side(name: &str) -> Side {
        let unit = UnitId::new(format!("{}/0", name));
        let store = InMemoryTopologyStore::new();
        let engine = SimulatedEngine::new();
        let lease = store.acquire_lease(&unit).await.unwrap();
        let mut rs = ReplicaSetConfig::new(name);
        rs.version = 1;
        rs.members.push(Member::new(0, unit.clone(), "10.1.0.1:27017"));
        mutate(&store, &lease, |state| {
            state.db_initialised = true;
            state.replica_set = Some(rs.clone());
            Ok::<_, TopologyError>(())
        })
        .await
        .unwrap();

        let guard = Arc::new(BoundaryGuard::new(Boundary::Engine, GuardConfig::default()));
        let credentials = Arc::new(CredentialManager::new(
            unit.clone(),
            Arc::new(store.clone()),
            Arc::new(engine.clone()),
            guard.clone(),
        ));
        credentials.ensure_generated(&lease).await.unwrap();
        credentials.bootstrap_users(&lease).await.unwrap();
        let coordinator = ShardingCoordinator::new(
            unit,
            Arc::new(store.clone()),
            Arc::new(engine.clone()),
            guard,
            credentials.clone(),
        );
        Side {
            store,
            engine,
            lease,
            credentials,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_full_handshake() {
        let config_server = side("cfg").await;
        let shard = side("shard-one").await;
        let relation = RelationId::new(9);

        let handshake = config_server
            .coordinator
            .handshake_for(&config_server.lease, relation)
            .await
            .unwrap();
        assert!(shard
            .coordinator
            .adopt_handshake(&shard.lease, &handshake)
            .await
            .unwrap());
        assert!(!shard
            .coordinator
            .adopt_handshake(&shard.lease, &handshake)
            .await
            .unwrap());
        assert_eq!(shard.engine.keyfile(), Some(handshake.keyfile.clone()));
        assert_eq!(
            shard.credentials.get("operator").await.unwrap(),
            handshake.operator_password
        );

        let announcement = shard.coordinator.announcement().await.unwrap().unwrap();
        assert_eq!(announcement.shard_name, "shard-one");
        assert!(config_server
            .coordinator
            .on_shard_announced(&config_server.lease, relation, &announcement)
            .await
            .unwrap());
        assert!(!config_server
            .coordinator
            .on_shard_announced(&config_server.lease, relation, &announcement)
            .await
            .unwrap());
        assert!(config_server.engine.shards().contains_key("shard-one"));

        let removed = config_server
            .coordinator
            .on_shard_broken(&config_server.lease, relation)
            .await
            .unwrap();
        assert_eq!(removed.as_deref(), Some("shard-one"));
        assert!(config_server.engine.shards().is_empty());
        let state = config_server.store.load().await.unwrap().value;
        assert!(state.shards.is_empty());
    }
}
