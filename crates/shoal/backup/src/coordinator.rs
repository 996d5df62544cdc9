//! Backup creation, listing and restore.
//!
//! Records live in the topology store so a deferred `create` or `refresh`
//! resumes from what was committed. The agent's listing is authoritative
//! for which backups exist in storage.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use shoal_health::BoundaryGuard;
use shoal_topology::{mutate, LeaderLease, TopologyError, TopologyState, TopologyStore};
use shoal_types::{
    BackupId, BackupKind, BackupRecord, BackupStatus, RestoreRecord, S3Credentials, UnitId,
};

use crate::agent::{AgentBackup, BackupAgent, StorageStatus};
use crate::error::{BackupError, Result};
use crate::options::{agent_options, location};
use crate::remap::{check_remap, parse_remap};

fn leadership(operation: &'static str) -> impl Fn(BackupError) -> BackupError {
    move |err| match err {
        BackupError::Topology(TopologyError::LeaseRevoked { .. }) => {
            BackupError::LostLeadership(operation)
        }
        other => other,
    }
}

fn credentials(state: &TopologyState) -> Result<&S3Credentials> {
    state
        .s3
        .as_ref()
        .ok_or(BackupError::MissingStorageCredentials)
}

pub struct BackupCoordinator {
    unit: UnitId,
    store: Arc<dyn TopologyStore>,
    agent: Arc<dyn BackupAgent>,
    guard: Arc<BoundaryGuard>,
    /// Options last pushed to the agent by this member.
    pushed: Mutex<Option<BTreeMap<String, String>>>,
}

impl BackupCoordinator {
    pub fn new(
        unit: UnitId,
        store: Arc<dyn TopologyStore>,
        agent: Arc<dyn BackupAgent>,
        guard: Arc<BoundaryGuard>,
    ) -> Self {
        Self {
            unit,
            store,
            agent,
            guard,
            pushed: Mutex::new(None),
        }
    }

    async fn ensure_leader(&self, lease: &LeaderLease) -> Result<()> {
        if lease.holder != self.unit {
            return Err(BackupError::NotLeader);
        }
        match self.store.verify_lease(lease).await {
            Ok(()) => Ok(()),
            Err(TopologyError::LeaseRevoked { .. }) => Err(BackupError::NotLeader),
            Err(e) => Err(e.into()),
        }
    }

    /// Record new object-storage credentials, or their removal, from the
    /// `s3` relation. Returns true if they changed.
    #[instrument(skip(self, lease, s3), fields(unit = %self.unit))]
    pub async fn set_storage_credentials(
        &self,
        lease: &LeaderLease,
        s3: Option<S3Credentials>,
    ) -> Result<bool> {
        self.ensure_leader(lease).await?;
        let changed = mutate(self.store.as_ref(), lease, |state| {
            if state.s3 == s3 {
                return Ok::<_, BackupError>(false);
            }
            state.s3 = s3.clone();
            Ok(true)
        })
        .await
        .map_err(leadership("storage_credentials"))?;

        if changed {
            match &s3 {
                Some(s3) => info!(bucket = %s3.bucket, "Object storage credentials updated"),
                None => info!("Object storage credentials removed"),
            }
        }
        Ok(changed)
    }

    /// Push the stored credentials to this member's agent if they differ
    /// from what was pushed last. Returns true if the agent was configured.
    pub async fn sync_storage(&self) -> Result<bool> {
        let state = self.store.load().await?.value;
        let Some(s3) = state.s3.as_ref() else {
            return Ok(false);
        };
        let options = agent_options(s3);
        let current = self
            .pushed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if current.as_ref() == Some(&options) {
            return Ok(false);
        }

        let (agent, opts) = (self.agent.as_ref(), &options);
        self.guard
            .call("configure_storage", move || agent.configure(opts))
            .await?;
        *self.pushed.lock().unwrap_or_else(|p| p.into_inner()) = Some(options);
        info!(unit = %self.unit, "Backup agent storage configured");
        Ok(true)
    }

    /// Storage must be configured and settled before anything is read
    /// from or written to it.
    async fn ready(&self) -> Result<()> {
        self.sync_storage().await?;
        let agent = self.agent.as_ref();
        let status = self
            .guard
            .call("storage_status", move || agent.status())
            .await?;
        match status {
            StorageStatus::Ready => Ok(()),
            StorageStatus::Resyncing => Err(BackupError::Deferred("storage is resyncing".into())),
            StorageStatus::Unconfigured => Err(BackupError::MissingStorageCredentials),
        }
    }

    async fn listing(&self) -> Result<Vec<AgentBackup>> {
        let agent = self.agent.as_ref();
        Ok(self.guard.call("list_backups", move || agent.list()).await?)
    }

    /// Start a logical backup.
    #[instrument(skip(self, lease), fields(unit = %self.unit))]
    pub async fn create(&self, lease: &LeaderLease) -> Result<BackupId> {
        self.ensure_leader(lease).await?;
        let state = self.store.load().await?.value;
        let location = location(credentials(&state)?);
        self.ready().await?;

        self.refresh(lease).await?;
        let state = self.store.load().await?.value;
        if let Some(running) = state
            .backups
            .values()
            .find(|r| r.status == BackupStatus::InProgress)
        {
            return Err(BackupError::BackupInProgress(running.id.clone()));
        }

        let mut id = BackupId::now();
        while state.backups.contains_key(&id) {
            id = id.successor();
        }
        let record = BackupRecord::started(id.clone(), BackupKind::Logical, Some(location));
        mutate(self.store.as_ref(), lease, |state| {
            state.backups.insert(id.clone(), record.clone());
            Ok::<_, BackupError>(())
        })
        .await
        .map_err(leadership("backup_create"))?;

        let (agent, id_ref) = (self.agent.as_ref(), &id);
        let started = self
            .guard
            .call("start_backup", move || agent.start_backup(id_ref, BackupKind::Logical))
            .await;
        if let Err(err) = started {
            let err = BackupError::from(err);
            warn!(backup = %id, error = %err, "Backup failed to start");
            mutate(self.store.as_ref(), lease, |state| {
                if let Some(record) = state.backups.get_mut(&id) {
                    record.complete(BackupStatus::Failed, Some(err.to_string()));
                }
                Ok::<_, BackupError>(())
            })
            .await
            .map_err(leadership("backup_create"))?;
            return Err(err);
        }

        info!(backup = %id, "Backup started");
        Ok(id)
    }

    /// Move in-progress records to the status the agent reports. Returns
    /// the ids that reached a terminal status.
    pub async fn refresh(&self, lease: &LeaderLease) -> Result<Vec<BackupId>> {
        self.ensure_leader(lease).await?;
        let state = self.store.load().await?.value;
        if !state.backups.values().any(|r| !r.status.is_terminal()) {
            return Ok(Vec::new());
        }
        let listing: BTreeMap<BackupId, AgentBackup> = self
            .listing()
            .await?
            .into_iter()
            .map(|b| (b.id.clone(), b))
            .collect();

        let updated = mutate(self.store.as_ref(), lease, |state| {
            let mut updated = Vec::new();
            for record in state.backups.values_mut() {
                let (status, error) = match listing.get(&record.id) {
                    Some(b) if b.status.is_terminal() => (b.status, b.error.clone()),
                    Some(_) => continue,
                    None => (
                        BackupStatus::Failed,
                        Some("backup not found in storage".to_string()),
                    ),
                };
                if record.complete(status, error) {
                    updated.push(record.id.clone());
                }
            }
            Ok::<_, BackupError>(updated)
        })
        .await
        .map_err(leadership("backup_refresh"))?;

        for id in &updated {
            info!(backup = %id, "Backup completed");
        }
        Ok(updated)
    }

    /// Backups in storage merged with the recorded ones, sorted by id.
    pub async fn list(&self) -> Result<Vec<BackupRecord>> {
        let state = self.store.load().await?.value;
        let location = location(credentials(&state)?);
        self.ready().await?;

        let mut merged: BTreeMap<BackupId, BackupRecord> = self
            .listing()
            .await?
            .into_iter()
            .map(|b| {
                let record = BackupRecord {
                    id: b.id.clone(),
                    kind: b.kind,
                    status: b.status,
                    location: Some(location.clone()),
                    error: b.error,
                };
                (b.id, record)
            })
            .collect();
        for (id, record) in state.backups {
            match merged.get(&id) {
                Some(listed) if !record.status.is_terminal() => {
                    debug!(
                        backup = %id,
                        status = %listed.status,
                        "Recorded backup still in progress"
                    );
                }
                _ => {
                    merged.insert(id, record);
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Restore `backup_id`, optionally renaming replica sets with an
    /// `old=new` pattern.
    #[instrument(skip(self, lease), fields(unit = %self.unit))]
    pub async fn restore(
        &self,
        lease: &LeaderLease,
        backup_id: &str,
        remap_pattern: Option<&str>,
    ) -> Result<RestoreRecord> {
        self.ensure_leader(lease).await?;
        let state = self.store.load().await?.value;
        if !state.is_quiesced(Utc::now()) {
            return Err(BackupError::ClusterNotQuiesced);
        }
        credentials(&state)?;
        let id = BackupId::parse(backup_id)
            .map_err(|_| BackupError::UnknownBackupId(backup_id.to_string()))?;
        let remap = parse_remap(remap_pattern.unwrap_or_default())?;
        self.ready().await?;

        let backup = self
            .listing()
            .await?
            .into_iter()
            .find(|b| b.id == id && b.status == BackupStatus::Finished)
            .ok_or_else(|| BackupError::UnknownBackupId(backup_id.to_string()))?;
        check_remap(&remap, &backup.components)?;

        let (agent, id_ref, remap_ref) = (self.agent.as_ref(), &id, &remap);
        self.guard
            .call("restore", move || agent.restore(id_ref, remap_ref))
            .await?;

        let record = RestoreRecord {
            backup_id: id.clone(),
            remap,
            started_at: Utc::now(),
        };
        mutate(self.store.as_ref(), lease, |state| {
            state.restore = Some(record.clone());
            Ok::<_, BackupError>(())
        })
        .await
        .map_err(leadership("restore"))?;

        info!(backup = %id, "Restore started");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::InMemoryBackupAgent;
    use shoal_health::{Boundary, GuardConfig, RetryConfig};
    use shoal_topology::{InMemoryTopologyStore, LockedOperation, ReconfigLock};
    use shoal_types::Secret;
    use std::time::Duration;

    struct Fixture {
        store: InMemoryTopologyStore,
        agent: InMemoryBackupAgent,
        lease: LeaderLease,
        backups: BackupCoordinator,
    }

    fn s3() -> S3Credentials {
        S3Credentials {
            access_key: "AKIA".into(),
            secret_key: Secret::new("hunter2"),
            bucket: "backups".into(),
            endpoint: None,
            region: Some("eu-west-1".into()),
            path: Some("shoal".into()),
            tls_ca_chain: Vec::new(),
        }
    }

    fn coordinator(
        store: &InMemoryTopologyStore,
        agent: &InMemoryBackupAgent,
        unit: &str,
    ) -> BackupCoordinator {
        BackupCoordinator::new(
            UnitId::new(unit),
            Arc::new(store.clone()),
            Arc::new(agent.clone()),
            Arc::new(BoundaryGuard::new(
                Boundary::ObjectStorage,
                GuardConfig {
                    retry: RetryConfig::once(Duration::from_secs(5)),
                    ..Default::default()
                },
            )),
        )
    }

    async fn fixture(with_credentials: bool) -> Fixture {
        let store = InMemoryTopologyStore::new();
        let agent = InMemoryBackupAgent::new("shoal");
        let lease = store.acquire_lease(&UnitId::new("shoal/0")).await.unwrap();
        let backups = coordinator(&store, &agent, "shoal/0");
        if with_credentials {
            backups.set_storage_credentials(&lease, Some(s3())).await.unwrap();
        }
        Fixture {
            store,
            agent,
            lease,
            backups,
        }
    }

    #[tokio::test]
    async fn test_create_without_credentials() {
        let fx = fixture(false).await;
        let err = fx.backups.create(&fx.lease).await.unwrap_err();
        assert!(matches!(err, BackupError::MissingStorageCredentials));
        assert!(matches!(
            fx.backups.list().await.unwrap_err(),
            BackupError::MissingStorageCredentials
        ));
        assert!(fx.store.load().await.unwrap().value.backups.is_empty());
    }

    #[tokio::test]
    async fn test_create_then_finish() {
        let fx = fixture(true).await;
        let id = fx.backups.create(&fx.lease).await.unwrap();
        assert_eq!(fx.agent.options()["storage.s3.region"], "eu-west-1");

        let listed = fx.backups.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, BackupStatus::InProgress);

        let err = fx.backups.create(&fx.lease).await.unwrap_err();
        assert!(matches!(err, BackupError::BackupInProgress(running) if running == id));

        fx.agent.finish(&id);
        assert_eq!(fx.backups.refresh(&fx.lease).await.unwrap(), vec![id.clone()]);
        let listed = fx.backups.list().await.unwrap();
        assert_eq!(listed[0].status, BackupStatus::Finished);
        assert_eq!(listed[0].location.as_ref().unwrap().to_string(), "s3://backups/shoal");

        // The next id never collides with the previous one.
        let next = fx.backups.create(&fx.lease).await.unwrap();
        assert!(next > id);
    }

    #[tokio::test]
    async fn test_vanished_backup_marked_failed() {
        let fx = fixture(true).await;
        let id = fx.backups.create(&fx.lease).await.unwrap();
        fx.agent.forget(&id);
        fx.backups.refresh(&fx.lease).await.unwrap();
        let record = fx.store.load().await.unwrap().value.backups[&id].clone();
        assert_eq!(record.status, BackupStatus::Failed);
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn test_resyncing_storage_defers() {
        let fx = fixture(true).await;
        fx.backups.sync_storage().await.unwrap();
        fx.agent.set_resyncing(true);
        let err = fx.backups.create(&fx.lease).await.unwrap_err();
        assert!(matches!(err, BackupError::Deferred(_)));
        assert!(err.class().is_retryable());
    }

    #[tokio::test]
    async fn test_options_pushed_once() {
        let fx = fixture(true).await;
        assert!(fx.backups.sync_storage().await.unwrap());
        assert!(!fx.backups.sync_storage().await.unwrap());
        assert_eq!(fx.agent.configure_calls(), 1);
    }

    #[tokio::test]
    async fn test_non_leader_rejected() {
        let fx = fixture(true).await;
        let follower = coordinator(&fx.store, &fx.agent, "shoal/1");
        assert!(matches!(
            follower.create(&fx.lease).await.unwrap_err(),
            BackupError::NotLeader
        ));
        // Reads are fine.
        assert!(follower.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore() {
        let fx = fixture(true).await;
        let id = fx.backups.create(&fx.lease).await.unwrap();

        let err = fx.backups.restore(&fx.lease, &id.to_string(), None).await.unwrap_err();
        assert!(matches!(err, BackupError::UnknownBackupId(_)));

        fx.agent.finish(&id);
        let err = fx
            .backups
            .restore(&fx.lease, "2001-01-01T00:00:00Z", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::UnknownBackupId(_)));

        let record = fx
            .backups
            .restore(&fx.lease, &id.to_string(), Some("shoal=shoal-two"))
            .await
            .unwrap();
        assert_eq!(record.remap["shoal"], "shoal-two");
        assert_eq!(fx.agent.restores().len(), 1);
        assert_eq!(fx.store.load().await.unwrap().value.restore, Some(record));
    }

    #[tokio::test]
    async fn test_restore_remap_conflict() {
        let fx = fixture(true).await;
        fx.agent
            .set_components(vec!["cfg".into(), "shard-one".into(), "shard-two".into()]);
        let id = fx.backups.create(&fx.lease).await.unwrap();
        fx.agent.finish(&id);

        let err = fx
            .backups
            .restore(&fx.lease, &id.to_string(), Some("shard-one=shard-two"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::RemapConflict(_)));
        assert!(fx.agent.restores().is_empty());
    }

    #[tokio::test]
    async fn test_restore_refused_while_reconfiguring() {
        let fx = fixture(true).await;
        let id = fx.backups.create(&fx.lease).await.unwrap();
        fx.agent.finish(&id);
        mutate(&fx.store, &fx.lease, |state| {
            state.reconfig_lock = Some(ReconfigLock::new(
                UnitId::new("shoal/0"),
                LockedOperation::Join {
                    unit: UnitId::new("shoal/3"),
                },
                1,
                chrono::Duration::minutes(10),
            ));
            Ok::<_, TopologyError>(())
        })
        .await
        .unwrap();

        let err = fx.backups.restore(&fx.lease, &id.to_string(), None).await.unwrap_err();
        assert!(matches!(err, BackupError::ClusterNotQuiesced));
    }
}
