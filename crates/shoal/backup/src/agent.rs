//! The backup agent running next to each member's engine.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use shoal_types::{BackupId, BackupKind, BackupStatus};

use crate::error::AgentError;

/// Agent-side view of the configured object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageStatus {
    Ready,
    /// The agent is re-reading storage after a configuration change.
    Resyncing,
    Unconfigured,
}

/// One backup as listed by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBackup {
    pub id: BackupId,
    pub kind: BackupKind,
    pub status: BackupStatus,
    pub error: Option<String>,
    /// Replica-set names captured in the backup.
    pub components: Vec<String>,
}

#[async_trait]
pub trait BackupAgent: Send + Sync {
    /// Replace the agent's storage options.
    async fn configure(&self, options: &BTreeMap<String, String>) -> Result<(), AgentError>;

    async fn status(&self) -> Result<StorageStatus, AgentError>;

    async fn start_backup(&self, id: &BackupId, kind: BackupKind) -> Result<(), AgentError>;

    async fn list(&self) -> Result<Vec<AgentBackup>, AgentError>;

    async fn restore(
        &self,
        id: &BackupId,
        remap: &BTreeMap<String, String>,
    ) -> Result<(), AgentError>;
}

/// Agent double keeping backups in memory. Backups stay in progress until
/// [`finish`](Self::finish) or [`fail`](Self::fail) is called.
#[derive(Clone)]
pub struct InMemoryBackupAgent {
    backups: Arc<DashMap<BackupId, AgentBackup>>,
    options: Arc<Mutex<BTreeMap<String, String>>>,
    restores: Arc<Mutex<Vec<(BackupId, BTreeMap<String, String>)>>>,
    components: Arc<Mutex<Vec<String>>>,
    resyncing: Arc<AtomicBool>,
    unavailable: Arc<AtomicBool>,
    configure_calls: Arc<Mutex<usize>>,
}

impl InMemoryBackupAgent {
    /// An agent whose backups capture the replica set `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            backups: Arc::new(DashMap::new()),
            options: Arc::new(Mutex::new(BTreeMap::new())),
            restores: Arc::new(Mutex::new(Vec::new())),
            components: Arc::new(Mutex::new(vec![name.into()])),
            resyncing: Arc::new(AtomicBool::new(false)),
            unavailable: Arc::new(AtomicBool::new(false)),
            configure_calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn set_components(&self, components: Vec<String>) {
        *self.components.lock().unwrap_or_else(|p| p.into_inner()) = components;
    }

    pub fn set_resyncing(&self, resyncing: bool) {
        self.resyncing.store(resyncing, Ordering::SeqCst);
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// A finished backup taken elsewhere, e.g. by another cluster.
    pub fn seed(&self, backup: AgentBackup) {
        self.backups.insert(backup.id.clone(), backup);
    }

    pub fn finish(&self, id: &BackupId) {
        if let Some(mut backup) = self.backups.get_mut(id) {
            backup.status = BackupStatus::Finished;
        }
    }

    pub fn fail(&self, id: &BackupId, reason: &str) {
        if let Some(mut backup) = self.backups.get_mut(id) {
            backup.status = BackupStatus::Failed;
            backup.error = Some(reason.to_string());
        }
    }

    /// Drop a backup from storage.
    pub fn forget(&self, id: &BackupId) {
        self.backups.remove(id);
    }

    pub fn options(&self) -> BTreeMap<String, String> {
        self.options.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn configure_calls(&self) -> usize {
        *self.configure_calls.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn restores(&self) -> Vec<(BackupId, BTreeMap<String, String>)> {
        self.restores.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn check(&self) -> Result<(), AgentError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AgentError::Unavailable("agent not responding".into()));
        }
        if self.options.lock().unwrap_or_else(|p| p.into_inner()).is_empty() {
            return Err(AgentError::NotConfigured);
        }
        Ok(())
    }
}

#[async_trait]
impl BackupAgent for InMemoryBackupAgent {
    async fn configure(&self, options: &BTreeMap<String, String>) -> Result<(), AgentError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AgentError::Unavailable("agent not responding".into()));
        }
        *self.options.lock().unwrap_or_else(|p| p.into_inner()) = options.clone();
        *self.configure_calls.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        Ok(())
    }

    async fn status(&self) -> Result<StorageStatus, AgentError> {
        match self.check() {
            Err(AgentError::NotConfigured) => Ok(StorageStatus::Unconfigured),
            Err(e) => Err(e),
            Ok(()) if self.resyncing.load(Ordering::SeqCst) => Ok(StorageStatus::Resyncing),
            Ok(()) => Ok(StorageStatus::Ready),
        }
    }

    async fn start_backup(&self, id: &BackupId, kind: BackupKind) -> Result<(), AgentError> {
        self.check()?;
        let components = self
            .components
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        self.backups.insert(
            id.clone(),
            AgentBackup {
                id: id.clone(),
                kind,
                status: BackupStatus::InProgress,
                error: None,
                components,
            },
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<AgentBackup>, AgentError> {
        self.check()?;
        let mut backups: Vec<AgentBackup> = self.backups.iter().map(|b| b.clone()).collect();
        backups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(backups)
    }

    async fn restore(
        &self,
        id: &BackupId,
        remap: &BTreeMap<String, String>,
    ) -> Result<(), AgentError> {
        self.check()?;
        if !self.backups.contains_key(id) {
            return Err(AgentError::UnknownBackup(id.to_string()));
        }
        self.restores
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((id.clone(), remap.clone()));
        Ok(())
    }
}
