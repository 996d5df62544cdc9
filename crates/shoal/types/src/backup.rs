//! Backup and restore records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::ids::BackupId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    #[default]
    Logical,
    Physical,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Logical => write!(f, "logical"),
            BackupKind::Physical => write!(f, "physical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupStatus {
    InProgress,
    Finished,
    Failed,
}

impl BackupStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BackupStatus::InProgress)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupStatus::InProgress => write!(f, "in-progress"),
            BackupStatus::Finished => write!(f, "finished"),
            BackupStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Where a backup lives in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub bucket: String,
    pub prefix: String,
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            write!(f, "s3://{}", self.bucket)
        } else {
            write!(f, "s3://{}/{}", self.bucket, prefix)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: BackupId,
    pub kind: BackupKind,
    pub status: BackupStatus,
    pub location: Option<StorageLocation>,
    #[serde(default)]
    pub error: Option<String>,
}

impl BackupRecord {
    pub fn started(id: BackupId, kind: BackupKind, location: Option<StorageLocation>) -> Self {
        Self {
            id,
            kind,
            status: BackupStatus::InProgress,
            location,
            error: None,
        }
    }

    /// Move to a terminal status. Terminal records never change again.
    pub fn complete(&mut self, status: BackupStatus, error: Option<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.error = error;
        true
    }
}

/// A restore accepted by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRecord {
    pub backup_id: BackupId,
    pub remap: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_records_are_immutable() {
        let mut record = BackupRecord::started(BackupId::now(), BackupKind::Logical, None);
        assert!(record.complete(BackupStatus::Finished, None));
        assert!(!record.complete(BackupStatus::Failed, Some("late".into())));
        assert_eq!(record.status, BackupStatus::Finished);
        assert!(record.error.is_none());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&BackupStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
    }

    #[test]
    fn test_location_display() {
        let location = StorageLocation {
            bucket: "backups".into(),
            prefix: "/shoal/".into(),
        };
        assert_eq!(location.to_string(), "s3://backups/shoal");
    }
}
