//! Audit events emitted for every committed mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backup::BackupStatus;
use crate::credential::CredentialScope;
use crate::ids::{BackupId, RelationId, UnitId};
use crate::tls::CertScope;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShoalEvent {
    LeaderElected { unit: UnitId, epoch: u64 },
    ReplicaSetInitiated { name: String },
    MembershipConverged { version: u64 },
    ReconfigurationPending { reason: String },
    MemberDeparting { unit: UnitId },
    CredentialRotated { scope: CredentialScope, generation: u64 },
    InternalUsersCreated { count: usize },
    RelationUserCreated { relation_id: RelationId, username: String },
    RelationUserRevoked { relation_id: RelationId, username: String },
    LegacyRelationJoined { relation_id: RelationId },
    ShardAdded { name: String },
    ShardRemoved { name: String },
    CertificateRequested { scope: CertScope },
    CertificateIssued { scope: CertScope },
    CertificateRemoved { scope: CertScope },
    BackupStarted { id: BackupId },
    BackupCompleted { id: BackupId, status: BackupStatus },
    RestoreStarted { id: BackupId },
    EventDeferred { event: String, attempt: u32, reason: String },
    EventFailed { event: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Membership,
    Credentials,
    Provisioner,
    Certificates,
    Backup,
    Control,
}

/// Event wrapped with delivery metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoalEventEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub severity: EventSeverity,
    pub unit: UnitId,
    pub correlation_id: Option<String>,
    pub event: ShoalEvent,
}

impl ShoalEventEnvelope {
    pub fn new(
        unit: UnitId,
        source: EventSource,
        severity: EventSeverity,
        event: ShoalEvent,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source,
            severity,
            unit,
            correlation_id: None,
            event,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}
