//! Shared control state held in the topology store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use uuid::Uuid;

use shoal_types::{
    BackupId, BackupRecord, CertificateMaterial, Credential, CredentialScope, RelationId,
    RelationUser, ReplicaSetConfig, RestoreRecord, S3Credentials, Secret, UnitId,
};

/// A unit the leader wants in the replica set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredMember {
    pub member_id: u32,
    pub unit: UnitId,
    pub address: String,
}

/// The membership operation holding the reconfiguration lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum LockedOperation {
    Join { unit: UnitId },
    Leave { units: BTreeSet<UnitId> },
    Repair,
}

/// Cluster-wide lock serializing membership mutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconfigLock {
    pub token: Uuid,
    pub holder: UnitId,
    pub operation: LockedOperation,
    /// Voting members present when the operation began.
    pub baseline_voters: usize,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ReconfigLock {
    pub fn new(
        holder: UnitId,
        operation: LockedOperation,
        baseline_voters: usize,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            token: Uuid::new_v4(),
            holder,
            operation,
            baseline_voters,
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A membership request waiting for the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "lowercase")]
pub enum PendingChange {
    Join { unit: UnitId, address: String },
    Leave { units: BTreeSet<UnitId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyRelation {
    pub relation_id: RelationId,
    pub database: String,
}

/// A shard known to this config-server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRecord {
    pub relation_id: RelationId,
    pub name: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    pub added: bool,
}

/// Application-scoped state. Only the lease holder commits it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TopologyState {
    pub db_initialised: bool,
    /// Last configuration confirmed by the engine.
    pub replica_set: Option<ReplicaSetConfig>,
    pub desired_members: BTreeMap<UnitId, DesiredMember>,
    pub reconfig_lock: Option<ReconfigLock>,
    pub pending_changes: VecDeque<PendingChange>,
    pub credentials: BTreeMap<CredentialScope, Credential>,
    pub keyfile: Option<Secret>,
    pub relation_users: BTreeMap<RelationId, RelationUser>,
    pub legacy_relations: BTreeMap<RelationId, LegacyRelation>,
    pub shards: BTreeMap<RelationId, ShardRecord>,
    pub internal_certificate: Option<CertificateMaterial>,
    pub s3: Option<S3Credentials>,
    pub backups: BTreeMap<BackupId, BackupRecord>,
    pub restore: Option<RestoreRecord>,
}

impl TopologyState {
    /// Next free engine member id.
    pub fn next_member_id(&self) -> u32 {
        let recorded = self
            .replica_set
            .iter()
            .flat_map(|rs| rs.members.iter().map(|m| m.id));
        let desired = self.desired_members.values().map(|m| m.member_id);
        recorded.chain(desired).max().map_or(0, |max| max + 1)
    }

    /// The lock, unless it has expired.
    pub fn live_lock(&self, now: DateTime<Utc>) -> Option<&ReconfigLock> {
        self.reconfig_lock.as_ref().filter(|l| !l.is_expired(now))
    }

    /// No membership change running or queued.
    pub fn is_quiesced(&self, now: DateTime<Utc>) -> bool {
        self.live_lock(now).is_none() && self.pending_changes.is_empty()
    }

    pub fn recorded_voters(&self) -> usize {
        self.replica_set
            .as_ref()
            .map_or(0, ReplicaSetConfig::voter_count)
    }
}

/// Unit-scoped state. Written only by the owning unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UnitData {
    pub address: String,
    #[serde(default)]
    pub departing: bool,
    #[serde(default)]
    pub external_certificate: Option<CertificateMaterial>,
}

impl UnitData {
    pub fn at(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_types::Member;

    #[test]
    fn test_next_member_id_spans_recorded_and_desired() {
        let mut state = TopologyState::default();
        assert_eq!(state.next_member_id(), 0);

        let mut rs = ReplicaSetConfig::new("rs0");
        rs.members.push(Member::new(3, UnitId::new("a/0"), "a:27017"));
        state.replica_set = Some(rs);
        assert_eq!(state.next_member_id(), 4);

        state.desired_members.insert(
            UnitId::new("a/7"),
            DesiredMember {
                member_id: 9,
                unit: UnitId::new("a/7"),
                address: "x".into(),
            },
        );
        assert_eq!(state.next_member_id(), 10);
    }

    #[test]
    fn test_expired_lock_is_not_live() {
        let mut state = TopologyState::default();
        let lock = ReconfigLock::new(
            UnitId::new("a/0"),
            LockedOperation::Repair,
            3,
            Duration::seconds(10),
        );
        let later = lock.expires_at + Duration::seconds(1);
        state.reconfig_lock = Some(lock);

        assert!(state.live_lock(Utc::now()).is_some());
        assert!(state.live_lock(later).is_none());
        assert!(state.is_quiesced(later));
    }
}
