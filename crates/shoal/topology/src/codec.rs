//! Flat data-bag encoding of [`TopologyState`].
//!
//! The peer relation only carries string keys and string values, so every
//! field gets its own key and structured values are stored as JSON. Keyed
//! collections are spread over prefixed keys (`credential.internal:operator`,
//! `relation-user.7`, `backup.2023-02-08T15:19:34Z`) so that a change to one
//! entry rewrites one key.

use serde::de::DeserializeOwned;
use serde::Serialize;

use shoal_types::{BackupRecord, Credential, DataBag, RelationUser, Secret};

use crate::error::{Result, TopologyError};
use crate::state::{DesiredMember, LegacyRelation, ShardRecord, TopologyState};

pub const DB_INITIALISED: &str = "db-initialised";
pub const REPLICA_SET: &str = "replica-set";
pub const DESIRED_MEMBERS: &str = "desired-members";
pub const RECONFIG_LOCK: &str = "reconfig-lock";
pub const PENDING_CHANGES: &str = "pending-changes";
pub const KEYFILE: &str = "keyfile";
pub const LEGACY_RELATIONS: &str = "legacy-relations";
pub const INTERNAL_CERTIFICATE: &str = "certificate.internal";
pub const S3_CREDENTIALS: &str = "s3-credentials";
pub const RESTORE: &str = "restore";

const CREDENTIAL_PREFIX: &str = "credential.";
const RELATION_USER_PREFIX: &str = "relation-user.";
const SHARD_PREFIX: &str = "shard.";
const BACKUP_PREFIX: &str = "backup.";

fn put<T: Serialize>(bag: &mut DataBag, key: impl Into<String>, value: &T) -> Result<()> {
    let key = key.into();
    let json = serde_json::to_string(value).map_err(|e| TopologyError::Codec {
        key: key.clone(),
        reason: e.to_string(),
    })?;
    bag.insert(key, json);
    Ok(())
}

fn parse<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| TopologyError::Codec {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn get<T: DeserializeOwned>(bag: &DataBag, key: &str) -> Result<Option<T>> {
    bag.get(key).map(|raw| parse(key, raw)).transpose()
}

pub fn encode(state: &TopologyState) -> Result<DataBag> {
    let mut bag = DataBag::new();

    bag.insert(DB_INITIALISED.into(), state.db_initialised.to_string());
    if let Some(rs) = &state.replica_set {
        put(&mut bag, REPLICA_SET, rs)?;
    }
    if !state.desired_members.is_empty() {
        let members: Vec<&DesiredMember> = state.desired_members.values().collect();
        put(&mut bag, DESIRED_MEMBERS, &members)?;
    }
    if let Some(lock) = &state.reconfig_lock {
        put(&mut bag, RECONFIG_LOCK, lock)?;
    }
    if !state.pending_changes.is_empty() {
        put(&mut bag, PENDING_CHANGES, &state.pending_changes)?;
    }
    for (scope, credential) in &state.credentials {
        put(&mut bag, format!("{}{}", CREDENTIAL_PREFIX, scope), credential)?;
    }
    if let Some(keyfile) = &state.keyfile {
        bag.insert(KEYFILE.into(), keyfile.expose().to_string());
    }
    for (id, user) in &state.relation_users {
        put(&mut bag, format!("{}{}", RELATION_USER_PREFIX, id), user)?;
    }
    if !state.legacy_relations.is_empty() {
        let legacy: Vec<&LegacyRelation> = state.legacy_relations.values().collect();
        put(&mut bag, LEGACY_RELATIONS, &legacy)?;
    }
    for (id, shard) in &state.shards {
        put(&mut bag, format!("{}{}", SHARD_PREFIX, id), shard)?;
    }
    if let Some(cert) = &state.internal_certificate {
        put(&mut bag, INTERNAL_CERTIFICATE, cert)?;
    }
    if let Some(s3) = &state.s3 {
        put(&mut bag, S3_CREDENTIALS, s3)?;
    }
    for (id, record) in &state.backups {
        put(&mut bag, format!("{}{}", BACKUP_PREFIX, id), record)?;
    }
    if let Some(restore) = &state.restore {
        put(&mut bag, RESTORE, restore)?;
    }

    Ok(bag)
}

pub fn decode(bag: &DataBag) -> Result<TopologyState> {
    let mut state = TopologyState {
        db_initialised: bag.get(DB_INITIALISED).is_some_and(|v| v == "true"),
        replica_set: get(bag, REPLICA_SET)?,
        reconfig_lock: get(bag, RECONFIG_LOCK)?,
        pending_changes: get(bag, PENDING_CHANGES)?.unwrap_or_default(),
        keyfile: bag.get(KEYFILE).map(|k| Secret::new(k.clone())),
        internal_certificate: get(bag, INTERNAL_CERTIFICATE)?,
        s3: get(bag, S3_CREDENTIALS)?,
        restore: get(bag, RESTORE)?,
        ..Default::default()
    };

    let desired: Vec<DesiredMember> = get(bag, DESIRED_MEMBERS)?.unwrap_or_default();
    state.desired_members = desired.into_iter().map(|m| (m.unit.clone(), m)).collect();

    let legacy: Vec<LegacyRelation> = get(bag, LEGACY_RELATIONS)?.unwrap_or_default();
    state.legacy_relations = legacy.into_iter().map(|l| (l.relation_id, l)).collect();

    for (key, raw) in bag {
        if key.starts_with(CREDENTIAL_PREFIX) {
            let credential: Credential = parse(key, raw)?;
            state.credentials.insert(credential.scope, credential);
        } else if key.starts_with(RELATION_USER_PREFIX) {
            let user: RelationUser = parse(key, raw)?;
            state.relation_users.insert(user.relation_id, user);
        } else if key.starts_with(SHARD_PREFIX) {
            let shard: ShardRecord = parse(key, raw)?;
            state.shards.insert(shard.relation_id, shard);
        } else if key.starts_with(BACKUP_PREFIX) {
            let record: BackupRecord = parse(key, raw)?;
            state.backups.insert(record.id.clone(), record);
        }
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_types::{
        BackupId, BackupKind, CredentialScope, InternalRole, Member, ReplicaSetConfig, UnitId,
    };

    fn sample_state() -> TopologyState {
        let mut state = TopologyState {
            db_initialised: true,
            keyfile: Some(Secret::new("k".repeat(16))),
            ..Default::default()
        };
        let mut rs = ReplicaSetConfig::new("rs0");
        rs.members
            .push(Member::new(0, UnitId::new("shoal/0"), "10.0.0.1:27017"));
        rs.version = 4;
        state.replica_set = Some(rs);

        let scope = CredentialScope::Internal(InternalRole::Operator);
        state
            .credentials
            .insert(scope, Credential::first(scope, Secret::new("pw")));

        let id = BackupId::parse("2023-02-08T15:19:34Z").unwrap();
        state.backups.insert(
            id.clone(),
            BackupRecord::started(id, BackupKind::Logical, None),
        );
        state
    }

    #[test]
    fn test_keys_are_spread_per_entry() {
        let bag = encode(&sample_state()).unwrap();
        assert_eq!(bag.get(DB_INITIALISED).map(String::as_str), Some("true"));
        assert!(bag.contains_key("credential.internal:operator"));
        assert!(bag.contains_key("backup.2023-02-08T15:19:34Z"));
        assert!(!bag.contains_key(RECONFIG_LOCK));
    }

    #[test]
    fn test_decode_restores_state() {
        let state = sample_state();
        let decoded = decode(&encode(&state).unwrap()).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_corrupt_value_names_key() {
        let mut bag = encode(&sample_state()).unwrap();
        bag.insert(REPLICA_SET.into(), "{not json".into());
        match decode(&bag) {
            Err(TopologyError::Codec { key, .. }) => assert_eq!(key, REPLICA_SET),
            other => panic!("expected codec error, got {:?}", other),
        }
    }
}
