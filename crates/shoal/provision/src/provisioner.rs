//! Per-relation database users.
//!
//! Each authenticated client relation gets its own user, `relation-<id>`,
//! created when the consumer names its database and revoked when the
//! relation breaks. The user record lives in the topology store keyed by
//! relation id, so a replayed join returns the same credentials and a
//! broken-then-rejoined relation always gets fresh ones.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use shoal_credentials::generate_password;
use shoal_engine::{connection_uri, relation_roles, DatabaseEngine, EngineError, UserSpec};
use shoal_health::{BoundaryGuard, GuardError};
use shoal_topology::{
    mutate, LeaderLease, LegacyRelation, TopologyError, TopologyState, TopologyStore,
};
use shoal_types::{
    ClientRequest, ConnectionInfo, Credential, CredentialScope, DataBag, LegacyConnectionInfo,
    RelationId, RelationUser, UnitId,
};

use crate::config::ProvisionConfig;
use crate::database::validate_database_name;
use crate::error::{ProvisionError, Result};

/// Result of a client relation join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Provisioned(ConnectionInfo),
    /// The consumer has not asked for a database yet.
    Waiting,
}

pub(crate) fn leadership(operation: &'static str) -> impl Fn(ProvisionError) -> ProvisionError {
    move |err| match err {
        ProvisionError::Topology(TopologyError::LeaseRevoked { .. }) => {
            ProvisionError::LostLeadership(operation)
        }
        other => other,
    }
}

pub(crate) async fn ensure_leader(
    store: &dyn TopologyStore,
    unit: &UnitId,
    lease: &LeaderLease,
) -> Result<()> {
    if &lease.holder != unit {
        return Err(ProvisionError::NotLeader);
    }
    match store.verify_lease(lease).await {
        Ok(()) => Ok(()),
        Err(TopologyError::LeaseRevoked { .. }) => Err(ProvisionError::NotLeader),
        Err(e) => Err(e.into()),
    }
}

/// Member addresses and replica-set name clients should connect to.
fn endpoints(state: &TopologyState) -> Result<(Vec<String>, String)> {
    let rs = state
        .replica_set
        .as_ref()
        .ok_or_else(|| ProvisionError::Deferred("replica set not initialised".into()))?;
    Ok((rs.hosts(), rs.name.clone()))
}

fn database_in_use(state: &TopologyState, database: &str) -> bool {
    state.relation_users.values().any(|u| u.database == database)
        || state.legacy_relations.values().any(|l| l.database == database)
}

pub struct RelationUserProvisioner {
    unit: UnitId,
    store: Arc<dyn TopologyStore>,
    engine: Arc<dyn DatabaseEngine>,
    guard: Arc<BoundaryGuard>,
    config: ProvisionConfig,
}

impl RelationUserProvisioner {
    pub fn new(
        unit: UnitId,
        store: Arc<dyn TopologyStore>,
        engine: Arc<dyn DatabaseEngine>,
        guard: Arc<BoundaryGuard>,
        config: ProvisionConfig,
    ) -> Self {
        Self {
            unit,
            store,
            engine,
            guard,
            config,
        }
    }

    fn connection_info(
        &self,
        state: &TopologyState,
        user: &RelationUser,
    ) -> Result<ConnectionInfo> {
        let (hosts, replset) = endpoints(state)?;
        let password = user.credential.secret.clone();
        let uris = connection_uri(&user.username, &password, &hosts, &user.database, &replset);
        Ok(ConnectionInfo {
            username: user.username.clone(),
            password,
            database: user.database.clone(),
            endpoints: hosts,
            replset,
            uris,
        })
    }

    fn legacy_info(
        &self,
        state: &TopologyState,
        relation: &LegacyRelation,
    ) -> Result<LegacyConnectionInfo> {
        let (hosts, replset) = endpoints(state)?;
        let primary = state
            .replica_set
            .as_ref()
            .and_then(|rs| rs.primary().or_else(|| rs.members.first()))
            .map(|m| m.address.clone())
            .unwrap_or_default();
        let hostname = primary
            .rsplit_once(':')
            .map_or(primary.as_str(), |(host, _)| host)
            .to_string();
        Ok(LegacyConnectionInfo {
            hostname,
            port: self.config.port,
            database: relation.database.clone(),
            endpoints: hosts,
            replset,
            version: self.config.engine_version.clone(),
        })
    }

    /// Provision the user for an authenticated client relation.
    #[instrument(skip(self, lease, request), fields(relation = %relation_id))]
    pub async fn on_relation_joined(
        &self,
        lease: &LeaderLease,
        relation_id: RelationId,
        request: &ClientRequest,
    ) -> Result<ProvisionOutcome> {
        ensure_leader(self.store.as_ref(), &self.unit, lease).await?;
        let state = self.store.load().await?.value;

        if let Some(user) = state.relation_users.get(&relation_id) {
            debug!("Relation already provisioned");
            return Ok(ProvisionOutcome::Provisioned(self.connection_info(&state, user)?));
        }
        if !state.legacy_relations.is_empty() {
            return Err(ProvisionError::MixedRelationKinds);
        }
        let Some(database) = request.database.as_deref() else {
            return Ok(ProvisionOutcome::Waiting);
        };
        validate_database_name(database)?;
        endpoints(&state)?;

        let username = RelationUser::username_for(relation_id);
        let password = generate_password();
        let spec = UserSpec::new(
            username.clone(),
            relation_roles(database, &request.extra_user_roles),
        );

        let engine = self.engine.as_ref();
        let (spec_ref, pw) = (&spec, &password);
        let created = self
            .guard
            .call("create_user", move || engine.create_user(spec_ref, pw))
            .await;
        match created {
            Ok(()) => {}
            Err(GuardError::Rejected(EngineError::UserExists(_))) => {
                // Left over from an earlier relation with this id.
                warn!(%username, "Replacing stale relation user");
                let name = username.as_str();
                self.guard
                    .call("drop_user", move || engine.drop_user(name))
                    .await?;
                self.guard
                    .call("create_user", move || engine.create_user(spec_ref, pw))
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }

        let user = RelationUser {
            relation_id,
            username: username.clone(),
            database: database.to_string(),
            roles: request.extra_user_roles.clone(),
            credential: Credential::first(CredentialScope::Relation(relation_id), password),
        };
        let state = mutate(self.store.as_ref(), lease, |state| {
            state.relation_users.insert(relation_id, user.clone());
            Ok::<_, ProvisionError>(state.clone())
        })
        .await
        .map_err(leadership("relation_joined"))?;

        info!(%username, database, "Relation user created");
        Ok(ProvisionOutcome::Provisioned(self.connection_info(&state, &user)?))
    }

    /// Revoke the relation's user and forget it.
    ///
    /// Returns `false` if the relation was never provisioned.
    #[instrument(skip(self, lease), fields(relation = %relation_id))]
    pub async fn on_relation_broken(
        &self,
        lease: &LeaderLease,
        relation_id: RelationId,
    ) -> Result<bool> {
        ensure_leader(self.store.as_ref(), &self.unit, lease).await?;
        let state = self.store.load().await?.value;
        let Some(user) = state.relation_users.get(&relation_id).cloned() else {
            return Ok(false);
        };

        let engine = self.engine.as_ref();
        let name = user.username.as_str();
        match self
            .guard
            .call("drop_user", move || engine.drop_user(name))
            .await
        {
            Ok(()) | Err(GuardError::Rejected(EngineError::UserNotFound(_))) => {}
            Err(e) => return Err(e.into()),
        }

        let state = mutate(self.store.as_ref(), lease, |state| {
            state.relation_users.remove(&relation_id);
            Ok::<_, ProvisionError>(state.clone())
        })
        .await
        .map_err(leadership("relation_broken"))?;
        info!(username = %user.username, "Relation user revoked");

        self.drop_unused_database(&state, &user.database).await?;
        Ok(true)
    }

    async fn drop_unused_database(&self, state: &TopologyState, database: &str) -> Result<()> {
        if !self.config.auto_delete || database_in_use(state, database) {
            return Ok(());
        }
        let engine = self.engine.as_ref();
        self.guard
            .call("drop_database", move || engine.drop_database(database))
            .await?;
        info!(database, "Relation database dropped");
        Ok(())
    }

    /// Register an unauthenticated client relation.
    #[instrument(skip(self, lease), fields(relation = %relation_id))]
    pub async fn on_legacy_joined(
        &self,
        lease: &LeaderLease,
        relation_id: RelationId,
        database: Option<&str>,
    ) -> Result<LegacyConnectionInfo> {
        ensure_leader(self.store.as_ref(), &self.unit, lease).await?;
        let state = self.store.load().await?.value;

        if let Some(existing) = state.legacy_relations.get(&relation_id) {
            return self.legacy_info(&state, existing);
        }
        if !state.relation_users.is_empty() {
            return Err(ProvisionError::MixedRelationKinds);
        }
        let database = database.unwrap_or(&self.config.legacy_database);
        validate_database_name(database)?;
        endpoints(&state)?;

        let relation = LegacyRelation {
            relation_id,
            database: database.to_string(),
        };
        let state = mutate(self.store.as_ref(), lease, |state| {
            state.legacy_relations.insert(relation_id, relation.clone());
            Ok::<_, ProvisionError>(state.clone())
        })
        .await
        .map_err(leadership("legacy_joined"))?;

        info!(database, "Legacy relation joined");
        self.legacy_info(&state, &relation)
    }

    #[instrument(skip(self, lease), fields(relation = %relation_id))]
    pub async fn on_legacy_broken(
        &self,
        lease: &LeaderLease,
        relation_id: RelationId,
    ) -> Result<bool> {
        ensure_leader(self.store.as_ref(), &self.unit, lease).await?;
        let state = self.store.load().await?.value;
        let Some(relation) = state.legacy_relations.get(&relation_id).cloned() else {
            return Ok(false);
        };

        let state = mutate(self.store.as_ref(), lease, |state| {
            state.legacy_relations.remove(&relation_id);
            Ok::<_, ProvisionError>(state.clone())
        })
        .await
        .map_err(leadership("legacy_broken"))?;
        info!("Legacy relation removed");

        self.drop_unused_database(&state, &relation.database).await?;
        Ok(true)
    }

    /// Current connection data for every live client relation, to be
    /// re-published after membership changes.
    pub async fn refresh_endpoints(
        &self,
        lease: &LeaderLease,
    ) -> Result<BTreeMap<RelationId, DataBag>> {
        ensure_leader(self.store.as_ref(), &self.unit, lease).await?;
        let state = self.store.load().await?.value;
        if state.replica_set.is_none() {
            return Ok(BTreeMap::new());
        }

        let mut bags = BTreeMap::new();
        for (id, user) in &state.relation_users {
            bags.insert(*id, self.connection_info(&state, user)?.to_databag());
        }
        for (id, relation) in &state.legacy_relations {
            bags.insert(*id, self.legacy_info(&state, relation)?.to_databag());
        }
        Ok(bags)
    }
}
