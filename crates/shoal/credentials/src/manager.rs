//! Credential manager: current generations, rotation and internal users.

use std::sync::Arc;

use tracing::{info, instrument};

use shoal_engine::{internal_roles, DatabaseEngine, EngineError, UserSpec};
use shoal_health::{BoundaryGuard, GuardError};
use shoal_topology::{mutate, LeaderLease, TopologyError, TopologyState, TopologyStore};
use shoal_types::{Credential, CredentialScope, InternalRole, RelationId, Secret, UnitId};

use crate::error::{CredentialError, Result};
use crate::secret;

/// Resolve a scope from its canonical form (`internal:operator`,
/// `relation:4`) or a username (`operator`, `relation-4`).
pub fn parse_scope(name: &str) -> Result<CredentialScope> {
    if let Ok(scope) = name.parse::<CredentialScope>() {
        return Ok(scope);
    }
    if let Ok(role) = name.parse::<InternalRole>() {
        return Ok(CredentialScope::Internal(role));
    }
    name.strip_prefix("relation-")
        .and_then(|id| id.parse::<RelationId>().ok())
        .map(CredentialScope::Relation)
        .ok_or_else(|| CredentialError::NoSuchScope(name.to_string()))
}

fn current(state: &TopologyState, scope: &CredentialScope) -> Result<Credential> {
    match scope {
        CredentialScope::Internal(_) => state
            .credentials
            .get(scope)
            .cloned()
            .ok_or_else(|| CredentialError::NotBootstrapped(scope.to_string())),
        CredentialScope::Relation(id) => state
            .relation_users
            .get(id)
            .map(|user| user.credential.clone())
            .ok_or_else(|| CredentialError::NoSuchScope(scope.to_string())),
    }
}

fn store_credential(state: &mut TopologyState, credential: Credential) {
    match credential.scope {
        CredentialScope::Internal(_) => {
            state.credentials.insert(credential.scope, credential);
        }
        CredentialScope::Relation(id) => {
            if let Some(user) = state.relation_users.get_mut(&id) {
                user.credential = credential;
            }
        }
    }
}

fn leadership(operation: &'static str) -> impl Fn(CredentialError) -> CredentialError {
    move |err| match err {
        CredentialError::Topology(TopologyError::LeaseRevoked { .. }) => {
            CredentialError::LostLeadership(operation)
        }
        other => other,
    }
}

/// Owns internal user secrets and the replica-set keyfile.
///
/// Every change is applied to the engine first and committed to the store
/// only once the engine accepted it, so the store never advertises a secret
/// the engine does not honour.
pub struct CredentialManager {
    unit: UnitId,
    store: Arc<dyn TopologyStore>,
    engine: Arc<dyn DatabaseEngine>,
    guard: Arc<BoundaryGuard>,
}

impl CredentialManager {
    pub fn new(
        unit: UnitId,
        store: Arc<dyn TopologyStore>,
        engine: Arc<dyn DatabaseEngine>,
        guard: Arc<BoundaryGuard>,
    ) -> Self {
        Self {
            unit,
            store,
            engine,
            guard,
        }
    }

    async fn ensure_leader(&self, lease: &LeaderLease) -> Result<()> {
        if lease.holder != self.unit {
            return Err(CredentialError::NotLeader);
        }
        match self.store.verify_lease(lease).await {
            Ok(()) => Ok(()),
            Err(TopologyError::LeaseRevoked { .. }) => Err(CredentialError::NotLeader),
            Err(e) => Err(e.into()),
        }
    }

    /// Current secret for `name`. Any unit may call this.
    pub async fn get(&self, name: &str) -> Result<Secret> {
        let scope = parse_scope(name)?;
        Ok(self.credential(&scope).await?.secret)
    }

    pub async fn credential(&self, scope: &CredentialScope) -> Result<Credential> {
        let state = self.store.load().await?.value;
        current(&state, scope)
    }

    /// Replace the secret for `scope` with `explicit` or a fresh random one.
    #[instrument(skip(self, lease, explicit), fields(scope = %scope))]
    pub async fn rotate(
        &self,
        lease: &LeaderLease,
        scope: CredentialScope,
        explicit: Option<Secret>,
    ) -> Result<Credential> {
        self.ensure_leader(lease).await?;
        let secret = match explicit {
            Some(secret) => {
                secret::validate(&secret)?;
                secret
            }
            None => secret::generate_password(),
        };

        // Fail before touching the engine if the scope is unknown.
        let state = self.store.load().await?.value;
        current(&state, &scope)?;

        let username = scope.username();
        let engine = self.engine.as_ref();
        let (user, password) = (username.as_str(), &secret);
        self.guard
            .call("set_user_password", move || {
                engine.set_user_password(user, password)
            })
            .await?;

        let rotated = mutate(self.store.as_ref(), lease, |state| -> Result<Credential> {
            let next = current(state, &scope)?.succeed(secret.clone());
            store_credential(state, next.clone());
            Ok(next)
        })
        .await
        .map_err(leadership("rotate"))?;

        info!(generation = rotated.generation, "Credential rotated");
        Ok(rotated)
    }

    /// Generate and install the replica-set keyfile if none is recorded.
    #[instrument(skip(self, lease))]
    pub async fn ensure_generated(&self, lease: &LeaderLease) -> Result<bool> {
        self.ensure_leader(lease).await?;
        if self.store.load().await?.value.keyfile.is_some() {
            return Ok(false);
        }
        self.install_keyfile(lease, secret::generate_keyfile()).await?;
        info!("Replica-set keyfile generated");
        Ok(true)
    }

    /// Use a keyfile supplied by another cluster (sharding handshake).
    pub async fn adopt_keyfile(&self, lease: &LeaderLease, keyfile: Secret) -> Result<bool> {
        self.ensure_leader(lease).await?;
        secret::validate(&keyfile)?;
        if self.store.load().await?.value.keyfile.as_ref() == Some(&keyfile) {
            return Ok(false);
        }
        self.install_keyfile(lease, keyfile).await?;
        info!("Replica-set keyfile adopted");
        Ok(true)
    }

    async fn install_keyfile(&self, lease: &LeaderLease, keyfile: Secret) -> Result<()> {
        let engine = self.engine.as_ref();
        let key = &keyfile;
        self.guard
            .call("install_keyfile", move || engine.install_keyfile(key))
            .await?;
        mutate(self.store.as_ref(), lease, |state| {
            state.keyfile = Some(keyfile.clone());
            Ok::<_, CredentialError>(())
        })
        .await
        .map_err(leadership("keyfile"))
    }

    /// Create the internal users once the replica set is initialised.
    ///
    /// Each user is created in the engine and then recorded at generation 1;
    /// users already recorded are skipped, so a partial run resumes. A user
    /// the engine already holds gets the new password instead.
    #[instrument(skip(self, lease))]
    pub async fn bootstrap_users(&self, lease: &LeaderLease) -> Result<usize> {
        self.ensure_leader(lease).await?;
        let engine = self.engine.as_ref();
        let mut created = 0;

        for role in InternalRole::ALL {
            let state = self.store.load().await?.value;
            if !state.db_initialised {
                return Err(CredentialError::Deferred(
                    "replica set not initialised".into(),
                ));
            }
            let scope = CredentialScope::Internal(role);
            if state.credentials.contains_key(&scope) {
                continue;
            }

            let password = secret::generate_password();
            let spec = UserSpec::new(role.username(), internal_roles(role));
            let (spec_ref, pw) = (&spec, &password);
            let outcome = self
                .guard
                .call("create_user", move || engine.create_user(spec_ref, pw))
                .await;
            match outcome {
                Ok(()) => {}
                Err(GuardError::Rejected(EngineError::UserExists(_))) => {
                    let user = spec.username.as_str();
                    self.guard
                        .call("set_user_password", move || {
                            engine.set_user_password(user, pw)
                        })
                        .await?;
                }
                Err(e) => return Err(e.into()),
            }

            mutate(self.store.as_ref(), lease, |state| {
                state
                    .credentials
                    .insert(scope, Credential::first(scope, password.clone()));
                Ok::<_, CredentialError>(())
            })
            .await
            .map_err(leadership("bootstrap_users"))?;
            created += 1;
        }

        if created > 0 {
            info!(created, "Internal users created");
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_engine::SimulatedEngine;
    use shoal_health::{Boundary, GuardConfig, RetryConfig};
    use shoal_topology::InMemoryTopologyStore;
    use shoal_types::MAX_SECRET_LENGTH;
    use std::time::Duration;

    struct Fixture {
        store: InMemoryTopologyStore,
        engine: SimulatedEngine,
        lease: LeaderLease,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = InMemoryTopologyStore::new();
            let lease = store.acquire_lease(&UnitId::new("shoal/0")).await.unwrap();
            mutate(&store, &lease, |state| {
                state.db_initialised = true;
                Ok::<_, TopologyError>(())
            })
            .await
            .unwrap();
            Self {
                store,
                engine: SimulatedEngine::new(),
                lease,
            }
        }

        fn manager(&self, unit: &str) -> CredentialManager {
            CredentialManager::new(
                UnitId::new(unit),
                Arc::new(self.store.clone()),
                Arc::new(self.engine.clone()),
                Arc::new(BoundaryGuard::new(
                    Boundary::Engine,
                    GuardConfig {
                        retry: RetryConfig::once(Duration::from_secs(5)),
                        ..Default::default()
                    },
                )),
            )
        }
    }

    fn operator() -> CredentialScope {
        CredentialScope::Internal(InternalRole::Operator)
    }

    #[test]
    fn test_parse_scope_forms() {
        assert_eq!(parse_scope("operator").unwrap(), operator());
        assert_eq!(parse_scope("internal:operator").unwrap(), operator());
        assert_eq!(
            parse_scope("relation-7").unwrap(),
            CredentialScope::Relation(RelationId::new(7))
        );
        assert!(matches!(
            parse_scope("root"),
            Err(CredentialError::NoSuchScope(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_users_once() {
        let fx = Fixture::new().await;
        let manager = fx.manager("shoal/0");

        assert_eq!(manager.bootstrap_users(&fx.lease).await.unwrap(), 3);
        assert_eq!(manager.bootstrap_users(&fx.lease).await.unwrap(), 0);

        let operator_pw = manager.get("operator").await.unwrap();
        assert!(fx.engine.authenticate("operator", &operator_pw).await.unwrap());
        let monitor = fx.engine.user_roles("monitor").unwrap();
        assert!(monitor.roles.iter().any(|g| g.role == "clusterMonitor"));
        assert_eq!(manager.credential(&operator()).await.unwrap().generation, 1);
    }

    #[tokio::test]
    async fn test_rotate_supersedes_previous_secret() {
        let fx = Fixture::new().await;
        let manager = fx.manager("shoal/0");
        manager.bootstrap_users(&fx.lease).await.unwrap();
        let old = manager.get("operator").await.unwrap();

        let rotated = manager
            .rotate(&fx.lease, operator(), Some(Secret::new("newpw")))
            .await
            .unwrap();
        assert_eq!(rotated.generation, 2);

        let current = manager.get("internal:operator").await.unwrap();
        assert_eq!(current, Secret::new("newpw"));
        assert!(fx.engine.authenticate("operator", &current).await.unwrap());
        assert!(!fx.engine.authenticate("operator", &old).await.unwrap());
    }

    #[tokio::test]
    async fn test_non_leader_rotate_changes_nothing() {
        let fx = Fixture::new().await;
        fx.manager("shoal/0")
            .bootstrap_users(&fx.lease)
            .await
            .unwrap();

        let follower = fx.manager("shoal/1");
        let err = follower
            .rotate(&fx.lease, operator(), Some(Secret::new("newpw")))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::NotLeader));
        assert_eq!(err.class(), shoal_types::ErrorClass::Unauthorized);
        assert_eq!(follower.credential(&operator()).await.unwrap().generation, 1);
    }

    #[tokio::test]
    async fn test_oversized_secret_rejected() {
        let fx = Fixture::new().await;
        let manager = fx.manager("shoal/0");
        manager.bootstrap_users(&fx.lease).await.unwrap();

        let long = Secret::new("a".repeat(MAX_SECRET_LENGTH + 1));
        let err = manager
            .rotate(&fx.lease, operator(), Some(long))
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::InvalidSecret(_)));
        assert_eq!(manager.credential(&operator()).await.unwrap().generation, 1);
    }

    #[tokio::test]
    async fn test_unreachable_engine_defers_rotation() {
        let fx = Fixture::new().await;
        let manager = fx.manager("shoal/0");
        manager.bootstrap_users(&fx.lease).await.unwrap();
        let before = manager.get("operator").await.unwrap();

        fx.engine.set_reachable(false);
        let err = manager.rotate(&fx.lease, operator(), None).await.unwrap_err();
        assert!(matches!(err, CredentialError::Deferred(_)));
        assert!(err.class().is_retryable());
        assert_eq!(manager.get("operator").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_unknown_and_missing_scopes() {
        let fx = Fixture::new().await;
        let manager = fx.manager("shoal/0");

        assert!(matches!(
            manager.get("relation-3").await,
            Err(CredentialError::NoSuchScope(_))
        ));
        assert!(matches!(
            manager.get("backup").await,
            Err(CredentialError::NotBootstrapped(_))
        ));
    }

    #[tokio::test]
    async fn test_keyfile_generated_once() {
        let fx = Fixture::new().await;
        let manager = fx.manager("shoal/0");

        assert!(manager.ensure_generated(&fx.lease).await.unwrap());
        assert!(!manager.ensure_generated(&fx.lease).await.unwrap());

        let stored = fx.store.load().await.unwrap().value.keyfile.unwrap();
        assert_eq!(stored.len(), secret::KEYFILE_LENGTH);
        assert_eq!(fx.engine.keyfile(), Some(stored));
    }
}
