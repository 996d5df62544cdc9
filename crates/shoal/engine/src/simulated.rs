//! In-memory engine for development and testing.
//!
//! Applies the same rules a real replica set enforces on the commands the
//! control plane sends (version + 1 on reconfigure, primary elections on
//! step-down, unique usernames), with switches for unreachability, injected
//! failures and catch-up progress.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use shoal_types::{ReplicaSetConfig, Secret};

use crate::engine::{DatabaseEngine, MemberState, MemberStatus, UserSpec};
use crate::error::{EngineError, Result};

struct SimState {
    config: Option<ReplicaSetConfig>,
    status: BTreeMap<u32, MemberStatus>,
    users: HashMap<String, (UserSpec, Secret)>,
    databases: BTreeSet<String>,
    shards: BTreeMap<String, Vec<String>>,
    keyfile: Option<Secret>,
    reachable: bool,
    auto_catch_up: bool,
    injected: VecDeque<EngineError>,
    reconfigure_failures: VecDeque<EngineError>,
    reconfigure_calls: usize,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            config: None,
            status: BTreeMap::new(),
            users: HashMap::new(),
            databases: ["admin", "config", "local"].iter().map(|d| d.to_string()).collect(),
            shards: BTreeMap::new(),
            keyfile: None,
            reachable: true,
            auto_catch_up: true,
            injected: VecDeque::new(),
            reconfigure_failures: VecDeque::new(),
            reconfigure_calls: 0,
        }
    }
}

impl SimState {
    fn elect_if_needed(&mut self) {
        if self.status.values().any(|s| s.state == MemberState::Primary) {
            return;
        }
        let Some(config) = &self.config else { return };
        let candidate = config.voters().find(|m| {
            self.status
                .get(&m.id)
                .is_some_and(|s| s.healthy && s.caught_up && s.state == MemberState::Secondary)
        });
        if let Some(member) = candidate {
            let id = member.id;
            if let Some(status) = self.status.get_mut(&id) {
                status.state = MemberState::Primary;
            }
            if let Some(config) = self.config.as_mut() {
                config.term += 1;
            }
        }
    }
}

/// Shared in-memory replica set.
#[derive(Clone, Default)]
pub struct SimulatedEngine {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Entry check for every command.
    fn enter(&self) -> Result<MutexGuard<'_, SimState>> {
        let mut state = self.state();
        if !state.reachable {
            return Err(EngineError::Unreachable("connection refused".into()));
        }
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        Ok(state)
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Fail the next command with `err`.
    pub fn inject_failure(&self, err: EngineError) {
        self.state().injected.push_back(err);
    }

    /// Fail the next `reconfigure` with `err`, after its reads succeed.
    pub fn inject_reconfigure_failure(&self, err: EngineError) {
        self.state().reconfigure_failures.push_back(err);
    }

    /// Whether newly added members are immediately caught up.
    pub fn set_auto_catch_up(&self, enabled: bool) {
        self.state().auto_catch_up = enabled;
    }

    pub fn mark_caught_up(&self, member_id: u32) {
        let mut state = self.state();
        if let Some(status) = state.status.get_mut(&member_id) {
            status.caught_up = true;
            if status.state == MemberState::Startup2 {
                status.state = MemberState::Secondary;
            }
        }
        state.elect_if_needed();
    }

    pub fn set_member_state(&self, member_id: u32, member_state: MemberState, healthy: bool) {
        let mut state = self.state();
        if let Some(status) = state.status.get_mut(&member_id) {
            status.state = member_state;
            status.healthy = healthy;
        }
    }

    /// Simulate an outside writer bumping the live config version.
    pub fn bump_version(&self) {
        if let Some(config) = self.state().config.as_mut() {
            config.version += 1;
        }
    }

    pub fn reconfigure_count(&self) -> usize {
        self.state().reconfigure_calls
    }

    pub fn primary_id(&self) -> Option<u32> {
        self.state()
            .status
            .values()
            .find(|s| s.state == MemberState::Primary)
            .map(|s| s.member_id)
    }

    pub fn user_roles(&self, username: &str) -> Option<UserSpec> {
        self.state().users.get(username).map(|(spec, _)| spec.clone())
    }

    pub fn keyfile(&self) -> Option<Secret> {
        self.state().keyfile.clone()
    }

    /// A client wrote to `name`, creating it.
    pub fn create_database(&self, name: &str) {
        self.state().databases.insert(name.to_string());
    }

    pub fn shards(&self) -> BTreeMap<String, Vec<String>> {
        self.state().shards.clone()
    }
}

#[async_trait]
impl DatabaseEngine for SimulatedEngine {
    async fn ping(&self) -> Result<()> {
        self.enter().map(|_| ())
    }

    async fn replica_set_config(&self) -> Result<Option<ReplicaSetConfig>> {
        Ok(self.enter()?.config.clone())
    }

    async fn replica_set_status(&self) -> Result<Vec<MemberStatus>> {
        let state = self.enter()?;
        if state.config.is_none() {
            return Err(EngineError::NotInitialised);
        }
        Ok(state.status.values().cloned().collect())
    }

    async fn initiate(&self, config: &ReplicaSetConfig) -> Result<()> {
        let mut state = self.enter()?;
        if state.config.is_some() {
            return Err(EngineError::AlreadyInitialised);
        }
        for member in &config.members {
            state.status.insert(
                member.id,
                MemberStatus {
                    member_id: member.id,
                    address: member.address.clone(),
                    state: MemberState::Secondary,
                    healthy: true,
                    caught_up: true,
                },
            );
        }
        state.config = Some(config.clone());
        state.elect_if_needed();
        debug!(name = %config.name, "Simulated replica set initiated");
        Ok(())
    }

    async fn reconfigure(&self, config: &ReplicaSetConfig) -> Result<()> {
        let mut state = self.enter()?;
        if let Some(err) = state.reconfigure_failures.pop_front() {
            return Err(err);
        }
        let current = state.config.as_ref().ok_or(EngineError::NotInitialised)?;
        if config.version != current.version + 1 {
            return Err(EngineError::VersionConflict {
                expected: current.version + 1,
                actual: config.version,
            });
        }

        let mut next = config.clone();
        next.term = current.term;
        let auto_catch_up = state.auto_catch_up;

        state
            .status
            .retain(|id, _| config.members.iter().any(|m| m.id == *id));
        for member in &config.members {
            state.status.entry(member.id).or_insert_with(|| MemberStatus {
                member_id: member.id,
                address: member.address.clone(),
                state: if auto_catch_up {
                    MemberState::Secondary
                } else {
                    MemberState::Startup2
                },
                healthy: true,
                caught_up: auto_catch_up,
            });
        }

        state.config = Some(next);
        state.reconfigure_calls += 1;
        state.elect_if_needed();
        debug!(version = config.version, "Simulated replica set reconfigured");
        Ok(())
    }

    async fn step_down(&self, member_id: u32) -> Result<()> {
        let mut state = self.enter()?;
        let is_primary = state
            .status
            .get(&member_id)
            .is_some_and(|s| s.state == MemberState::Primary);
        if !is_primary {
            return Ok(());
        }

        let voters: Vec<u32> = state
            .config
            .as_ref()
            .map(|c| c.voters().map(|m| m.id).collect())
            .unwrap_or_default();
        let successor = voters.into_iter().find(|id| {
            *id != member_id
                && state.status.get(id).is_some_and(|s| {
                    s.healthy && s.caught_up && s.state == MemberState::Secondary
                })
        });
        let Some(successor) = successor else {
            return Err(EngineError::CommandFailed(
                "no electable secondaries caught up".into(),
            ));
        };

        if let Some(status) = state.status.get_mut(&member_id) {
            status.state = MemberState::Secondary;
        }
        if let Some(status) = state.status.get_mut(&successor) {
            status.state = MemberState::Primary;
        }
        if let Some(config) = state.config.as_mut() {
            config.term += 1;
        }
        Ok(())
    }

    async fn create_user(&self, user: &UserSpec, password: &Secret) -> Result<()> {
        let mut state = self.enter()?;
        if state.users.contains_key(&user.username) {
            return Err(EngineError::UserExists(user.username.clone()));
        }
        state
            .users
            .insert(user.username.clone(), (user.clone(), password.clone()));
        Ok(())
    }

    async fn set_user_password(&self, username: &str, password: &Secret) -> Result<()> {
        let mut state = self.enter()?;
        match state.users.get_mut(username) {
            Some((_, current)) => {
                *current = password.clone();
                Ok(())
            }
            None => Err(EngineError::UserNotFound(username.to_string())),
        }
    }

    async fn drop_user(&self, username: &str) -> Result<()> {
        let mut state = self.enter()?;
        state
            .users
            .remove(username)
            .map(|_| ())
            .ok_or_else(|| EngineError::UserNotFound(username.to_string()))
    }

    async fn user_exists(&self, username: &str) -> Result<bool> {
        Ok(self.enter()?.users.contains_key(username))
    }

    async fn authenticate(&self, username: &str, password: &Secret) -> Result<bool> {
        let state = self.enter()?;
        Ok(state
            .users
            .get(username)
            .is_some_and(|(_, current)| current == password))
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(self.enter()?.databases.iter().cloned().collect())
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        self.enter()?.databases.remove(name);
        Ok(())
    }

    async fn install_keyfile(&self, keyfile: &Secret) -> Result<()> {
        self.enter()?.keyfile = Some(keyfile.clone());
        Ok(())
    }

    async fn add_shard(&self, name: &str, hosts: &[String]) -> Result<()> {
        self.enter()?
            .shards
            .insert(name.to_string(), hosts.to_vec());
        Ok(())
    }

    async fn remove_shard(&self, name: &str) -> Result<()> {
        self.enter()?.shards.remove(name);
        Ok(())
    }

    async fn list_shards(&self) -> Result<Vec<String>> {
        Ok(self.enter()?.shards.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_types::{Member, UnitId};

    fn single(name: &str) -> ReplicaSetConfig {
        let mut config = ReplicaSetConfig::new(name);
        config.version = 1;
        config
            .members
            .push(Member::new(0, UnitId::new("shoal/0"), "10.0.0.1:27017"));
        config
    }

    #[tokio::test]
    async fn test_initiate_elects_primary() {
        let engine = SimulatedEngine::new();
        engine.initiate(&single("rs0")).await.unwrap();
        assert_eq!(engine.primary_id(), Some(0));
        assert_eq!(
            engine.initiate(&single("rs0")).await,
            Err(EngineError::AlreadyInitialised)
        );
    }

    #[tokio::test]
    async fn test_reconfigure_requires_next_version() {
        let engine = SimulatedEngine::new();
        engine.initiate(&single("rs0")).await.unwrap();

        let mut next = single("rs0");
        next.version = 3;
        assert_eq!(
            engine.reconfigure(&next).await,
            Err(EngineError::VersionConflict {
                expected: 2,
                actual: 3
            })
        );

        next.version = 2;
        next.members
            .push(Member::new(1, UnitId::new("shoal/1"), "10.0.0.2:27017").non_voting());
        engine.reconfigure(&next).await.unwrap();
        assert_eq!(engine.replica_set_status().await.unwrap().len(), 2);
        assert_eq!(engine.reconfigure_count(), 1);
    }

    #[tokio::test]
    async fn test_new_member_waits_for_catch_up() {
        let engine = SimulatedEngine::new();
        engine.set_auto_catch_up(false);
        engine.initiate(&single("rs0")).await.unwrap();

        let mut next = single("rs0");
        next.version = 2;
        next.members
            .push(Member::new(1, UnitId::new("shoal/1"), "10.0.0.2:27017").non_voting());
        engine.reconfigure(&next).await.unwrap();

        let status = engine.replica_set_status().await.unwrap();
        let added = status.iter().find(|s| s.member_id == 1).unwrap();
        assert_eq!(added.state, MemberState::Startup2);
        assert!(!added.caught_up);

        engine.mark_caught_up(1);
        let status = engine.replica_set_status().await.unwrap();
        assert!(status.iter().find(|s| s.member_id == 1).unwrap().caught_up);
    }

    #[tokio::test]
    async fn test_unreachable_and_injected_failures() {
        let engine = SimulatedEngine::new();
        engine.set_reachable(false);
        assert!(engine.ping().await.unwrap_err().is_transient());

        engine.set_reachable(true);
        engine.inject_failure(EngineError::Timeout);
        assert_eq!(engine.ping().await, Err(EngineError::Timeout));
        assert!(engine.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_password_change_invalidates_old() {
        let engine = SimulatedEngine::new();
        let user = UserSpec::new("operator", vec![]);
        engine.create_user(&user, &Secret::new("old")).await.unwrap();
        engine
            .set_user_password("operator", &Secret::new("new"))
            .await
            .unwrap();

        assert!(!engine.authenticate("operator", &Secret::new("old")).await.unwrap());
        assert!(engine.authenticate("operator", &Secret::new("new")).await.unwrap());
    }
}
