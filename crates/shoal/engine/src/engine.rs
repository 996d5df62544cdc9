//! The live database engine as seen by the control plane.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use shoal_types::{ReplicaSetConfig, Secret};

use crate::error::Result;
use crate::roles::RoleGrant;

/// Replication state of a member as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberState {
    Primary,
    Secondary,
    Startup,
    Startup2,
    Recovering,
    Arbiter,
    Down,
    Removed,
    Unknown,
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemberState::Primary => "PRIMARY",
            MemberState::Secondary => "SECONDARY",
            MemberState::Startup => "STARTUP",
            MemberState::Startup2 => "STARTUP2",
            MemberState::Recovering => "RECOVERING",
            MemberState::Arbiter => "ARBITER",
            MemberState::Down => "DOWN",
            MemberState::Removed => "REMOVED",
            MemberState::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// One row of the engine's replica-set status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStatus {
    pub member_id: u32,
    pub address: String,
    pub state: MemberState,
    pub healthy: bool,
    /// Data has caught up with the primary.
    pub caught_up: bool,
}

/// A database user as the engine should hold it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub username: String,
    /// Authentication database.
    pub auth_database: String,
    pub roles: Vec<RoleGrant>,
}

impl UserSpec {
    pub fn new(username: impl Into<String>, roles: Vec<RoleGrant>) -> Self {
        Self {
            username: username.into(),
            auth_database: "admin".into(),
            roles,
        }
    }
}

/// Commands the control plane issues to the running database.
///
/// Implementations talk to a real process; [`crate::SimulatedEngine`] keeps
/// everything in memory.
#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// Live configuration, `None` before initiation.
    async fn replica_set_config(&self) -> Result<Option<ReplicaSetConfig>>;

    async fn replica_set_status(&self) -> Result<Vec<MemberStatus>>;

    async fn initiate(&self, config: &ReplicaSetConfig) -> Result<()>;

    /// Apply `config`; its version must be exactly one above the live one.
    async fn reconfigure(&self, config: &ReplicaSetConfig) -> Result<()>;

    /// Ask the member to give up primary.
    async fn step_down(&self, member_id: u32) -> Result<()>;

    async fn create_user(&self, user: &UserSpec, password: &Secret) -> Result<()>;

    async fn set_user_password(&self, username: &str, password: &Secret) -> Result<()>;

    async fn drop_user(&self, username: &str) -> Result<()>;

    async fn user_exists(&self, username: &str) -> Result<bool>;

    /// True if the credentials authenticate right now.
    async fn authenticate(&self, username: &str, password: &Secret) -> Result<bool>;

    async fn list_databases(&self) -> Result<Vec<String>>;

    async fn drop_database(&self, name: &str) -> Result<()>;

    /// Replace the keyfile used for intra-cluster authentication.
    async fn install_keyfile(&self, keyfile: &Secret) -> Result<()>;

    async fn add_shard(&self, name: &str, hosts: &[String]) -> Result<()>;

    async fn remove_shard(&self, name: &str) -> Result<()>;

    async fn list_shards(&self) -> Result<Vec<String>>;
}
