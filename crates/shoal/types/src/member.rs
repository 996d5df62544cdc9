//! Replica-set members and configurations.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::UnitId;

/// Upper bound on voting members in one replica set.
pub const MAX_VOTING_MEMBERS: usize = 7;

/// Role hint reported by the engine for a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Primary,
    #[default]
    Secondary,
    Arbiter,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRole::Primary => write!(f, "primary"),
            MemberRole::Secondary => write!(f, "secondary"),
            MemberRole::Arbiter => write!(f, "arbiter"),
        }
    }
}

/// Health of a member as last observed on the live engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemberHealth {
    Healthy,
    Unreachable,
    #[default]
    Unknown,
}

impl MemberHealth {
    /// Unknown members are counted as reachable until proven otherwise.
    pub fn is_reachable(&self) -> bool {
        !matches!(self, MemberHealth::Unreachable)
    }
}

/// One member of the replica set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Numeric id used by the engine; stable for the life of the member.
    pub id: u32,
    pub unit: UnitId,
    /// `host:port`
    pub address: String,
    pub voting: bool,
    #[serde(default)]
    pub role: MemberRole,
    #[serde(default)]
    pub health: MemberHealth,
}

impl Member {
    pub fn new(id: u32, unit: UnitId, address: impl Into<String>) -> Self {
        Self {
            id,
            unit,
            address: address.into(),
            voting: true,
            role: MemberRole::Secondary,
            health: MemberHealth::Unknown,
        }
    }

    pub fn non_voting(mut self) -> Self {
        self.voting = false;
        self
    }

    pub fn is_reachable_voter(&self) -> bool {
        self.voting && self.health.is_reachable()
    }
}

/// Ordered member list with version and term counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSetConfig {
    pub name: String,
    pub members: Vec<Member>,
    pub version: u64,
    #[serde(default)]
    pub term: u64,
}

impl ReplicaSetConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            version: 0,
            term: 0,
        }
    }

    pub fn member(&self, unit: &UnitId) -> Option<&Member> {
        self.members.iter().find(|m| &m.unit == unit)
    }

    pub fn member_mut(&mut self, unit: &UnitId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| &m.unit == unit)
    }

    pub fn member_by_id(&self, id: u32) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, unit: &UnitId) -> bool {
        self.member(unit).is_some()
    }

    pub fn voters(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.voting)
    }

    pub fn voter_count(&self) -> usize {
        self.voters().count()
    }

    pub fn reachable_voter_count(&self) -> usize {
        self.members.iter().filter(|m| m.is_reachable_voter()).count()
    }

    pub fn primary(&self) -> Option<&Member> {
        self.members.iter().find(|m| m.role == MemberRole::Primary)
    }

    pub fn hosts(&self) -> Vec<String> {
        self.members.iter().map(|m| m.address.clone()).collect()
    }

    /// True when both configs describe the same membership, ignoring
    /// observed role and health.
    pub fn same_membership(&self, other: &ReplicaSetConfig) -> bool {
        self.members.len() == other.members.len()
            && self.members.iter().all(|m| {
                other.member_by_id(m.id).is_some_and(|o| {
                    o.unit == m.unit && o.address == m.address && o.voting == m.voting
                })
            })
    }
}

/// Role this application plays in a sharded topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterRole {
    #[default]
    ReplicaSet,
    ConfigServer,
    Shard,
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterRole::ReplicaSet => write!(f, "replication"),
            ClusterRole::ConfigServer => write!(f, "config-server"),
            ClusterRole::Shard => write!(f, "shard"),
        }
    }
}
