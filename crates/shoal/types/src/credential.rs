//! Credentials, their scopes and relation users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::ids::RelationId;

/// Longest secret accepted from an operator.
pub const MAX_SECRET_LENGTH: usize = 4096;

/// Secret string whose `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// System users managed by the control plane itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InternalRole {
    Operator,
    Backup,
    Monitor,
}

impl InternalRole {
    pub const ALL: [InternalRole; 3] = [
        InternalRole::Operator,
        InternalRole::Backup,
        InternalRole::Monitor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InternalRole::Operator => "operator",
            InternalRole::Backup => "backup",
            InternalRole::Monitor => "monitor",
        }
    }

    /// Engine username for the role.
    pub fn username(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for InternalRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InternalRole {
    type Err = ScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "operator" => Ok(InternalRole::Operator),
            "backup" => Ok(InternalRole::Backup),
            "monitor" => Ok(InternalRole::Monitor),
            other => Err(ScopeParseError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeParseError {
    #[error("unknown internal role: {0}")]
    UnknownRole(String),

    #[error("malformed credential scope: {0}")]
    Malformed(String),
}

/// What a credential authenticates: a system role or one relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CredentialScope {
    Internal(InternalRole),
    Relation(RelationId),
}

impl CredentialScope {
    pub fn username(&self) -> String {
        match self {
            CredentialScope::Internal(role) => role.username().to_string(),
            CredentialScope::Relation(id) => RelationUser::username_for(*id),
        }
    }
}

impl fmt::Display for CredentialScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialScope::Internal(role) => write!(f, "internal:{}", role),
            CredentialScope::Relation(id) => write!(f, "relation:{}", id),
        }
    }
}

impl FromStr for CredentialScope {
    type Err = ScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("internal", role)) => Ok(CredentialScope::Internal(role.parse()?)),
            Some(("relation", id)) => id
                .parse()
                .map(CredentialScope::Relation)
                .map_err(|_| ScopeParseError::Malformed(s.to_string())),
            _ => Err(ScopeParseError::Malformed(s.to_string())),
        }
    }
}

impl TryFrom<String> for CredentialScope {
    type Error = ScopeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CredentialScope> for String {
    fn from(scope: CredentialScope) -> Self {
        scope.to_string()
    }
}

/// One generation of a secret for a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub scope: CredentialScope,
    pub secret: Secret,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    pub fn first(scope: CredentialScope, secret: Secret) -> Self {
        Self {
            scope,
            secret,
            generation: 1,
            created_at: Utc::now(),
        }
    }

    /// The generation that supersedes this one.
    pub fn succeed(&self, secret: Secret) -> Self {
        Self {
            scope: self.scope,
            secret,
            generation: self.generation + 1,
            created_at: Utc::now(),
        }
    }
}

/// Database user owned by one live relation instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationUser {
    pub relation_id: RelationId,
    pub username: String,
    pub database: String,
    pub roles: Vec<String>,
    pub credential: Credential,
}

impl RelationUser {
    pub fn username_for(relation_id: RelationId) -> String {
        format!("relation-{}", relation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_round_trip() {
        let scope: CredentialScope = "internal:monitor".parse().unwrap();
        assert_eq!(scope, CredentialScope::Internal(InternalRole::Monitor));
        assert_eq!(scope.to_string(), "internal:monitor");

        let scope: CredentialScope = "relation:7".parse().unwrap();
        assert_eq!(scope.username(), "relation-7");
    }

    #[test]
    fn test_unknown_role_rejected() {
        let err = "internal:root".parse::<CredentialScope>().unwrap_err();
        assert_eq!(err, ScopeParseError::UnknownRole("root".into()));
        assert!("relation:x".parse::<CredentialScope>().is_err());
        assert!("operator".parse::<CredentialScope>().is_err());
    }

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "Secret(***)");
    }

    #[test]
    fn test_succeed_bumps_generation() {
        let first = Credential::first(
            CredentialScope::Internal(InternalRole::Operator),
            Secret::new("a"),
        );
        let next = first.succeed(Secret::new("b"));
        assert_eq!(next.generation, 2);
        assert_eq!(next.scope, first.scope);
    }
}
