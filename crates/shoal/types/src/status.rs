//! Unit status and the error taxonomy shared by all components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Workload status shown for a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum UnitStatus {
    Active(String),
    Maintenance(String),
    Waiting(String),
    Blocked(String),
}

impl UnitStatus {
    /// Higher wins when several conditions hold at once.
    pub fn priority(&self) -> u8 {
        match self {
            UnitStatus::Active(_) => 0,
            UnitStatus::Maintenance(_) => 1,
            UnitStatus::Waiting(_) => 2,
            UnitStatus::Blocked(_) => 3,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            UnitStatus::Active(m)
            | UnitStatus::Maintenance(m)
            | UnitStatus::Waiting(m)
            | UnitStatus::Blocked(m) => m,
        }
    }
}

impl Default for UnitStatus {
    fn default() -> Self {
        UnitStatus::Active(String::new())
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitStatus::Active(_) => "active",
            UnitStatus::Maintenance(_) => "maintenance",
            UnitStatus::Waiting(_) => "waiting",
            UnitStatus::Blocked(_) => "blocked",
        };
        if self.message().is_empty() {
            f.write_str(name)
        } else {
            write!(f, "{}: {}", name, self.message())
        }
    }
}

/// How the control loop treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    /// Collaborator unreachable or slow; replayed on a later trigger.
    Transient,
    /// Would break quorum or another safety rule; never partially applied.
    SafetyViolation,
    /// Leader-only mutation attempted by a non-leader.
    Unauthorized,
    /// Needs an external action such as adding a relation.
    MissingDependency,
    NotFound,
    Invalid,
    Internal,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::Transient => "transient",
            ErrorClass::SafetyViolation => "safety-violation",
            ErrorClass::Unauthorized => "unauthorized",
            ErrorClass::MissingDependency => "missing-dependency",
            ErrorClass::NotFound => "not-found",
            ErrorClass::Invalid => "invalid",
            ErrorClass::Internal => "internal",
        };
        f.write_str(name)
    }
}
