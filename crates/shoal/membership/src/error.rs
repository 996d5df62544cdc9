//! Error types for membership reconfiguration

use thiserror::Error;

use shoal_engine::EngineError;
use shoal_health::GuardError;
use shoal_topology::TopologyError;
use shoal_types::{ErrorClass, UnitId};

#[derive(Debug, Error)]
pub enum MembershipError {
    /// Caller does not hold the leader lease.
    #[error("not leader")]
    NotLeader,

    /// Leadership moved while the operation was running.
    #[error("lost leadership during {0}")]
    LostLeadership(&'static str),

    #[error("reconfiguration in progress ({operation} held by {holder})")]
    ReconfigurationInProgress { holder: UnitId, operation: String },

    /// Removing `member` at `step` would leave too few voters.
    #[error(
        "majority violation at step {step} removing {member}: {remaining} of {baseline} voters \
         would remain, {required} required"
    )]
    MajorityViolation {
        step: usize,
        member: UnitId,
        remaining: usize,
        required: usize,
        baseline: usize,
    },

    #[error("replica set not initialised")]
    NotInitialised,

    /// Retry on a later trigger.
    #[error("deferred: {0}")]
    Deferred(String),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),
}

impl MembershipError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MembershipError::NotLeader => ErrorClass::Unauthorized,
            MembershipError::LostLeadership(_)
            | MembershipError::NotInitialised
            | MembershipError::Deferred(_) => ErrorClass::Transient,
            MembershipError::ReconfigurationInProgress { .. }
            | MembershipError::MajorityViolation { .. } => ErrorClass::SafetyViolation,
            MembershipError::Engine(e) if e.is_transient() => ErrorClass::Transient,
            MembershipError::Engine(_) => ErrorClass::Internal,
            MembershipError::Topology(e) if e.is_transient() => ErrorClass::Transient,
            MembershipError::Topology(_) => ErrorClass::Internal,
        }
    }
}

impl From<GuardError<EngineError>> for MembershipError {
    fn from(err: GuardError<EngineError>) -> Self {
        match err {
            GuardError::Rejected(e) => MembershipError::Engine(e),
            deferred => MembershipError::Deferred(deferred.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MembershipError>;
