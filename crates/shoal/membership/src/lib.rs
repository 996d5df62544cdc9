//! # Shoal Membership
//!
//! Quorum-safe reconfiguration of the live replica set.
//!
//! - [`Reconfigurator`]: leader-only join/leave requests serialized by a
//!   cluster-wide lock, and the idempotent [`Reconfigurator::reconcile`]
//!   pass that applies one single-member change per engine call
//! - [`plan`]: pure removal-safety and mutation planning
//!
//! Removal safety: every step of a leave batch must keep a strict majority
//! of the voters present before the batch reachable. A batch that fails
//! anywhere is rejected before anything changes.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod plan;
pub mod reconfigurator;

pub use config::ReconfigConfig;
pub use error::{MembershipError, Result};
pub use plan::{next_mutation, plan_removal, required_voters, Mutation, RemovalStep};
pub use reconfigurator::{ReconcileOutcome, Reconfigurator, RequestOutcome};
