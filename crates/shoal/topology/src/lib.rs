//! # Shoal Topology Store
//!
//! Durable state shared by every member of the cluster, with a single
//! logical writer.
//!
//! - [`TopologyStore`]: load/commit with revision compare-and-swap
//! - [`LeaderLease`]: the single-writer proof every app-level commit carries
//! - [`mutate`]: load, modify and commit with retry on lost races
//! - [`codec`]: flat peer data-bag layout of [`TopologyState`]
//! - [`InMemoryTopologyStore`]: shared in-memory backend for tests and
//!   simulation

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod codec;
pub mod error;
pub mod lease;
pub mod memory;
pub mod state;
pub mod store;

pub use error::{Result, TopologyError};
pub use lease::LeaderLease;
pub use memory::InMemoryTopologyStore;
pub use state::{
    DesiredMember, LegacyRelation, LockedOperation, PendingChange, ReconfigLock, ShardRecord,
    TopologyState, UnitData,
};
pub use store::{mutate, TopologyStore, Versioned, MAX_COMMIT_ATTEMPTS};
