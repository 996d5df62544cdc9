//! # Shoal Engine Boundary
//!
//! The commands the control plane sends to the live database engine, the
//! role grants it applies to users, and an in-memory [`SimulatedEngine`].
//!
//! The engine owns the actual replica-set configuration and member health;
//! every other piece of state lives in the topology store.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod engine;
pub mod error;
pub mod roles;
pub mod simulated;
pub mod uri;

pub use engine::{DatabaseEngine, MemberState, MemberStatus, UserSpec};
pub use error::{EngineError, Result};
pub use roles::{internal_roles, relation_roles, RoleGrant};
pub use simulated::SimulatedEngine;
pub use uri::{connection_uri, member_address};
