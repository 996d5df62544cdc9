//! # Shoal Control
//!
//! The per-unit control loop: one [`UnitAgent`] per member receives typed
//! [`LifecycleEvent`]s and drives the components.
//!
//! - [`event`]: lifecycle events, relation events, actions and outcomes
//! - [`RetryQueue`]: deferred events replayed with backoff
//! - [`StatusBoard`]: unit status from independent conditions
//! - [`EventAggregator`]: audit stream of committed mutations
//! - [`UnitAgentBuilder`]: wiring of store, engine, authority and backup
//!   agent

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod agent;
pub mod audit;
pub mod builder;
pub mod error;
pub mod event;
pub mod retry;
pub mod status;

pub use agent::UnitAgent;
pub use audit::EventAggregator;
pub use builder::UnitAgentBuilder;
pub use error::{ControlError, Result};
pub use event::{
    ActionFailure, ActionRequest, ActionResponse, EventOutcome, LifecycleEvent, Publication,
    RelationChange, RelationEvent,
};
pub use retry::{Deferral, PendingEvent, RetryQueue, RetryQueueConfig};
pub use status::{Condition, StatusBoard};
