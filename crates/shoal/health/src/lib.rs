//! # Shoal Boundary Health
//!
//! Every call from the control loop to an external collaborator (the
//! database engine, the certificate authority, object storage) goes through
//! a [`BoundaryGuard`]: a per-attempt timeout, bounded exponential backoff
//! and a [`CircuitBreaker`]. A call that cannot complete within its budget
//! comes back as [`GuardError::Deferred`] so the event can be replayed on a
//! later trigger instead of blocking the loop.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod boundary;
pub mod circuit_breaker;
pub mod config;
pub mod guard;

pub use boundary::{Boundary, Transient};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::{CircuitBreakerConfig, GuardConfig, RetryConfig};
pub use guard::{BoundaryGuard, GuardError};
