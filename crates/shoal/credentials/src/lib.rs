//! # Shoal Credentials
//!
//! Internal user secrets (`operator`, `backup`, `monitor`), their rotation,
//! and the keyfile the replica set uses for intra-cluster authentication.
//!
//! Rotation is leader-only and engine-first: the new secret is applied to
//! the engine, and only a confirmed change is committed to the topology
//! store as the next generation.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod manager;
pub mod secret;

pub use error::{CredentialError, Result};
pub use manager::{parse_scope, CredentialManager};
pub use secret::{generate_keyfile, generate_password, KEYFILE_LENGTH, PASSWORD_LENGTH};
