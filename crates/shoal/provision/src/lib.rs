//! # Shoal Provision
//!
//! Everything the cluster hands out to other applications over relations:
//!
//! - [`RelationUserProvisioner`]: one database user per authenticated
//!   client relation, the legacy unauthenticated variant, and endpoint
//!   refresh after membership changes
//! - [`ShardingCoordinator`]: the config-server / shard handshake

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod database;
pub mod error;
pub mod provisioner;
pub mod sharding;

pub use config::ProvisionConfig;
pub use database::{validate_database_name, MAX_DATABASE_NAME_BYTES};
pub use error::{ProvisionError, Result};
pub use provisioner::{ProvisionOutcome, RelationUserProvisioner};
pub use sharding::ShardingCoordinator;
