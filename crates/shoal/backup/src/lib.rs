//! # Shoal Backup
//!
//! Backups and restores through the backup agent that runs next to each
//! member's engine.
//!
//! - [`BackupAgent`]: the agent boundary, with [`InMemoryBackupAgent`] for
//!   tests and simulation
//! - [`BackupCoordinator`]: leader-only `create` and `restore`, `list`,
//!   and `refresh` of in-progress records
//! - [`agent_options`]: object-storage credentials as agent options
//! - [`format_backup_table`]: the `list-backups` rendering

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod agent;
pub mod coordinator;
pub mod error;
pub mod options;
pub mod remap;
pub mod table;

pub use agent::{AgentBackup, BackupAgent, InMemoryBackupAgent, StorageStatus};
pub use coordinator::BackupCoordinator;
pub use error::{AgentError, BackupError, Result};
pub use options::agent_options;
pub use remap::{check_remap, parse_remap};
pub use table::format_backup_table;
