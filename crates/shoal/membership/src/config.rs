//! Reconfigurator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconfigConfig {
    /// Replica-set name used at initiation.
    pub replica_set_name: String,

    /// A reconfiguration lock older than this may be taken over.
    pub lock_ttl: Duration,

    /// Version conflicts tolerated in one reconcile pass.
    pub max_conflict_retries: u32,

    /// Engine mutations applied in one reconcile pass.
    pub max_steps_per_pass: u32,
}

impl Default for ReconfigConfig {
    fn default() -> Self {
        Self {
            replica_set_name: "shoal".into(),
            lock_ttl: Duration::from_secs(600),
            max_conflict_retries: 3,
            max_steps_per_pass: 16,
        }
    }
}

impl ReconfigConfig {
    pub(crate) fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lock_ttl).unwrap_or_else(|_| chrono::Duration::days(1))
    }
}
