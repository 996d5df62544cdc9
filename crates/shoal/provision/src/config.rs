//! Provisioner configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Drop a relation's database when its last relation is broken.
    pub auto_delete: bool,

    /// Client port published in endpoints.
    pub port: u16,

    /// Engine version advertised to legacy clients.
    pub engine_version: String,

    /// Database handed to legacy clients that do not ask for one.
    pub legacy_database: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            auto_delete: false,
            port: 27017,
            engine_version: "6.0".into(),
            legacy_database: "shoal".into(),
        }
    }
}
