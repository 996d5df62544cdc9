//! Certificate coordinator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when the certificates relation goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Drop the material and serve without TLS.
    #[default]
    Unsecured,
    /// Drop the material and block until a new authority is related.
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Renew this long before expiry.
    pub renew_before: Duration,
    pub fallback: FallbackPolicy,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            renew_before: Duration::from_secs(7 * 24 * 60 * 60),
            fallback: FallbackPolicy::Unsecured,
        }
    }
}
