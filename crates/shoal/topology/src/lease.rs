//! Leader lease over the topology store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shoal_types::{LeaseToken, UnitId};

/// Proof of being the single writer for application-scoped state.
///
/// Each election yields a new token and a strictly larger epoch; commits
/// carrying an older token are refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderLease {
    pub holder: UnitId,
    pub token: LeaseToken,
    pub epoch: u64,
    pub acquired_at: DateTime<Utc>,
}

impl LeaderLease {
    pub fn new(holder: UnitId, epoch: u64) -> Self {
        Self {
            holder,
            token: LeaseToken::generate(),
            epoch,
            acquired_at: Utc::now(),
        }
    }

    pub fn same_term(&self, other: &LeaderLease) -> bool {
        self.token == other.token && self.epoch == other.epoch
    }
}
