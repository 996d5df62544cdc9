//! Topology store trait and the compare-and-swap mutation helper.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::debug;

use shoal_types::UnitId;

use crate::error::{Result, TopologyError};
use crate::lease::LeaderLease;
use crate::state::{TopologyState, UnitData};

/// Commit attempts before a lost race is reported to the caller.
pub const MAX_COMMIT_ATTEMPTS: usize = 5;

/// A value read together with the revision it was read at.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub revision: u64,
    pub value: T,
}

/// Replicated key/value state shared by all members.
///
/// Application-scoped state has a single writer: commits must carry the
/// current [`LeaderLease`] and the revision the caller read. Unit-scoped
/// state is written by the owning unit without a lease.
#[async_trait]
pub trait TopologyStore: Send + Sync {
    async fn load(&self) -> Result<Versioned<TopologyState>>;

    /// Commit `state` if the lease is current and nothing was committed
    /// since `expected_revision`. Returns the new revision.
    async fn commit(
        &self,
        lease: &LeaderLease,
        expected_revision: u64,
        state: &TopologyState,
    ) -> Result<u64>;

    /// Record `unit` as leader, superseding any previous lease.
    async fn acquire_lease(&self, unit: &UnitId) -> Result<LeaderLease>;

    async fn current_lease(&self) -> Result<Option<LeaderLease>>;

    /// Fails with [`TopologyError::LeaseRevoked`] unless `lease` is current.
    async fn verify_lease(&self, lease: &LeaderLease) -> Result<()>;

    async fn load_unit(&self, unit: &UnitId) -> Result<Option<UnitData>>;

    async fn commit_unit(&self, unit: &UnitId, data: &UnitData) -> Result<()>;

    async fn list_units(&self) -> Result<BTreeMap<UnitId, UnitData>>;

    async fn remove_unit(&self, unit: &UnitId) -> Result<()>;
}

/// Load, modify and commit with retry on revision conflicts.
///
/// `f` may run several times and must be free of side effects outside the
/// state it is given. An `Err` from `f` aborts without committing.
pub async fn mutate<S, F, T, E>(
    store: &S,
    lease: &LeaderLease,
    mut f: F,
) -> std::result::Result<T, E>
where
    S: TopologyStore + ?Sized,
    F: FnMut(&mut TopologyState) -> std::result::Result<T, E>,
    E: From<TopologyError>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let Versioned {
            revision,
            mut value,
        } = store.load().await?;
        let out = f(&mut value)?;

        match store.commit(lease, revision, &value).await {
            Ok(_) => return Ok(out),
            Err(TopologyError::RevisionConflict { expected, actual })
                if attempt < MAX_COMMIT_ATTEMPTS =>
            {
                debug!(expected, actual, attempt, "Topology commit raced, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
}
