//! Leader-driven replica-set reconfiguration.
//!
//! `request_join` and `request_leave` only change the desired member set
//! (under the cluster-wide reconfiguration lock) and then call
//! [`Reconfigurator::reconcile`], which is the only path that mutates the
//! live engine. Every pass resumes from persisted state, so a deferred
//! pass is simply run again on the next trigger.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use shoal_engine::{DatabaseEngine, EngineError, MemberState, MemberStatus};
use shoal_health::{BoundaryGuard, GuardError};
use shoal_topology::{
    mutate, DesiredMember, LeaderLease, LockedOperation, PendingChange, ReconfigLock,
    TopologyError, TopologyState, TopologyStore, Versioned,
};
use shoal_types::{Member, MemberHealth, MemberRole, ReplicaSetConfig, UnitId};

use crate::config::ReconfigConfig;
use crate::error::{MembershipError, Result};
use crate::plan::{self, Mutation};

/// What happened to a join or leave request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Waiting behind the running operation.
    Queued { position: usize },
    Reconciled(ReconcileOutcome),
}

/// Result of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Live and desired membership agree.
    Converged { version: u64 },
    /// Progress is waiting on the engine (catch-up, elections).
    Pending { reason: String },
}

impl ReconcileOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, ReconcileOutcome::Converged { .. })
    }
}

enum Admission {
    Admitted,
    Present,
    Queued(usize),
}

fn describe(operation: &LockedOperation) -> String {
    match operation {
        LockedOperation::Join { unit } => format!("join {}", unit),
        LockedOperation::Leave { units } => {
            let names: Vec<&str> = units.iter().map(UnitId::as_str).collect();
            format!("leave {}", names.join(","))
        }
        LockedOperation::Repair => "repair".into(),
    }
}

/// Reject while a live lock is held, or queue `change` behind it.
fn lock_or_queue(
    state: &mut TopologyState,
    change: PendingChange,
    wait: bool,
) -> Result<Option<Admission>> {
    let now = Utc::now();
    if let Some(lock) = state.live_lock(now) {
        if !wait {
            return Err(MembershipError::ReconfigurationInProgress {
                holder: lock.holder.clone(),
                operation: describe(&lock.operation),
            });
        }
        state.pending_changes.push_back(change);
        return Ok(Some(Admission::Queued(state.pending_changes.len())));
    }
    if let Some(stale) = state.reconfig_lock.take() {
        warn!(
            holder = %stale.holder,
            operation = %describe(&stale.operation),
            "Taking over expired reconfiguration lock"
        );
    }
    Ok(None)
}

fn admit_join(
    state: &mut TopologyState,
    holder: &UnitId,
    unit: &UnitId,
    address: &str,
    ttl: chrono::Duration,
) {
    let member_id = state.next_member_id();
    state.desired_members.insert(
        unit.clone(),
        DesiredMember {
            member_id,
            unit: unit.clone(),
            address: address.to_string(),
        },
    );
    state.reconfig_lock = Some(ReconfigLock::new(
        holder.clone(),
        LockedOperation::Join { unit: unit.clone() },
        state.recorded_voters(),
        ttl,
    ));
}

/// Forget queued changes for units that are leaving: a queued join must
/// never be admitted after its unit has gone.
fn withdraw_queued(state: &mut TopologyState, leaving: &BTreeSet<UnitId>) {
    state.pending_changes.retain_mut(|change| match change {
        PendingChange::Join { unit, .. } => !leaving.contains(unit),
        PendingChange::Leave { units } => {
            units.retain(|u| !leaving.contains(u));
            !units.is_empty()
        }
    });
}

/// Validates the whole batch against the recorded configuration before
/// anything is taken out of the desired set.
fn admit_leave(
    state: &mut TopologyState,
    holder: &UnitId,
    units: BTreeSet<UnitId>,
    ttl: chrono::Duration,
) -> Result<()> {
    let recorded = state
        .replica_set
        .as_ref()
        .ok_or(MembershipError::NotInitialised)?;
    let baseline = recorded.voter_count();
    plan::plan_removal(recorded, &units, baseline)?;

    for unit in &units {
        state.desired_members.remove(unit);
    }
    state.reconfig_lock = Some(ReconfigLock::new(
        holder.clone(),
        LockedOperation::Leave { units },
        baseline,
        ttl,
    ));
    Ok(())
}

/// Commits made after the lease was checked report lost leadership rather
/// than a plain storage error.
fn leadership(operation: &'static str) -> impl Fn(MembershipError) -> MembershipError {
    move |err| match err {
        MembershipError::Topology(TopologyError::LeaseRevoked { .. }) => {
            MembershipError::LostLeadership(operation)
        }
        other => other,
    }
}

/// Drives the live replica set toward the desired member set.
pub struct Reconfigurator {
    unit: UnitId,
    store: Arc<dyn TopologyStore>,
    engine: Arc<dyn DatabaseEngine>,
    guard: Arc<BoundaryGuard>,
    config: ReconfigConfig,
}

impl Reconfigurator {
    pub fn new(
        unit: UnitId,
        store: Arc<dyn TopologyStore>,
        engine: Arc<dyn DatabaseEngine>,
        guard: Arc<BoundaryGuard>,
        config: ReconfigConfig,
    ) -> Self {
        Self {
            unit,
            store,
            engine,
            guard,
            config,
        }
    }

    pub fn unit(&self) -> &UnitId {
        &self.unit
    }

    async fn ensure_leader(&self, lease: &LeaderLease) -> Result<()> {
        if lease.holder != self.unit {
            return Err(MembershipError::NotLeader);
        }
        match self.store.verify_lease(lease).await {
            Ok(()) => Ok(()),
            Err(TopologyError::LeaseRevoked { .. }) => Err(MembershipError::NotLeader),
            Err(e) => Err(e.into()),
        }
    }

    /// Initiate the replica set with this unit as its only voter.
    ///
    /// Returns `false` when the store already records an initialised set.
    /// A set the engine already holds is adopted as-is.
    #[instrument(skip(self, lease), fields(unit = %self.unit))]
    pub async fn bootstrap(&self, lease: &LeaderLease, address: &str) -> Result<bool> {
        self.ensure_leader(lease).await?;
        if self.store.load().await?.value.db_initialised {
            return Ok(false);
        }

        let engine = self.engine.as_ref();
        let config = match self
            .guard
            .call("replica_set_config", move || engine.replica_set_config())
            .await?
        {
            Some(existing) => {
                info!(version = existing.version, "Adopting existing replica set");
                existing
            }
            None => {
                let mut config = ReplicaSetConfig::new(self.config.replica_set_name.clone());
                config.version = 1;
                config
                    .members
                    .push(Member::new(0, self.unit.clone(), address));
                let initial = &config;
                let initiated = self
                    .guard
                    .call("initiate", move || engine.initiate(initial))
                    .await;
                match initiated {
                    Ok(()) => config,
                    Err(GuardError::Rejected(EngineError::AlreadyInitialised)) => self
                        .guard
                        .call("replica_set_config", move || engine.replica_set_config())
                        .await?
                        .ok_or(MembershipError::NotInitialised)?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        mutate(self.store.as_ref(), lease, |state| {
            state.db_initialised = true;
            for member in &config.members {
                state
                    .desired_members
                    .entry(member.unit.clone())
                    .or_insert_with(|| DesiredMember {
                        member_id: member.id,
                        unit: member.unit.clone(),
                        address: member.address.clone(),
                    });
            }
            state.replica_set = Some(config.clone());
            Ok::<_, MembershipError>(())
        })
        .await
        .map_err(leadership("bootstrap"))?;

        info!(name = %config.name, version = config.version, "Replica set initialised");
        Ok(true)
    }

    /// Add `unit` to the desired set and reconcile.
    ///
    /// Replaying a join for a unit already desired only reconciles. While
    /// another operation holds the lock the request is queued if `wait`,
    /// otherwise rejected with `ReconfigurationInProgress`.
    #[instrument(skip(self, lease), fields(leader = %self.unit))]
    pub async fn request_join(
        &self,
        lease: &LeaderLease,
        unit: &UnitId,
        address: &str,
        wait: bool,
    ) -> Result<RequestOutcome> {
        self.ensure_leader(lease).await?;
        let ttl = self.config.lock_ttl();

        let admission = mutate(self.store.as_ref(), lease, |state| -> Result<Admission> {
            if state.desired_members.contains_key(unit) {
                return Ok(Admission::Present);
            }
            let queued = state.pending_changes.iter().position(
                |c| matches!(c, PendingChange::Join { unit: u, .. } if u == unit),
            );
            if let Some(position) = queued {
                return Ok(Admission::Queued(position + 1));
            }
            let change = PendingChange::Join {
                unit: unit.clone(),
                address: address.to_string(),
            };
            if let Some(queued) = lock_or_queue(state, change, wait)? {
                return Ok(queued);
            }
            admit_join(state, &self.unit, unit, address, ttl);
            Ok(Admission::Admitted)
        })
        .await
        .map_err(leadership("request_join"))?;

        match admission {
            Admission::Queued(position) => {
                info!(%unit, position, "Join queued behind running reconfiguration");
                Ok(RequestOutcome::Queued { position })
            }
            Admission::Admitted | Admission::Present => {
                debug!(%unit, "Join admitted");
                Ok(RequestOutcome::Reconciled(self.reconcile(lease).await?))
            }
        }
    }

    /// Remove a batch of units, one engine step at a time.
    ///
    /// The batch is validated as a whole first; if any step would leave
    /// too few reachable voters nothing is changed and the error names that
    /// step.
    #[instrument(skip(self, lease, units), fields(leader = %self.unit, count = units.len()))]
    pub async fn request_leave(
        &self,
        lease: &LeaderLease,
        units: &BTreeSet<UnitId>,
        wait: bool,
    ) -> Result<RequestOutcome> {
        self.ensure_leader(lease).await?;
        let ttl = self.config.lock_ttl();

        let admission = mutate(self.store.as_ref(), lease, |state| -> Result<Admission> {
            withdraw_queued(state, units);
            let recorded = state.replica_set.as_ref();
            let targets: BTreeSet<UnitId> = units
                .iter()
                .filter(|u| {
                    state.desired_members.contains_key(*u)
                        || recorded.is_some_and(|rs| rs.contains(u))
                })
                .cloned()
                .collect();
            if targets.is_empty() {
                return Ok(Admission::Present);
            }
            let change = PendingChange::Leave {
                units: targets.clone(),
            };
            if let Some(queued) = lock_or_queue(state, change, wait)? {
                return Ok(queued);
            }
            admit_leave(state, &self.unit, targets, ttl)?;
            Ok(Admission::Admitted)
        })
        .await
        .map_err(leadership("request_leave"))?;

        match admission {
            Admission::Queued(position) => {
                info!(position, "Leave queued behind running reconfiguration");
                Ok(RequestOutcome::Queued { position })
            }
            Admission::Admitted | Admission::Present => {
                Ok(RequestOutcome::Reconciled(self.reconcile(lease).await?))
            }
        }
    }

    /// Live configuration with observed role and health folded in.
    async fn observe(&self) -> Result<(ReplicaSetConfig, Vec<MemberStatus>)> {
        let engine = self.engine.as_ref();
        let mut live = self
            .guard
            .call("replica_set_config", move || engine.replica_set_config())
            .await?
            .ok_or(MembershipError::NotInitialised)?;
        let status = self
            .guard
            .call("replica_set_status", move || engine.replica_set_status())
            .await?;

        for member in &mut live.members {
            match status.iter().find(|s| s.member_id == member.id) {
                Some(observed) => {
                    member.health = if observed.healthy {
                        MemberHealth::Healthy
                    } else {
                        MemberHealth::Unreachable
                    };
                    member.role = match observed.state {
                        MemberState::Primary => MemberRole::Primary,
                        MemberState::Arbiter => MemberRole::Arbiter,
                        _ => MemberRole::Secondary,
                    };
                }
                None => member.health = MemberHealth::Unknown,
            }
        }
        Ok((live, status))
    }

    async fn record(&self, lease: &LeaderLease, live: &ReplicaSetConfig) -> Result<()> {
        mutate(self.store.as_ref(), lease, |state| {
            state.replica_set = Some(live.clone());
            Ok::<_, MembershipError>(())
        })
        .await
        .map_err(leadership("reconcile"))
    }

    /// Release the lock and start the next queued change, if any.
    /// Returns true when a new operation was admitted.
    async fn finish_operation(&self, lease: &LeaderLease) -> Result<bool> {
        let ttl = self.config.lock_ttl();
        let (finished, dropped, admitted) = mutate(self.store.as_ref(), lease, |state| {
            let finished = state.reconfig_lock.take();
            let mut dropped = Vec::new();
            while let Some(change) = state.pending_changes.pop_front() {
                match change {
                    PendingChange::Join { unit, address } => {
                        if !state.desired_members.contains_key(&unit) {
                            admit_join(state, &self.unit, &unit, &address, ttl);
                            return Ok((finished, dropped, true));
                        }
                    }
                    PendingChange::Leave { units } => {
                        match admit_leave(state, &self.unit, units, ttl) {
                            Ok(()) => return Ok((finished, dropped, true)),
                            Err(e) => dropped.push(e.to_string()),
                        }
                    }
                }
            }
            Ok::<_, MembershipError>((finished, dropped, false))
        })
        .await
        .map_err(leadership("reconcile"))?;

        if let Some(lock) = finished {
            info!(operation = %describe(&lock.operation), "Reconfiguration finished");
        }
        for reason in dropped {
            warn!(%reason, "Dropped queued membership change");
        }
        Ok(admitted)
    }

    /// Align the live engine with the desired member set.
    ///
    /// Applies at most one single-member change per engine call, each at
    /// exactly the live version plus one, and writes the observed
    /// configuration back to the store after every step.
    #[instrument(skip(self, lease), fields(leader = %self.unit))]
    pub async fn reconcile(&self, lease: &LeaderLease) -> Result<ReconcileOutcome> {
        self.ensure_leader(lease).await?;
        let mut conflicts = 0;

        for _ in 0..self.config.max_steps_per_pass.max(1) {
            let Versioned { value: state, .. } = self.store.load().await?;
            if !state.db_initialised {
                return Err(MembershipError::NotInitialised);
            }

            let (live, status) = self.observe().await?;
            if state.replica_set.as_ref() != Some(&live) {
                self.record(lease, &live).await?;
            }

            if status.iter().any(|s| s.state == MemberState::Removed) {
                return Err(MembershipError::Deferred(
                    "a member removal is still in progress in the engine".into(),
                ));
            }

            let Some(mutation) = plan::next_mutation(&state.desired_members, &live) else {
                let pending = state.reconfig_lock.is_some() || !state.pending_changes.is_empty();
                if pending && self.finish_operation(lease).await? {
                    continue;
                }
                debug!(version = live.version, "Membership converged");
                return Ok(ReconcileOutcome::Converged {
                    version: live.version,
                });
            };

            if state.reconfig_lock.is_none() {
                self.hold_repair_lock(lease, live.voter_count()).await?;
            }

            match &mutation {
                Mutation::Promote(unit) => {
                    let ready = live.member(unit).is_some_and(|m| {
                        status
                            .iter()
                            .any(|s| s.member_id == m.id && s.healthy && s.caught_up)
                    });
                    if !ready {
                        return Ok(ReconcileOutcome::Pending {
                            reason: format!("waiting for {} to catch up", unit),
                        });
                    }
                }
                Mutation::Remove(unit) => {
                    let baseline = state
                        .reconfig_lock
                        .as_ref()
                        .map_or(live.voter_count(), |l| l.baseline_voters);
                    let single = BTreeSet::from([unit.clone()]);
                    plan::plan_removal(&live, &single, baseline)?;

                    let primary = live.member(unit).filter(|m| m.role == MemberRole::Primary);
                    if let Some(member) = primary {
                        self.ensure_leader(lease).await?;
                        self.step_down(member.id).await?;
                        continue;
                    }
                }
                Mutation::Add(_) => {}
            }

            let next = plan::apply(&live, &mutation);
            self.ensure_leader(lease).await?;
            let engine = self.engine.as_ref();
            let proposed = &next;
            match self
                .guard
                .call("reconfigure", move || engine.reconfigure(proposed))
                .await
            {
                Ok(()) => {
                    info!(version = next.version, ?mutation, "Replica set reconfigured");
                }
                Err(GuardError::Rejected(EngineError::VersionConflict { expected, actual })) => {
                    conflicts += 1;
                    warn!(expected, actual, conflicts, "Reconfigure raced, re-reading");
                    if conflicts > self.config.max_conflict_retries {
                        return Err(MembershipError::Deferred(format!(
                            "version conflict persisted after {} retries",
                            conflicts - 1
                        )));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(ReconcileOutcome::Pending {
            reason: "step budget exhausted for this pass".into(),
        })
    }

    /// Drift found with no operation running is repaired under its own lock.
    async fn hold_repair_lock(&self, lease: &LeaderLease, baseline: usize) -> Result<()> {
        let ttl = self.config.lock_ttl();
        let taken = mutate(self.store.as_ref(), lease, |state| {
            if state.reconfig_lock.is_some() {
                return Ok::<_, MembershipError>(false);
            }
            state.reconfig_lock = Some(ReconfigLock::new(
                self.unit.clone(),
                LockedOperation::Repair,
                baseline,
                ttl,
            ));
            Ok(true)
        })
        .await
        .map_err(leadership("repair"))?;
        if taken {
            info!(baseline, "Repairing membership drift");
        }
        Ok(())
    }

    /// Leader side of a unit's departure: request removal of every desired
    /// unit that marked itself departing, and drop the unit data of those
    /// already gone. Returns the units whose removal was requested.
    #[instrument(skip(self, lease), fields(leader = %self.unit))]
    pub async fn remove_departing(&self, lease: &LeaderLease) -> Result<BTreeSet<UnitId>> {
        self.ensure_leader(lease).await?;
        let state = self.store.load().await?.value;
        let queued_leave = |unit: &UnitId| {
            state
                .pending_changes
                .iter()
                .any(|c| matches!(c, PendingChange::Leave { units } if units.contains(unit)))
        };

        let mut leaving = BTreeSet::new();
        for (unit, data) in self.store.list_units().await? {
            if !data.departing {
                continue;
            }
            let recorded = state.replica_set.as_ref().is_some_and(|rs| rs.contains(&unit));
            if state.desired_members.contains_key(&unit) {
                if !queued_leave(&unit) {
                    leaving.insert(unit);
                }
            } else if !recorded {
                self.store.remove_unit(&unit).await?;
                info!(%unit, "Departed unit forgotten");
            }
        }

        if !leaving.is_empty() {
            info!(count = leaving.len(), "Removing departing units");
            self.request_leave(lease, &leaving, true).await?;
        }
        Ok(leaving)
    }

    async fn step_down(&self, member_id: u32) -> Result<()> {
        let engine = self.engine.as_ref();
        match self
            .guard
            .call("step_down", move || engine.step_down(member_id))
            .await
        {
            Ok(()) => {
                info!(member_id, "Primary stepped down");
                Ok(())
            }
            Err(GuardError::Rejected(EngineError::CommandFailed(reason))) => Err(
                MembershipError::Deferred(format!("primary cannot step down: {}", reason)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    /// Run on the departing unit itself, leader or not: mark the unit as
    /// departing and hand off primary so the leader can remove it.
    #[instrument(skip(self), fields(unit = %self.unit))]
    pub async fn prepare_departure(&self) -> Result<()> {
        let mut data = self
            .store
            .load_unit(&self.unit)
            .await?
            .unwrap_or_default();
        if !data.departing {
            data.departing = true;
            self.store.commit_unit(&self.unit, &data).await?;
        }

        let (live, _) = match self.observe().await {
            Ok(observed) => observed,
            Err(MembershipError::NotInitialised)
            | Err(MembershipError::Engine(EngineError::NotInitialised)) => return Ok(()),
            Err(e) => return Err(e),
        };
        if let Some(me) = live
            .member(&self.unit)
            .filter(|m| m.role == MemberRole::Primary)
        {
            self.step_down(me.id).await?;
        }
        Ok(())
    }

    /// Unit currently acting as primary, if the engine reports one.
    pub async fn primary(&self) -> Result<Option<UnitId>> {
        match self.observe().await {
            Ok((live, _)) => Ok(live.primary().map(|m| m.unit.clone())),
            Err(MembershipError::NotInitialised)
            | Err(MembershipError::Engine(EngineError::NotInitialised)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
