//! Pure planning: removal safety and the next single-member mutation.

use std::collections::{BTreeMap, BTreeSet};

use shoal_topology::DesiredMember;
use shoal_types::{Member, MemberRole, ReplicaSetConfig, UnitId, MAX_VOTING_MEMBERS};

use crate::error::MembershipError;

/// Reachable voters that must survive when `baseline` voters were present
/// before a batch began: strictly more than half.
pub fn required_voters(baseline: usize) -> usize {
    baseline / 2 + 1
}

/// One validated removal inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalStep {
    pub step: usize,
    pub member: UnitId,
    /// Reachable voters left after this step.
    pub remaining_voters: usize,
}

/// Order in which a batch is applied: non-voters, then unreachable voters,
/// then secondaries, the primary last.
fn removal_rank(member: &Member) -> u8 {
    if !member.voting {
        0
    } else if !member.health.is_reachable() {
        1
    } else if member.role != MemberRole::Primary {
        2
    } else {
        3
    }
}

/// Validate a whole removal batch up front.
///
/// Every step is checked against the voter count from before the batch, so
/// the batch either passes as a whole or fails naming the first step that
/// would break the majority. Units not in `config` are ignored.
pub fn plan_removal(
    config: &ReplicaSetConfig,
    units: &BTreeSet<UnitId>,
    baseline_voters: usize,
) -> Result<Vec<RemovalStep>, MembershipError> {
    let required = required_voters(baseline_voters);
    let mut batch: Vec<&Member> = config
        .members
        .iter()
        .filter(|m| units.contains(&m.unit))
        .collect();
    batch.sort_by_key(|m| (removal_rank(m), m.id));

    let mut remaining = config.reachable_voter_count();
    let mut steps = Vec::with_capacity(batch.len());

    for (index, member) in batch.into_iter().enumerate() {
        if member.is_reachable_voter() {
            remaining = remaining.saturating_sub(1);
        }
        if member.voting && remaining < required {
            return Err(MembershipError::MajorityViolation {
                step: index + 1,
                member: member.unit.clone(),
                remaining,
                required,
                baseline: baseline_voters,
            });
        }
        steps.push(RemovalStep {
            step: index + 1,
            member: member.unit.clone(),
            remaining_voters: remaining,
        });
    }

    Ok(steps)
}

/// A single-member change to the live configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Add as a non-voting member; promoted once caught up.
    Add(Member),
    Promote(UnitId),
    Remove(UnitId),
}

/// The next step moving `live` toward `desired`, if any.
///
/// Growth comes before shrinkage so a replacement never dips below the
/// current voter count.
pub fn next_mutation(
    desired: &BTreeMap<UnitId, DesiredMember>,
    live: &ReplicaSetConfig,
) -> Option<Mutation> {
    if let Some(new) = desired.values().find(|d| !live.contains(&d.unit)) {
        let member = Member::new(new.member_id, new.unit.clone(), new.address.clone());
        return Some(Mutation::Add(member.non_voting()));
    }

    if live.voter_count() < MAX_VOTING_MEMBERS {
        if let Some(member) = live
            .members
            .iter()
            .find(|m| !m.voting && desired.contains_key(&m.unit))
        {
            return Some(Mutation::Promote(member.unit.clone()));
        }
    }

    live.members
        .iter()
        .filter(|m| !desired.contains_key(&m.unit))
        .min_by_key(|m| (removal_rank(m), m.id))
        .map(|m| Mutation::Remove(m.unit.clone()))
}

/// `live` with `mutation` applied and the version bumped once.
pub fn apply(live: &ReplicaSetConfig, mutation: &Mutation) -> ReplicaSetConfig {
    let mut next = live.clone();
    match mutation {
        Mutation::Add(member) => next.members.push(member.clone()),
        Mutation::Promote(unit) => {
            if let Some(member) = next.member_mut(unit) {
                member.voting = true;
            }
        }
        Mutation::Remove(unit) => next.members.retain(|m| &m.unit != unit),
    }
    next.version = live.version + 1;
    next
}
