//! Unit status assembled from independent conditions.

use std::collections::BTreeMap;

use shoal_types::UnitStatus;

/// Sources of status, one slot each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Condition {
    Role,
    Membership,
    ClientRelations,
    Certificates,
    Backup,
    Retries,
}

/// The most severe condition wins; on a tie the earlier slot does.
#[derive(Debug, Default)]
pub struct StatusBoard {
    conditions: BTreeMap<Condition, UnitStatus>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, condition: Condition, status: UnitStatus) {
        self.conditions.insert(condition, status);
    }

    pub fn clear(&mut self, condition: Condition) {
        self.conditions.remove(&condition);
    }

    pub fn get(&self, condition: Condition) -> Option<&UnitStatus> {
        self.conditions.get(&condition)
    }

    pub fn current(&self) -> UnitStatus {
        let mut best: Option<&UnitStatus> = None;
        for status in self.conditions.values() {
            if best.map_or(true, |b| status.priority() > b.priority()) {
                best = Some(status);
            }
        }
        best.cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_severe_wins() {
        let mut board = StatusBoard::new();
        assert_eq!(board.current(), UnitStatus::Active(String::new()));

        board.set(Condition::Role, UnitStatus::Active("Replica set primary".into()));
        board.set(
            Condition::Membership,
            UnitStatus::Waiting("waiting to reconfigure replica set".into()),
        );
        board.set(
            Condition::ClientRelations,
            UnitStatus::Blocked("cannot have both legacy and new relations".into()),
        );
        assert_eq!(
            board.current(),
            UnitStatus::Blocked("cannot have both legacy and new relations".into())
        );

        board.clear(Condition::ClientRelations);
        assert!(matches!(board.current(), UnitStatus::Waiting(_)));
        board.clear(Condition::Membership);
        assert_eq!(board.current().message(), "Replica set primary");
    }
}
