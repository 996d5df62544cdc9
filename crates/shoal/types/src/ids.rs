//! Strongly-typed identifiers for Shoal entities

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of one cluster member process, e.g. `shoal/0`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Application part of the unit name (`shoal` for `shoal/0`).
    pub fn app(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identity of one external relation instance.
///
/// Relation ids are allocated by the orchestrator and may be reused after a
/// relation is broken; a reused id is still a new relation instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(u32);

impl RelationId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RelationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Backup identifier, a UTC timestamp such as `2023-02-08T15:19:34Z`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackupId(String);

impl BackupId {
    pub const FORMAT: &'static str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        Self(at.format(Self::FORMAT).to_string())
    }

    pub fn now() -> Self {
        Self::from_timestamp(Utc::now())
    }

    pub fn parse(s: &str) -> Result<Self, chrono::ParseError> {
        NaiveDateTime::parse_from_str(s, Self::FORMAT)?;
        Ok(Self(s.to_string()))
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.0, Self::FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// The id one second later; used to avoid collisions.
    pub fn successor(&self) -> Self {
        match self.timestamp() {
            Some(at) => Self::from_timestamp(at + Duration::seconds(1)),
            None => Self::now(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BackupId {
    type Error = chrono::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BackupId> for String {
    fn from(id: BackupId) -> Self {
        id.0
    }
}

/// Token identifying one leadership term over the topology store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseToken(Uuid);

impl LeaseToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_backup_id_format() {
        let at = Utc.with_ymd_and_hms(2023, 2, 8, 15, 19, 34).unwrap();
        let id = BackupId::from_timestamp(at);
        assert_eq!(id.as_str(), "2023-02-08T15:19:34Z");
        assert_eq!(id.timestamp(), Some(at));
        assert_eq!(id.successor().as_str(), "2023-02-08T15:19:35Z");
    }

    #[test]
    fn test_backup_id_rejects_garbage() {
        assert!(BackupId::parse("yesterday").is_err());
        let json = serde_json::to_string("2023-02-08").unwrap();
        assert!(serde_json::from_str::<BackupId>(&json).is_err());
    }

    #[test]
    fn test_unit_app() {
        assert_eq!(UnitId::new("shoal/2").app(), "shoal");
        assert_eq!(UnitId::new("bare").app(), "bare");
    }
}
