//! Lifecycle events delivered to a unit, and what handling them produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use shoal_types::{DataBag, ErrorClass, RelationId, RelationPayload, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationChange {
    Joined,
    Changed,
    Broken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationEvent {
    pub relation_id: RelationId,
    pub change: RelationChange,
    pub payload: RelationPayload,
}

/// Operator actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ActionRequest {
    GetPrimary,
    GetPassword {
        #[serde(default)]
        username: Option<String>,
    },
    SetPassword {
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    CreateBackup,
    ListBackups,
    Restore {
        backup_id: String,
        #[serde(default)]
        remap_pattern: Option<String>,
    },
    SetTlsPrivateKey {
        #[serde(default)]
        external_key: Option<String>,
        #[serde(default)]
        internal_key: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    LeaderElected,
    Start,
    PeerJoined { unit: UnitId, address: String },
    PeerDeparted { unit: UnitId },
    StorageDetaching,
    Relation(RelationEvent),
    UpdateStatus,
    Action(ActionRequest),
}

impl LifecycleEvent {
    /// Short name used in logs and audit events.
    pub fn name(&self) -> String {
        match self {
            LifecycleEvent::LeaderElected => "leader-elected".into(),
            LifecycleEvent::Start => "start".into(),
            LifecycleEvent::PeerJoined { unit, .. } => format!("peer-joined({})", unit),
            LifecycleEvent::PeerDeparted { unit } => format!("peer-departed({})", unit),
            LifecycleEvent::StorageDetaching => "storage-detaching".into(),
            LifecycleEvent::Relation(ev) => format!(
                "{}-relation-{:?}({})",
                ev.payload.kind(),
                ev.change,
                ev.relation_id
            )
            .to_lowercase(),
            LifecycleEvent::UpdateStatus => "update-status".into(),
            LifecycleEvent::Action(_) => "action".into(),
        }
    }
}

/// Data to publish on a relation as a result of handling an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub relation_id: RelationId,
    pub data: DataBag,
}

/// Key/value results of a successful action.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionResponse(BTreeMap<String, String>);

impl ActionResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub class: ErrorClass,
    pub message: String,
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.class, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum EventOutcome {
    Handled {
        publications: Vec<Publication>,
    },
    /// Queued for replay on a later trigger.
    Deferred {
        reason: String,
        attempt: u32,
        retry_at: DateTime<Utc>,
    },
    Failed {
        class: ErrorClass,
        message: String,
    },
    Action(Result<ActionResponse, ActionFailure>),
}

impl EventOutcome {
    pub fn handled() -> Self {
        EventOutcome::Handled {
            publications: Vec::new(),
        }
    }

    pub fn is_handled(&self) -> bool {
        matches!(self, EventOutcome::Handled { .. })
    }

    pub fn publications(&self) -> &[Publication] {
        match self {
            EventOutcome::Handled { publications } => publications,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_types::ClientRequest;

    #[test]
    fn test_event_json() {
        let event: LifecycleEvent = serde_json::from_str(
            r#"{"event":"peer-joined","unit":"shoal/1","address":"10.0.0.2:27017"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            LifecycleEvent::PeerJoined {
                unit: UnitId::new("shoal/1"),
                address: "10.0.0.2:27017".into()
            }
        );

        let action: LifecycleEvent =
            serde_json::from_str(r#"{"event":"action","action":"get-password"}"#).unwrap();
        assert_eq!(
            action,
            LifecycleEvent::Action(ActionRequest::GetPassword { username: None })
        );
    }

    #[test]
    fn test_event_names() {
        let event = LifecycleEvent::Relation(RelationEvent {
            relation_id: RelationId::new(4),
            change: RelationChange::Broken,
            payload: RelationPayload::MongodbClient(ClientRequest::default()),
        });
        assert_eq!(event.name(), "mongodb_client-relation-broken(4)");
    }
}
