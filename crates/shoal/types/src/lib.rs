//! # Shoal Types
//!
//! Shared model for the Shoal replica-set control plane.
//!
//! Every other Shoal crate speaks in these types: members and replica-set
//! configurations, credentials and their scopes, relation payloads, TLS
//! material, backup records, unit status and the audit event stream.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod backup;
pub mod credential;
pub mod events;
pub mod ids;
pub mod member;
pub mod relation;
pub mod status;
pub mod tls;

pub use backup::{BackupKind, BackupRecord, BackupStatus, RestoreRecord, StorageLocation};
pub use credential::{
    Credential, CredentialScope, InternalRole, RelationUser, ScopeParseError, Secret,
    MAX_SECRET_LENGTH,
};
pub use events::{EventSeverity, EventSource, ShoalEvent, ShoalEventEnvelope};
pub use ids::{BackupId, LeaseToken, RelationId, UnitId};
pub use member::{
    ClusterRole, Member, MemberHealth, MemberRole, ReplicaSetConfig, MAX_VOTING_MEMBERS,
};
pub use relation::{
    CertificateDelivery, ClientRequest, ConnectionInfo, DataBag, LegacyConnectionInfo,
    RelationKind, RelationPayload, S3Credentials, ShardAnnouncement, ShardHandshake,
};
pub use status::{ErrorClass, UnitStatus};
pub use tls::{CertScope, CertificateMaterial, CertificateState};
