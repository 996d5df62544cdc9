//! Relation kinds and their fixed payload schemas.
//!
//! Every interface the control plane speaks is one variant of
//! [`RelationPayload`]; dispatch is a pattern match on the variant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::credential::Secret;

/// Flat string map published on a relation.
pub type DataBag = BTreeMap<String, String>;

/// Interfaces known to the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationKind {
    MongodbClient,
    LegacyClient,
    Shards,
    ConfigServer,
    S3,
    TlsCertificates,
    CosAgent,
    Peer,
}

impl RelationKind {
    /// Resolve an interface name published by the orchestrator.
    pub fn from_interface(interface: &str) -> Option<Self> {
        match interface {
            "mongodb_client" => Some(RelationKind::MongodbClient),
            "mongodb" | "obsolete" => Some(RelationKind::LegacyClient),
            "shards" => Some(RelationKind::Shards),
            "config-server" => Some(RelationKind::ConfigServer),
            "s3" => Some(RelationKind::S3),
            "tls-certificates" => Some(RelationKind::TlsCertificates),
            "cos_agent" => Some(RelationKind::CosAgent),
            "database-peers" => Some(RelationKind::Peer),
            _ => None,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationKind::MongodbClient => "mongodb_client",
            RelationKind::LegacyClient => "mongodb",
            RelationKind::Shards => "shards",
            RelationKind::ConfigServer => "config-server",
            RelationKind::S3 => "s3",
            RelationKind::TlsCertificates => "tls-certificates",
            RelationKind::CosAgent => "cos_agent",
            RelationKind::Peer => "database-peers",
        };
        f.write_str(name)
    }
}

/// What a client application asks for on an authenticated relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ClientRequest {
    pub database: Option<String>,
    #[serde(default)]
    pub extra_user_roles: Vec<String>,
}

impl ClientRequest {
    pub fn for_database(database: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
            extra_user_roles: Vec::new(),
        }
    }

    /// Parse the comma-separated `extra-user-roles` field.
    pub fn parse_roles(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(|r| r.trim().to_lowercase())
            .filter(|r| !r.is_empty())
            .collect()
    }
}

/// Published by a shard once it knows its name and hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAnnouncement {
    pub shard_name: String,
    pub hosts: Vec<String>,
}

/// Published by the config-server so a shard can join its cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardHandshake {
    pub operator_password: Secret,
    pub keyfile: Secret,
}

/// Object-storage credentials from the `s3` relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Credentials {
    pub access_key: String,
    pub secret_key: Secret,
    pub bucket: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub tls_ca_chain: Vec<String>,
}

/// A certificate returned by the CA for an outstanding request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateDelivery {
    pub csr: String,
    pub certificate: String,
    pub ca: String,
    #[serde(default)]
    pub chain: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Payload of a relation event, one variant per interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "kebab-case")]
pub enum RelationPayload {
    MongodbClient(ClientRequest),
    LegacyClient { database: Option<String> },
    /// Seen by a config-server: a shard on the `shards` relation.
    Shard(Option<ShardAnnouncement>),
    /// Seen by a shard: the config-server on the `config-server` relation.
    ConfigServer(Option<ShardHandshake>),
    S3(Option<S3Credentials>),
    TlsCertificates(Option<CertificateDelivery>),
    CosAgent,
}

impl RelationPayload {
    pub fn kind(&self) -> RelationKind {
        match self {
            RelationPayload::MongodbClient(_) => RelationKind::MongodbClient,
            RelationPayload::LegacyClient { .. } => RelationKind::LegacyClient,
            RelationPayload::Shard(_) => RelationKind::Shards,
            RelationPayload::ConfigServer(_) => RelationKind::ConfigServer,
            RelationPayload::S3(_) => RelationKind::S3,
            RelationPayload::TlsCertificates(_) => RelationKind::TlsCertificates,
            RelationPayload::CosAgent => RelationKind::CosAgent,
        }
    }
}

/// Connection details published on an authenticated client relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub username: String,
    pub password: Secret,
    pub database: String,
    pub endpoints: Vec<String>,
    pub replset: String,
    pub uris: String,
}

impl ConnectionInfo {
    pub fn to_databag(&self) -> DataBag {
        let mut bag = DataBag::new();
        bag.insert("username".into(), self.username.clone());
        bag.insert("password".into(), self.password.expose().to_string());
        bag.insert("database".into(), self.database.clone());
        bag.insert("endpoints".into(), self.endpoints.join(","));
        bag.insert("replset".into(), self.replset.clone());
        bag.insert("uris".into(), self.uris.clone());
        bag
    }
}

/// Connection details published on a legacy relation. No credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyConnectionInfo {
    pub hostname: String,
    pub port: u16,
    pub database: String,
    pub endpoints: Vec<String>,
    pub replset: String,
    pub version: String,
}

impl LegacyConnectionInfo {
    pub fn to_databag(&self) -> DataBag {
        let mut bag = DataBag::new();
        bag.insert("hostname".into(), self.hostname.clone());
        bag.insert("port".into(), self.port.to_string());
        bag.insert("type".into(), "database".into());
        bag.insert("database".into(), self.database.clone());
        bag.insert("endpoints".into(), self.endpoints.join(","));
        bag.insert("replset".into(), self.replset.clone());
        bag.insert("version".into(), self.version.clone());
        bag
    }
}
