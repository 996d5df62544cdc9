//! Object-storage credentials as backup agent options.

use std::collections::BTreeMap;

use shoal_types::{S3Credentials, StorageLocation};

/// Agent option keys for `credentials`. Absent optional fields are left
/// out rather than written empty.
pub fn agent_options(credentials: &S3Credentials) -> BTreeMap<String, String> {
    let mut options = BTreeMap::new();
    options.insert("storage.type".to_string(), "s3".to_string());
    options.insert("storage.s3.bucket".to_string(), credentials.bucket.clone());
    options.insert(
        "storage.s3.credentials.access-key-id".to_string(),
        credentials.access_key.clone(),
    );
    options.insert(
        "storage.s3.credentials.secret-access-key".to_string(),
        credentials.secret_key.expose().to_string(),
    );

    let optional = [
        ("storage.s3.region", &credentials.region),
        ("storage.s3.prefix", &credentials.path),
        ("storage.s3.endpointUrl", &credentials.endpoint),
    ];
    for (key, value) in optional {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            options.insert(key.to_string(), value.to_string());
        }
    }
    options
}

pub fn location(credentials: &S3Credentials) -> StorageLocation {
    StorageLocation {
        bucket: credentials.bucket.clone(),
        prefix: credentials.path.clone().unwrap_or_default(),
    }
}
