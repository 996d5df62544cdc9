//! Database name rules for relation requests.

use crate::error::{ProvisionError, Result};

pub const MAX_DATABASE_NAME_BYTES: usize = 64;

const RESERVED: [&str; 3] = ["admin", "local", "config"];
const FORBIDDEN_CHARS: [char; 6] = ['/', '\\', '.', ' ', '"', '$'];

pub fn validate_database_name(name: &str) -> Result<()> {
    let invalid = |reason| ProvisionError::InvalidDatabaseName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("empty"));
    }
    if name.len() > MAX_DATABASE_NAME_BYTES {
        return Err(invalid("longer than 64 bytes"));
    }
    if RESERVED.contains(&name) {
        return Err(invalid("reserved"));
    }
    if name.contains(FORBIDDEN_CHARS) {
        return Err(invalid("contains a forbidden character"));
    }
    Ok(())
}
