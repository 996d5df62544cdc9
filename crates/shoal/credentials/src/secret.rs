//! Random secret generation and validation.

use rand::distributions::Alphanumeric;
use rand::Rng;

use shoal_types::{Secret, MAX_SECRET_LENGTH};

use crate::error::{CredentialError, Result};

pub const PASSWORD_LENGTH: usize = 32;
pub const KEYFILE_LENGTH: usize = 1024;

fn alphanumeric(len: usize) -> Secret {
    let value: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    Secret::new(value)
}

pub fn generate_password() -> Secret {
    alphanumeric(PASSWORD_LENGTH)
}

/// Shared key used for intra-cluster authentication.
pub fn generate_keyfile() -> Secret {
    alphanumeric(KEYFILE_LENGTH)
}

/// Explicit secrets must be non-empty and at most 4096 bytes.
pub fn validate(secret: &Secret) -> Result<()> {
    if secret.is_empty() {
        return Err(CredentialError::InvalidSecret("empty".into()));
    }
    if secret.len() > MAX_SECRET_LENGTH {
        return Err(CredentialError::InvalidSecret(format!(
            "longer than {} characters",
            MAX_SECRET_LENGTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_lengths_and_alphabet() {
        let password = generate_password();
        assert_eq!(password.len(), PASSWORD_LENGTH);
        assert!(password.expose().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(generate_keyfile().len(), KEYFILE_LENGTH);
        assert_ne!(generate_password(), generate_password());
    }

    #[test]
    fn test_validate_bounds() {
        assert!(validate(&Secret::new("")).is_err());
        assert!(validate(&Secret::new("x".repeat(MAX_SECRET_LENGTH))).is_ok());
        assert!(matches!(
            validate(&Secret::new("x".repeat(MAX_SECRET_LENGTH + 1))),
            Err(CredentialError::InvalidSecret(_))
        ));
    }
}
