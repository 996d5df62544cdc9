//! Certificate signing requests.
//!
//! A request carries the subject, SANs, the public key and its BLAKE3
//! fingerprint, and a nonce so renewals with the same key still produce a
//! distinct request. The payload is signed with the private key as proof of
//! possession and PEM-armoured as `CERTIFICATE REQUEST`.
//!
//! The armoured body is the JSON encoding of [`SigningRequest`], not a
//! PKCS#10 structure. It is the format [`MockCertificateAuthority`] signs;
//! an X.509 authority needs a DER request built from the same fields.
//!
//! [`MockCertificateAuthority`]: crate::MockCertificateAuthority

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TlsError};
use crate::keys::{armour, dearmour, fingerprint};

const LABEL: &str = "CERTIFICATE REQUEST";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    pub subject: String,
    pub sans: Vec<String>,
    pub public_key: String,
    pub fingerprint: String,
    pub nonce: String,
    #[serde(default)]
    pub signature: String,
}

impl SigningRequest {
    fn signed_bytes(&self) -> Result<Vec<u8>> {
        let unsigned = SigningRequest {
            signature: String::new(),
            ..self.clone()
        };
        serde_json::to_vec(&unsigned).map_err(|e| TlsError::InvalidCsr(e.to_string()))
    }

    /// Check the signature against the embedded public key.
    pub fn verify(&self) -> Result<()> {
        let bad = |reason: &str| TlsError::InvalidCsr(reason.to_string());
        let key_bytes: [u8; 32] = STANDARD
            .decode(&self.public_key)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| bad("public key"))?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| bad("public key"))?;
        let sig_bytes: [u8; 64] = STANDARD
            .decode(&self.signature)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| bad("signature"))?;
        key.verify(&self.signed_bytes()?, &Signature::from_bytes(&sig_bytes))
            .map_err(|_| bad("signature mismatch"))
    }
}

/// Build and sign a request for `key`.
pub fn build(key: &SigningKey, subject: &str, sans: &[String]) -> Result<String> {
    let mut request = SigningRequest {
        subject: subject.to_string(),
        sans: sans.to_vec(),
        public_key: STANDARD.encode(key.verifying_key().as_bytes()),
        fingerprint: fingerprint(key),
        nonce: Uuid::new_v4().to_string(),
        signature: String::new(),
    };
    let signature = key.sign(&request.signed_bytes()?);
    request.signature = STANDARD.encode(signature.to_bytes());

    let json = serde_json::to_vec(&request).map_err(|e| TlsError::InvalidCsr(e.to_string()))?;
    Ok(armour(LABEL, &json))
}

pub fn parse(pem: &str) -> Result<SigningRequest> {
    let json = dearmour(LABEL, pem)
        .ok_or_else(|| TlsError::InvalidCsr("not a PEM certificate request".into()))?;
    serde_json::from_slice(&json).map_err(|e| TlsError::InvalidCsr(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_signed_and_unique() {
        let key = SigningKey::from_bytes(&[42u8; 32]);
        let sans = vec!["shoal-0".to_string(), "10.0.0.1".to_string()];
        let first = build(&key, "shoal-0", &sans).unwrap();
        let second = build(&key, "shoal-0", &sans).unwrap();
        assert_ne!(first, second);

        let request = parse(&first).unwrap();
        assert_eq!(request.subject, "shoal-0");
        assert_eq!(request.sans, sans);
        assert_eq!(request.fingerprint, fingerprint(&key));
        request.verify().unwrap();
    }

    #[test]
    fn test_tampered_request_fails_verification() {
        let key = SigningKey::from_bytes(&[42u8; 32]);
        let mut request = parse(&build(&key, "shoal-0", &[]).unwrap()).unwrap();
        request.subject = "someone-else".into();
        assert!(request.verify().is_err());
    }

    #[test]
    fn test_armoured_body_is_json_request() {
        let key = SigningKey::from_bytes(&[42u8; 32]);
        let pem = build(&key, "shoal-0", &[]).unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE REQUEST-----\n"));

        let body = dearmour(LABEL, &pem).unwrap();
        let decoded: SigningRequest = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded, parse(&pem).unwrap());

        // A DER body under the same armour is not understood.
        let der = armour(LABEL, &[0x30, 0x82, 0x01, 0x0a, 0x02, 0x01, 0x00]);
        assert!(matches!(parse(&der), Err(TlsError::InvalidCsr(_))));
    }
}
