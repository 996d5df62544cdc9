//! # Shoal TLS
//!
//! Per-member certificate lifecycle against an external certificate
//! authority.
//!
//! - [`keys`]: Ed25519 private keys in PEM form
//! - [`csr`]: signed certificate requests
//! - [`CertificateAuthority`]: where requests are sent; certificates come
//!   back as deliveries on the certificates relation
//! - [`CertificateCoordinator`]: the `Unset -> Requested -> Issued ->
//!   Renewing` state machine for the internal and external scopes

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod authority;
pub mod config;
pub mod coordinator;
pub mod csr;
pub mod error;
pub mod keys;

pub use authority::{CertificateAuthority, MockCertificateAuthority, Submission};
pub use config::{FallbackPolicy, TlsConfig};
pub use coordinator::CertificateCoordinator;
pub use csr::SigningRequest;
pub use error::{CaError, Result, TlsError};
pub use keys::{fingerprint, generate_private_key, parse_private_key};
