//! Cryptographic primitives for fedlink, built on aws-lc-rs.
//!
//! SAML 2.0 interoperability requires RSA PKCS#1 v1.5 signatures over
//! SHA-256/384/512 digests, RSA-OAEP key transport and AES-GCM content
//! encryption for `EncryptedAssertion`, and SHA-2 digest computation for
//! XML-DSig references. This crate wraps aws-lc-rs behind small, explicit
//! functions so the protocol layer never touches raw key handling.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod error;
pub mod hash;
pub mod pem;
pub mod rsa;

pub use envelope::{open, seal, SealedEnvelope};
pub use error::CryptoError;
pub use hash::{sha256, sha384, sha512};
pub use pem::{pem_to_der, public_key_from_cert};
pub use rsa::{rsa_sign, rsa_verify, RsaAlgorithm};
