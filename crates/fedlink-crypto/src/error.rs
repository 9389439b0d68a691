//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors raised by signing, verification and encryption primitives.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The supplied key material could not be parsed.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Signature verification failed.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// PEM or certificate decoding failed.
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),
}
