//! RSA PKCS#1 v1.5 signing and verification.
//!
//! SAML 2.0 deployments overwhelmingly use rsa-sha256 XML-DSig signatures,
//! so PKCS#1 v1.5 is supported here for protocol compatibility alongside the
//! stronger SHA-384/512 variants.

use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::{self, RsaKeyPair, UnparsedPublicKey};

use crate::error::CryptoError;

/// RSA signature algorithms supported for SAML messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RsaAlgorithm {
    /// RSA PKCS#1 v1.5 with SHA-256.
    #[default]
    Sha256,
    /// RSA PKCS#1 v1.5 with SHA-384.
    Sha384,
    /// RSA PKCS#1 v1.5 with SHA-512.
    Sha512,
}

/// Signs data with an RSA private key.
///
/// # Arguments
///
/// * `key_der` - RSA private key in DER form (PKCS#1 or PKCS#8)
/// * `data` - Data to sign
/// * `algorithm` - Signature algorithm
///
/// # Errors
///
/// Returns an error if the key cannot be parsed or signing fails.
pub fn rsa_sign(key_der: &[u8], data: &[u8], algorithm: RsaAlgorithm) -> Result<Vec<u8>, CryptoError> {
    let key_pair = RsaKeyPair::from_der(key_der)
        .or_else(|_| RsaKeyPair::from_pkcs8(key_der))
        .map_err(|e| CryptoError::InvalidKey(format!("invalid RSA key: {e}")))?;

    let rng = SystemRandom::new();
    let mut sig = vec![0u8; key_pair.public_modulus_len()];

    let padding = match algorithm {
        RsaAlgorithm::Sha256 => &signature::RSA_PKCS1_SHA256,
        RsaAlgorithm::Sha384 => &signature::RSA_PKCS1_SHA384,
        RsaAlgorithm::Sha512 => &signature::RSA_PKCS1_SHA512,
    };

    key_pair
        .sign(padding, &rng, data, &mut sig)
        .map_err(|e| CryptoError::Signing(format!("RSA signing failed: {e}")))?;

    Ok(sig)
}

/// Verifies an RSA signature.
///
/// # Arguments
///
/// * `public_key_der` - RSA public key in DER form (`SubjectPublicKeyInfo`)
/// * `data` - Original data that was signed
/// * `sig` - Signature to verify
/// * `algorithm` - Signature algorithm
///
/// # Errors
///
/// Returns an error if the key is malformed; a well-formed key with a
/// non-matching signature returns `Ok(false)`.
pub fn rsa_verify(
    public_key_der: &[u8],
    data: &[u8],
    sig: &[u8],
    algorithm: RsaAlgorithm,
) -> Result<bool, CryptoError> {
    let params = match algorithm {
        RsaAlgorithm::Sha256 => &signature::RSA_PKCS1_2048_8192_SHA256,
        RsaAlgorithm::Sha384 => &signature::RSA_PKCS1_2048_8192_SHA384,
        RsaAlgorithm::Sha512 => &signature::RSA_PKCS1_2048_8192_SHA512,
    };

    let public_key = UnparsedPublicKey::new(params, public_key_der);
    Ok(public_key.verify(data, sig).is_ok())
}
