//! PEM decoding and X.509 certificate helpers.

use base64::Engine;
use x509_parser::prelude::*;

use crate::error::CryptoError;

/// Decodes a PEM block with the given label into DER bytes.
///
/// # Errors
///
/// Returns an error if the label is not present or the base64 payload is
/// malformed.
pub fn pem_to_der(pem: &str, label: &str) -> Result<Vec<u8>, CryptoError> {
    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);

    let start = pem
        .find(&begin)
        .ok_or_else(|| CryptoError::InvalidEncoding(format!("missing '{begin}' marker")))?
        + begin.len();
    let end_pos = pem
        .find(&end)
        .ok_or_else(|| CryptoError::InvalidEncoding(format!("missing '{end}' marker")))?;

    let b64_data: String = pem[start..end_pos]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    base64::engine::general_purpose::STANDARD
        .decode(&b64_data)
        .map_err(|e| CryptoError::InvalidEncoding(format!("invalid PEM base64: {e}")))
}

/// Extracts the `SubjectPublicKeyInfo` DER bytes from an X.509 certificate.
///
/// # Errors
///
/// Returns an error if the certificate cannot be parsed.
pub fn public_key_from_cert(cert_der: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| CryptoError::InvalidEncoding(format!("failed to parse certificate: {e}")))?;

    Ok(cert.public_key().raw.to_vec())
}
