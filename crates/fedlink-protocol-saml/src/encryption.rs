//! Assertion encryption.
//!
//! Assertions travel inside `<saml:EncryptedAssertion>` as an XML-Enc
//! `EncryptedData` element. The content is AES-256-GCM encrypted under a
//! fresh key, which is wrapped for the recipient with RSA-OAEP and carried
//! in an `EncryptedKey` inside `KeyInfo`. The GCM nonce is prepended to the
//! ciphertext in the outer `CipherValue`.

use base64::Engine;

use crate::error::{SamlError, SamlResult};
use crate::types::encryption_algorithms;

const GCM_NONCE_LEN: usize = 12;

/// Encrypts an assertion for the holder of the given public key.
///
/// Returns the `EncryptedData` XML to place inside
/// `<saml:EncryptedAssertion>`.
///
/// # Arguments
///
/// * `assertion_xml` - Serialized assertion element
/// * `recipient_spki_der` - Recipient RSA public key (`SubjectPublicKeyInfo` DER)
///
/// # Errors
///
/// Returns an error if key wrapping or content encryption fails.
pub fn encrypt_assertion(assertion_xml: &str, recipient_spki_der: &[u8]) -> SamlResult<String> {
    let envelope = fedlink_crypto::seal(assertion_xml.as_bytes(), recipient_spki_der)
        .map_err(|e| SamlError::Encryption(e.to_string()))?;

    let wrapped_key_b64 =
        base64::engine::general_purpose::STANDARD.encode(&envelope.encrypted_key);

    let mut payload = envelope.nonce;
    payload.extend_from_slice(&envelope.ciphertext);
    let payload_b64 = base64::engine::general_purpose::STANDARD.encode(&payload);

    Ok(format!(
        "<xenc:EncryptedData xmlns:xenc=\"http://www.w3.org/2001/04/xmlenc#\" Type=\"http://www.w3.org/2001/04/xmlenc#Element\"><xenc:EncryptionMethod Algorithm=\"{}\"/><ds:KeyInfo xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\"><xenc:EncryptedKey><xenc:EncryptionMethod Algorithm=\"{}\"/><xenc:CipherData><xenc:CipherValue>{}</xenc:CipherValue></xenc:CipherData></xenc:EncryptedKey></ds:KeyInfo><xenc:CipherData><xenc:CipherValue>{}</xenc:CipherValue></xenc:CipherData></xenc:EncryptedData>",
        encryption_algorithms::AES256_GCM,
        encryption_algorithms::RSA_OAEP,
        wrapped_key_b64,
        payload_b64
    ))
}

/// Decrypts an `EncryptedData` element back to assertion XML.
///
/// # Arguments
///
/// * `encrypted_xml` - The `EncryptedData` element, as carried inside
///   `EncryptedAssertion`
/// * `private_key_der` - Recipient RSA private key (PKCS#8 DER)
///
/// # Errors
///
/// Returns an error if the structure is malformed, key unwrapping fails or
/// the ciphertext does not authenticate.
pub fn decrypt_assertion(encrypted_xml: &str, private_key_der: &[u8]) -> SamlResult<String> {
    let key_block = extract_block(encrypted_xml, "<xenc:EncryptedKey", "</xenc:EncryptedKey>")
        .ok_or_else(|| SamlError::Encryption("no EncryptedKey element".to_string()))?;

    let wrapped_key_b64 = extract_cipher_value(key_block)
        .ok_or_else(|| SamlError::Encryption("EncryptedKey carries no CipherValue".to_string()))?;

    // The payload CipherValue is the one outside the EncryptedKey block.
    let key_block_end = encrypted_xml
        .find("</xenc:EncryptedKey>")
        .map(|pos| pos + "</xenc:EncryptedKey>".len())
        .unwrap_or(0);
    let payload_b64 = extract_cipher_value(&encrypted_xml[key_block_end..])
        .ok_or_else(|| SamlError::Encryption("no payload CipherValue".to_string()))?;

    let encrypted_key = base64::engine::general_purpose::STANDARD
        .decode(strip_whitespace(wrapped_key_b64))
        .map_err(|e| SamlError::Encryption(format!("wrapped key encoding: {e}")))?;
    let payload = base64::engine::general_purpose::STANDARD
        .decode(strip_whitespace(payload_b64))
        .map_err(|e| SamlError::Encryption(format!("payload encoding: {e}")))?;

    if payload.len() <= GCM_NONCE_LEN {
        return Err(SamlError::Encryption("payload too short".to_string()));
    }
    let (nonce, ciphertext) = payload.split_at(GCM_NONCE_LEN);

    let envelope = fedlink_crypto::SealedEnvelope {
        encrypted_key,
        nonce: nonce.to_vec(),
        ciphertext: ciphertext.to_vec(),
    };

    let plaintext = fedlink_crypto::open(&envelope, private_key_der)
        .map_err(|e| SamlError::Encryption(e.to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|e| SamlError::Encryption(format!("decrypted assertion is not UTF-8: {e}")))
}

fn extract_block<'a>(xml: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = xml.find(open)?;
    let end = xml[start..].find(close)? + close.len();
    Some(&xml[start..start + end])
}

fn extract_cipher_value(xml: &str) -> Option<&str> {
    let block = extract_block(xml, "<xenc:CipherValue>", "</xenc:CipherValue>")?;
    Some(&block["<xenc:CipherValue>".len()..block.len() - "</xenc:CipherValue>".len()])
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}
