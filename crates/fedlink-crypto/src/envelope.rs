//! Hybrid encryption for assertion payloads.
//!
//! XML encryption of assertions uses a freshly generated AES-256-GCM content
//! key, which is then wrapped for the recipient with RSA-OAEP. The envelope
//! here carries exactly the pieces the XML layer serializes into
//! `EncryptedData`/`EncryptedKey`.

use aws_lc_rs::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use aws_lc_rs::rand::{SecureRandom, SystemRandom};
use aws_lc_rs::rsa::{
    OaepPrivateDecryptingKey, OaepPublicEncryptingKey, PrivateDecryptingKey, PublicEncryptingKey,
    OAEP_SHA256_MGF1SHA256,
};

use crate::error::CryptoError;

const CONTENT_KEY_LEN: usize = 32;

/// An encrypted payload together with its wrapped content key.
#[derive(Debug, Clone)]
pub struct SealedEnvelope {
    /// Content key wrapped with the recipient's RSA public key (OAEP).
    pub encrypted_key: Vec<u8>,
    /// AES-GCM nonce.
    pub nonce: Vec<u8>,
    /// AES-GCM ciphertext with the authentication tag appended.
    pub ciphertext: Vec<u8>,
}

/// Encrypts a payload for the holder of the given RSA public key.
///
/// # Arguments
///
/// * `plaintext` - Payload to encrypt
/// * `recipient_spki_der` - Recipient RSA public key (`SubjectPublicKeyInfo` DER)
///
/// # Errors
///
/// Returns an error if key generation, key wrapping or content encryption
/// fails.
pub fn seal(plaintext: &[u8], recipient_spki_der: &[u8]) -> Result<SealedEnvelope, CryptoError> {
    let rng = SystemRandom::new();

    let mut content_key = [0u8; CONTENT_KEY_LEN];
    rng.fill(&mut content_key)
        .map_err(|_| CryptoError::Encryption("content key generation failed".to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| CryptoError::Encryption("nonce generation failed".to_string()))?;

    let unbound = UnboundKey::new(&AES_256_GCM, &content_key)
        .map_err(|_| CryptoError::Encryption("invalid content key length".to_string()))?;
    let aead_key = LessSafeKey::new(unbound);

    let mut ciphertext = plaintext.to_vec();
    aead_key
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut ciphertext,
        )
        .map_err(|_| CryptoError::Encryption("AES-GCM encryption failed".to_string()))?;

    let public_key = PublicEncryptingKey::from_der(recipient_spki_der)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid recipient public key: {e}")))?;
    let oaep_key = OaepPublicEncryptingKey::new(public_key)
        .map_err(|e| CryptoError::InvalidKey(format!("key not usable for OAEP: {e}")))?;

    let mut encrypted_key = vec![0u8; oaep_key.ciphertext_size()];
    let wrapped_len = oaep_key
        .encrypt(&OAEP_SHA256_MGF1SHA256, &content_key, &mut encrypted_key, None)
        .map_err(|_| CryptoError::Encryption("RSA-OAEP key wrap failed".to_string()))?
        .len();
    encrypted_key.truncate(wrapped_len);

    Ok(SealedEnvelope {
        encrypted_key,
        nonce: nonce_bytes.to_vec(),
        ciphertext,
    })
}

/// Decrypts an envelope with the recipient's RSA private key.
///
/// # Arguments
///
/// * `envelope` - Sealed envelope produced by [`seal`]
/// * `private_key_der` - Recipient RSA private key (PKCS#8 DER)
///
/// # Errors
///
/// Returns an error if key unwrapping fails or the ciphertext does not
/// authenticate.
pub fn open(envelope: &SealedEnvelope, private_key_der: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let private_key = PrivateDecryptingKey::from_pkcs8(private_key_der)
        .map_err(|e| CryptoError::InvalidKey(format!("invalid private key: {e}")))?;
    let oaep_key = OaepPrivateDecryptingKey::new(private_key)
        .map_err(|e| CryptoError::InvalidKey(format!("key not usable for OAEP: {e}")))?;

    let mut content_key = vec![0u8; oaep_key.min_output_size()];
    let key_len = oaep_key
        .decrypt(&OAEP_SHA256_MGF1SHA256, &envelope.encrypted_key, &mut content_key, None)
        .map_err(|_| CryptoError::Decryption("RSA-OAEP key unwrap failed".to_string()))?
        .len();
    content_key.truncate(key_len);

    if content_key.len() != CONTENT_KEY_LEN {
        return Err(CryptoError::Decryption("unexpected content key length".to_string()));
    }

    let nonce_bytes: [u8; NONCE_LEN] = envelope
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::Decryption("invalid nonce length".to_string()))?;

    let unbound = UnboundKey::new(&AES_256_GCM, &content_key)
        .map_err(|_| CryptoError::Decryption("invalid content key".to_string()))?;
    let aead_key = LessSafeKey::new(unbound);

    let mut buffer = envelope.ciphertext.clone();
    let plaintext = aead_key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut buffer,
        )
        .map_err(|_| CryptoError::Decryption("AES-GCM authentication failed".to_string()))?;

    Ok(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pem::pem_to_der;

    const TEST_KEY_PEM: &str = include_str!("../testdata/test_key.pem");
    const TEST_PUB_PEM: &str = include_str!("../testdata/test_pub.pem");

    #[test]
    fn seal_and_open() {
        let key = pem_to_der(TEST_KEY_PEM, "PRIVATE KEY").unwrap();
        let pub_key = pem_to_der(TEST_PUB_PEM, "PUBLIC KEY").unwrap();

        let plaintext = b"<saml:Assertion ID=\"ID_1\"/>";
        let envelope = seal(plaintext, &pub_key).unwrap();
        assert_ne!(envelope.ciphertext, plaintext.to_vec());

        let opened = open(&envelope, &key).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = pem_to_der(TEST_KEY_PEM, "PRIVATE KEY").unwrap();
        let pub_key = pem_to_der(TEST_PUB_PEM, "PUBLIC KEY").unwrap();

        let mut envelope = seal(b"secret", &pub_key).unwrap();
        envelope.ciphertext[0] ^= 0x01;

        assert!(open(&envelope, &key).is_err());
    }
}
