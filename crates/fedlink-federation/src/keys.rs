//! Trust key management.
//!
//! A key manager holds one signing key pair and a set of validating keys
//! aliased by peer host. It is read-only after construction; providers
//! resolve keys through the trait and never touch key files directly.

use std::collections::HashMap;
use std::path::Path;

use crate::config::{KeyManagerConfig, KeyManagerKind};
use crate::error::{FederationError, FederationResult};

/// Read-only key material for a federation provider.
pub trait TrustKeyManager: Send + Sync {
    /// The provider's signing key (PKCS#8 or PKCS#1 DER).
    fn signing_key(&self) -> FederationResult<Vec<u8>>;

    /// The signing key together with its certificate, when configured.
    fn signing_key_pair(&self) -> FederationResult<(Vec<u8>, Option<Vec<u8>>)>;

    /// Validating public key (`SubjectPublicKeyInfo` DER) for a peer alias.
    fn validating_key(&self, alias: &str) -> FederationResult<Vec<u8>>;

    /// Validating key resolved by the host of a peer URL.
    fn validating_key_by_host(&self, peer_url: &str) -> FederationResult<Vec<u8>> {
        let host = url::Url::parse(peer_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| peer_url.to_string());
        self.validating_key(&host)
    }
}

/// Key manager over explicit DER key material.
#[derive(Debug, Default)]
pub struct InMemoryKeyManager {
    signing_key: Option<Vec<u8>>,
    certificate: Option<Vec<u8>>,
    validating: HashMap<String, Vec<u8>>,
}

impl InMemoryKeyManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signing key (DER).
    #[must_use]
    pub fn with_signing_key(mut self, key_der: Vec<u8>) -> Self {
        self.signing_key = Some(key_der);
        self
    }

    /// Sets the signing certificate (DER).
    #[must_use]
    pub fn with_certificate(mut self, cert_der: Vec<u8>) -> Self {
        self.certificate = Some(cert_der);
        self
    }

    /// Adds a validating key (`SubjectPublicKeyInfo` DER) under an alias.
    #[must_use]
    pub fn with_validating_key(mut self, alias: impl Into<String>, spki_der: Vec<u8>) -> Self {
        self.validating.insert(alias.into(), spki_der);
        self
    }
}

impl TrustKeyManager for InMemoryKeyManager {
    fn signing_key(&self) -> FederationResult<Vec<u8>> {
        self.signing_key
            .clone()
            .ok_or_else(|| FederationError::Configuration("no signing key configured".to_string()))
    }

    fn signing_key_pair(&self) -> FederationResult<(Vec<u8>, Option<Vec<u8>>)> {
        Ok((self.signing_key()?, self.certificate.clone()))
    }

    fn validating_key(&self, alias: &str) -> FederationResult<Vec<u8>> {
        self.validating.get(alias).cloned().ok_or_else(|| {
            FederationError::Configuration(format!("no validating key for '{alias}'"))
        })
    }
}

/// Builds a key manager from configuration.
///
/// `KeyManagerKind` is a closed registry of implementations; configuration
/// selects one by name instead of naming classes to instantiate.
///
/// # Errors
///
/// Returns a configuration error if configured key files are missing or do
/// not decode.
pub fn build_key_manager(config: &KeyManagerConfig) -> FederationResult<InMemoryKeyManager> {
    match config.kind {
        KeyManagerKind::InMemory => Ok(InMemoryKeyManager::new()),
        KeyManagerKind::PemFile => {
            let mut manager = InMemoryKeyManager::new();

            if let Some(ref path) = config.signing_key_path {
                manager = manager.with_signing_key(read_pem(
                    path,
                    &["PRIVATE KEY", "RSA PRIVATE KEY"],
                )?);
            }
            if let Some(ref path) = config.certificate_path {
                manager = manager.with_certificate(read_pem(path, &["CERTIFICATE"])?);
            }
            for entry in &config.validating_certs {
                let cert_der = read_pem(&entry.path, &["CERTIFICATE"])?;
                let spki = fedlink_crypto::public_key_from_cert(&cert_der)
                    .map_err(|e| FederationError::Configuration(e.to_string()))?;
                manager = manager.with_validating_key(entry.alias.clone(), spki);
            }

            Ok(manager)
        }
    }
}

fn read_pem(path: &Path, labels: &[&str]) -> FederationResult<Vec<u8>> {
    let pem = std::fs::read_to_string(path).map_err(|e| {
        FederationError::Configuration(format!("cannot read {}: {e}", path.display()))
    })?;

    for label in labels {
        if let Ok(der) = fedlink_crypto::pem_to_der(&pem, label) {
            return Ok(der);
        }
    }
    Err(FederationError::Configuration(format!(
        "{} holds no {} block",
        path.display(),
        labels.join(" or ")
    )))
}
