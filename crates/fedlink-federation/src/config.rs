//! Provider configuration.
//!
//! Plain serde structs loaded by the host application. A service provider
//! is one component parameterized by binding and signature flags; there is
//! no per-binding provider variant.

use std::path::PathBuf;

use fedlink_protocol_saml::SamlBinding;
use serde::{Deserialize, Serialize};

/// Service provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpConfig {
    /// This SP's entity ID and assertion consumer service URL.
    pub service_url: String,

    /// The identity provider endpoint authentication requests go to.
    pub identity_url: String,

    /// Logout endpoint at the IDP; defaults to `identity_url`.
    #[serde(default)]
    pub logout_url: Option<String>,

    /// Binding used for outgoing messages.
    #[serde(default)]
    pub binding: SamlBinding,

    /// Whether messages are signed and incoming signatures validated.
    #[serde(default)]
    pub supports_signatures: bool,

    /// Issuer domains this SP accepts messages from. Empty trusts all.
    #[serde(default)]
    pub trusted_domains: Vec<String>,

    /// Attribute name carrying role values in assertions.
    #[serde(default = "default_role_attribute")]
    pub role_attribute: String,

    /// Fall back to resolving a validating key by the request's remote
    /// address when the issuer host has none. Off by default; remote
    /// addresses are spoofable behind proxies.
    #[serde(default)]
    pub allow_remote_address_key_fallback: bool,

    /// Key material settings.
    #[serde(default)]
    pub key_manager: KeyManagerConfig,
}

impl SpConfig {
    /// Creates a config with defaults for the given endpoints.
    #[must_use]
    pub fn new(service_url: impl Into<String>, identity_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into(),
            identity_url: identity_url.into(),
            logout_url: None,
            binding: SamlBinding::default(),
            supports_signatures: false,
            trusted_domains: Vec::new(),
            role_attribute: default_role_attribute(),
            allow_remote_address_key_fallback: false,
            key_manager: KeyManagerConfig::default(),
        }
    }

    /// Returns the logout endpoint, defaulting to the identity URL.
    #[must_use]
    pub fn logout_endpoint(&self) -> &str {
        self.logout_url.as_deref().unwrap_or(&self.identity_url)
    }
}

/// Identity provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpConfig {
    /// This IDP's entity ID and endpoint URL.
    pub identity_url: String,

    /// Binding used when no participant-specific binding is recorded.
    #[serde(default)]
    pub binding: SamlBinding,

    /// Whether outgoing documents are signed and incoming signatures
    /// validated.
    #[serde(default)]
    pub supports_signatures: bool,

    /// Issuer domains this IDP serves. Empty trusts all.
    #[serde(default)]
    pub trusted_domains: Vec<String>,

    /// Assertion validity in seconds, feeding conditions and logout
    /// `NotOnOrAfter`.
    #[serde(default = "default_token_validity_secs")]
    pub token_validity_secs: u64,

    /// Name of the registered role generator to use.
    #[serde(default = "default_role_generator")]
    pub role_generator: String,

    /// Attribute name carrying role values in issued assertions.
    #[serde(default = "default_role_attribute")]
    pub role_attribute: String,

    /// Remote-address key fallback, as on the SP. Off by default.
    #[serde(default)]
    pub allow_remote_address_key_fallback: bool,

    /// Key material settings.
    #[serde(default)]
    pub key_manager: KeyManagerConfig,
}

impl IdpConfig {
    /// Creates a config with defaults for the given endpoint.
    #[must_use]
    pub fn new(identity_url: impl Into<String>) -> Self {
        Self {
            identity_url: identity_url.into(),
            binding: SamlBinding::default(),
            supports_signatures: false,
            trusted_domains: Vec::new(),
            token_validity_secs: default_token_validity_secs(),
            role_generator: default_role_generator(),
            role_attribute: default_role_attribute(),
            allow_remote_address_key_fallback: false,
            key_manager: KeyManagerConfig::default(),
        }
    }
}

/// Key manager selection and file locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyManagerConfig {
    /// Which implementation to build.
    #[serde(default)]
    pub kind: KeyManagerKind,

    /// PEM file with the provider's private key.
    #[serde(default)]
    pub signing_key_path: Option<PathBuf>,

    /// PEM file with the provider's certificate.
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,

    /// Peer certificates whose public keys validate incoming signatures.
    #[serde(default)]
    pub validating_certs: Vec<ValidatingCertEntry>,
}

/// A peer certificate aliased by host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatingCertEntry {
    /// Alias, normally the peer's host name.
    pub alias: String,
    /// Path to the PEM certificate.
    pub path: PathBuf,
}

/// Closed set of key manager implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyManagerKind {
    /// Keys provided programmatically.
    #[default]
    InMemory,
    /// Keys loaded from PEM files at construction.
    PemFile,
}

fn default_role_attribute() -> String {
    "Role".to_string()
}

const fn default_token_validity_secs() -> u64 {
    300
}

fn default_role_generator() -> String {
    "static".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sp_defaults() {
        let config = SpConfig::new("https://employee.example.com/", "https://idp.example.com/idp/");
        assert_eq!(config.binding, SamlBinding::HttpPost);
        assert!(!config.allow_remote_address_key_fallback);
        assert_eq!(config.logout_endpoint(), "https://idp.example.com/idp/");
        assert_eq!(config.role_attribute, "Role");
    }

    #[test]
    fn idp_defaults() {
        let config = IdpConfig::new("https://idp.example.com/idp/");
        assert_eq!(config.token_validity_secs, 300);
        assert_eq!(config.role_generator, "static");
    }
}
