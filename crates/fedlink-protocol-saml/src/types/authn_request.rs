//! SAML AuthnRequest type.
//!
//! One authentication request is issued per unauthenticated browser visit at
//! the service provider and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SamlError, SamlResult};

use super::{saml_id, NameIdPolicy, SamlBinding, SAML_VERSION};

/// Authentication request sent by a service provider to an identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthnRequest {
    /// Unique identifier for this request.
    pub id: String,

    /// SAML protocol version (always "2.0").
    pub version: String,

    /// Timestamp when this request was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the requesting service provider.
    pub issuer: String,

    /// The identity provider endpoint this request is addressed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// The service provider URL where the response must be delivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion_consumer_service_url: Option<String>,

    /// Binding URI requested for the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_binding: Option<String>,

    /// Name ID policy constraints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_id_policy: Option<NameIdPolicy>,

    /// Whether the IDP must re-authenticate the user.
    #[serde(default)]
    pub force_authn: bool,

    /// Whether the IDP must not interact with the user.
    #[serde(default)]
    pub is_passive: bool,
}

impl AuthnRequest {
    /// Creates a new authentication request.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            id: saml_id(),
            version: SAML_VERSION.to_string(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            destination: None,
            assertion_consumer_service_url: None,
            protocol_binding: None,
            name_id_policy: None,
            force_authn: false,
            is_passive: false,
        }
    }

    /// Sets the destination endpoint.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Sets the assertion consumer service URL.
    #[must_use]
    pub fn with_acs_url(mut self, url: impl Into<String>) -> Self {
        self.assertion_consumer_service_url = Some(url.into());
        self
    }

    /// Sets the protocol binding for the response.
    #[must_use]
    pub fn with_binding(mut self, binding: SamlBinding) -> Self {
        self.protocol_binding = Some(binding.uri().to_string());
        self
    }

    /// Sets the name ID policy.
    #[must_use]
    pub fn with_name_id_policy(mut self, policy: NameIdPolicy) -> Self {
        self.name_id_policy = Some(policy);
        self
    }

    /// Returns the parsed protocol binding.
    #[must_use]
    pub fn parsed_binding(&self) -> Option<SamlBinding> {
        self.protocol_binding.as_deref().and_then(SamlBinding::from_uri)
    }

    /// Validates the basic structure of this request.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing or the version is not
    /// 2.0.
    pub fn validate(&self) -> SamlResult<()> {
        if self.id.is_empty() {
            return Err(SamlError::MissingElement("AuthnRequest ID".to_string()));
        }
        if self.version != SAML_VERSION {
            return Err(SamlError::InvalidRequest(format!(
                "unsupported SAML version: {}",
                self.version
            )));
        }
        if self.issuer.is_empty() {
            return Err(SamlError::MissingElement("Issuer".to_string()));
        }
        Ok(())
    }
}
