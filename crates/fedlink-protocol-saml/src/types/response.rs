//! SAML Response type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SamlError, SamlResult};

use super::{saml_id, Assertion, Status, SAML_VERSION};

/// Response message sent by an identity provider to a service provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Unique identifier for this response.
    pub id: String,

    /// SAML protocol version (always "2.0").
    pub version: String,

    /// Timestamp when this response was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the issuing identity provider.
    pub issuer: String,

    /// The ID of the request this response answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,

    /// The service provider URL this response was addressed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// The status of the response.
    pub status: Status,

    /// Plaintext assertions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<Assertion>,

    /// Encrypted assertions, kept as raw `EncryptedAssertion` XML until the
    /// recipient decrypts them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encrypted_assertions: Vec<String>,
}

impl Response {
    /// Creates a new success response.
    #[must_use]
    pub fn success(issuer: impl Into<String>) -> Self {
        Self {
            id: saml_id(),
            version: SAML_VERSION.to_string(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            in_response_to: None,
            destination: None,
            status: Status::success(),
            assertions: Vec::new(),
            encrypted_assertions: Vec::new(),
        }
    }

    /// Creates a new error response with the given status.
    #[must_use]
    pub fn error(issuer: impl Into<String>, status: Status) -> Self {
        Self {
            status,
            ..Self::success(issuer)
        }
    }

    /// Sets the request ID this response answers.
    #[must_use]
    pub fn in_response_to(mut self, request_id: impl Into<String>) -> Self {
        self.in_response_to = Some(request_id.into());
        self
    }

    /// Sets the destination URL.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Adds an assertion.
    #[must_use]
    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    /// Adds an encrypted assertion as raw XML.
    #[must_use]
    pub fn with_encrypted_assertion(mut self, xml: impl Into<String>) -> Self {
        self.encrypted_assertions.push(xml.into());
        self
    }

    /// Returns true if this response indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Gets the first assertion if present.
    #[must_use]
    pub fn first_assertion(&self) -> Option<&Assertion> {
        self.assertions.first()
    }

    /// Validates the basic structure of this response.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing or the version is not
    /// 2.0.
    pub fn validate(&self) -> SamlResult<()> {
        if self.id.is_empty() {
            return Err(SamlError::MissingElement("Response ID".to_string()));
        }
        if self.version != SAML_VERSION {
            return Err(SamlError::InvalidResponse(format!(
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_response() {
        let response = Response::success("https://idp.example.com/idp/")
            .in_response_to("ID_req")
            .with_destination("https://employee.example.com/");

        assert!(response.is_success());
        assert_eq!(response.in_response_to.as_deref(), Some("ID_req"));
        assert!(response.validate().is_ok());
    }

    #[test]
    fn error_response_has_no_assertions() {
        let response = Response::error(
            "https://idp.example.com/idp/",
            Status::responder_authn_failed(),
        );
        assert!(!response.is_success());
        assert!(response.assertions.is_empty());
    }

    #[test]
    fn validation_rejects_bad_version() {
        let mut response = Response::success("https://idp.example.com/idp/");
        response.version = "1.1".to_string();
        assert!(response.validate().is_err());
    }
}
