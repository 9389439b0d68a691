//! SAML Single Logout types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SamlError, SamlResult};

use super::{saml_id, NameId, Status, SAML_VERSION};

/// Request to terminate an existing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutRequest {
    /// Unique identifier for this request.
    pub id: String,

    /// SAML protocol version (always "2.0").
    pub version: String,

    /// Timestamp when this request was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the requester.
    pub issuer: String,

    /// The endpoint this request is addressed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// The name identifier of the principal to log out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_id: Option<NameId>,

    /// Session index to terminate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_index: Option<String>,

    /// Time after which the request is no longer valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_on_or_after: Option<DateTime<Utc>>,
}

impl LogoutRequest {
    /// Creates a new logout request.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            id: saml_id(),
            version: SAML_VERSION.to_string(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            destination: None,
            name_id: None,
            session_index: None,
            not_on_or_after: None,
        }
    }

    /// Sets the destination endpoint.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Sets the principal to log out.
    #[must_use]
    pub fn with_name_id(mut self, name_id: NameId) -> Self {
        self.name_id = Some(name_id);
        self
    }

    /// Sets the session index to terminate.
    #[must_use]
    pub fn with_session_index(mut self, index: impl Into<String>) -> Self {
        self.session_index = Some(index.into());
        self
    }

    /// Sets the expiry of this request.
    #[must_use]
    pub fn not_on_or_after(mut self, instant: DateTime<Utc>) -> Self {
        self.not_on_or_after = Some(instant);
        self
    }

    /// Checks whether the request has expired.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.not_on_or_after.is_some_and(|limit| now >= limit)
    }

    /// Validates the basic structure of this request.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing or the version is not
    /// 2.0.
    pub fn validate(&self) -> SamlResult<()> {
        if self.id.is_empty() {
            return Err(SamlError::MissingElement("LogoutRequest ID".to_string()));
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

/// Status response answering a logout request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Unique identifier for this response.
    pub id: String,

    /// SAML protocol version (always "2.0").
    pub version: String,

    /// Timestamp when this response was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the responder.
    pub issuer: String,

    /// The ID of the request this response answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,

    /// The endpoint this response was addressed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// The status of the response.
    pub status: Status,
}

impl StatusResponse {
    /// Creates the Responder/Success response a provider sends after
    /// completing its part of a logout.
    #[must_use]
    pub fn logout_success(issuer: impl Into<String>) -> Self {
        Self {
            id: saml_id(),
            version: SAML_VERSION.to_string(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            in_response_to: None,
            destination: None,
            status: Status::responder_success(),
        }
    }

    /// Creates an error response with the given status.
    #[must_use]
    pub fn error(issuer: impl Into<String>, status: Status) -> Self {
        Self {
            status,
            ..Self::logout_success(issuer)
        }
    }

    /// Sets the request ID this response answers.
    #[must_use]
    pub fn in_response_to(mut self, request_id: impl Into<String>) -> Self {
        self.in_response_to = Some(request_id.into());
        self
    }

    /// Sets the destination endpoint.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Returns true if this response indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Validates the basic structure of this response.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing or the version is not
    /// 2.0.
    pub fn validate(&self) -> SamlResult<()> {
        if self.id.is_empty() {
            return Err(SamlError::MissingElement("StatusResponse ID".to_string()));
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
