//! SAML status types.
//!
//! Status codes nest one level: logout responses report Responder with a
//! nested Success, error responses report Responder with the failure cause.

use serde::{Deserialize, Serialize};

use super::{status_codes, sub_status_codes};

/// SAML protocol status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// The status code, possibly with a nested second-level code.
    pub status_code: StatusCode,

    /// Optional status message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

impl Status {
    /// Creates a plain success status.
    #[must_use]
    pub fn success() -> Self {
        Self {
            status_code: StatusCode::new(status_codes::SUCCESS),
            status_message: None,
        }
    }

    /// Creates the Responder/Success status used in logout responses.
    #[must_use]
    pub fn responder_success() -> Self {
        Self {
            status_code: StatusCode::new(status_codes::RESPONDER)
                .with_sub_status(StatusCode::new(sub_status_codes::SUCCESS)),
            status_message: None,
        }
    }

    /// Creates the Responder/AuthnFailed error status.
    #[must_use]
    pub fn responder_authn_failed() -> Self {
        Self {
            status_code: StatusCode::new(status_codes::RESPONDER)
                .with_sub_status(StatusCode::new(sub_status_codes::AUTHN_FAILED)),
            status_message: None,
        }
    }

    /// Creates the Responder/RequestDenied error status.
    #[must_use]
    pub fn responder_request_denied() -> Self {
        Self {
            status_code: StatusCode::new(status_codes::RESPONDER)
                .with_sub_status(StatusCode::new(sub_status_codes::REQUEST_DENIED)),
            status_message: None,
        }
    }

    /// Creates a status from explicit top-level and second-level code URIs.
    #[must_use]
    pub fn two_level(top: impl Into<String>, sub: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::new(top).with_sub_status(StatusCode::new(sub)),
            status_message: None,
        }
    }

    /// Sets the status message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    /// Returns true if this status indicates success.
    ///
    /// A nested Success under Responder counts: that is how logout
    /// responders report a completed logout.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status_code.value == status_codes::SUCCESS
            || self.status_code.sub_status_value() == Some(sub_status_codes::SUCCESS)
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}

/// SAML status code, optionally nesting a second-level code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCode {
    /// The status code URI value.
    pub value: String,

    /// Optional nested status code providing more detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<Box<StatusCode>>,
}

impl StatusCode {
    /// Creates a new status code with the given value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            status_code: None,
        }
    }

    /// Adds a second-level status code.
    #[must_use]
    pub fn with_sub_status(mut self, sub: StatusCode) -> Self {
        self.status_code = Some(Box::new(sub));
        self
    }

    /// Returns the second-level status code value if present.
    #[must_use]
    pub fn sub_status_value(&self) -> Option<&str> {
        self.status_code.as_ref().map(|s| s.value.as_str())
    }
}
