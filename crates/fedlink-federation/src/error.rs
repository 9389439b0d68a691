//! Federation error types.

use fedlink_protocol_saml::{status_codes, sub_status_codes, SamlError};
use thiserror::Error;

/// Result type for federation operations.
pub type FederationResult<T> = Result<T, FederationError>;

/// Errors raised by the federation core.
#[derive(Debug, Error)]
pub enum FederationError {
    /// Invalid or incomplete provider configuration. Fatal at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Protocol-level failure from the SAML layer.
    #[error(transparent)]
    Saml(#[from] SamlError),

    /// The presented assertion has expired. The SP retry path turns this
    /// into a fresh AuthnRequest instead of a failure.
    #[error("assertion expired")]
    AssertionExpired,

    /// The message issuer is not in the trusted-domain list.
    #[error("issuer not trusted: {0}")]
    IssuerNotTrusted(String),

    /// An incoming message names a Destination other than this provider.
    #[error("message destined for '{destination}' received by '{expected}'")]
    DestinationMismatch {
        /// This provider's own URL.
        expected: String,
        /// The Destination attribute the message carried.
        destination: String,
    },

    /// A second handler tried to set the resulting document in one chain
    /// traversal.
    #[error("handler '{0}' produced a document but one was already set")]
    DocumentAlreadySet(&'static str),

    /// Session state missing or inconsistent.
    #[error("session error: {0}")]
    Session(String),

    /// Any other processing failure.
    #[error("processing error: {0}")]
    Processing(String),
}

impl FederationError {
    /// Returns the top-level SAML status code for an error response.
    #[must_use]
    pub const fn status_code(&self) -> &'static str {
        status_codes::RESPONDER
    }

    /// Returns the second-level SAML status code for an error response.
    ///
    /// Trust and addressing failures report request-denied; everything else
    /// reports a failed authentication.
    #[must_use]
    pub const fn sub_status_code(&self) -> &'static str {
        match self {
            Self::IssuerNotTrusted(_)
            | Self::DestinationMismatch { .. }
            | Self::Saml(SamlError::IssuerNotTrusted(_)) => sub_status_codes::REQUEST_DENIED,
            _ => sub_status_codes::AUTHN_FAILED,
        }
    }

    /// Returns true when the cause is an expired assertion, from either
    /// layer.
    #[must_use]
    pub const fn is_assertion_expired(&self) -> bool {
        matches!(
            self,
            Self::AssertionExpired | Self::Saml(SamlError::AssertionExpired)
        )
    }
}
