//! XML codec for SAML protocol messages.
//!
//! Parsing is event-based via quick-xml and matches on local names so
//! prefixed (`samlp:`, `saml2:`) and default-namespace documents both
//! decode. Serialization emits namespace-correct SAML 2.0 protocol XML that
//! the signature engine can sign in place.

mod reader;
mod writer;

pub use reader::{parse_assertion_document, parse_message};
pub use writer::{
    assertion_to_xml, authn_request_to_xml, logout_request_to_xml, response_to_xml,
    status_response_to_xml,
};

use crate::types::{AuthnRequest, LogoutRequest, Response, StatusResponse};

/// A parsed SAML protocol message.
#[derive(Debug, Clone)]
pub enum SamlMessage {
    /// An authentication request.
    AuthnRequest(AuthnRequest),
    /// A logout request.
    LogoutRequest(LogoutRequest),
    /// An authentication response.
    Response(Response),
    /// A logout (status) response.
    LogoutResponse(StatusResponse),
}

impl SamlMessage {
    /// Serializes the message back to protocol XML.
    #[must_use]
    pub fn to_xml(&self) -> String {
        match self {
            Self::AuthnRequest(r) => authn_request_to_xml(r),
            Self::LogoutRequest(r) => logout_request_to_xml(r),
            Self::Response(r) => response_to_xml(r),
            Self::LogoutResponse(r) => status_response_to_xml(r),
        }
    }

    /// Returns the message ID.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::AuthnRequest(r) => &r.id,
            Self::LogoutRequest(r) => &r.id,
            Self::Response(r) => &r.id,
            Self::LogoutResponse(r) => &r.id,
        }
    }

    /// Returns the message issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        match self {
            Self::AuthnRequest(r) => &r.issuer,
            Self::LogoutRequest(r) => &r.issuer,
            Self::Response(r) => &r.issuer,
            Self::LogoutResponse(r) => &r.issuer,
        }
    }

    /// Returns the message destination, if addressed.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::AuthnRequest(r) => r.destination.as_deref(),
            Self::LogoutRequest(r) => r.destination.as_deref(),
            Self::Response(r) => r.destination.as_deref(),
            Self::LogoutResponse(r) => r.destination.as_deref(),
        }
    }

    /// Returns true for request messages.
    #[must_use]
    pub const fn is_request(&self) -> bool {
        matches!(self, Self::AuthnRequest(_) | Self::LogoutRequest(_))
    }
}
