//! SAML error types.
//!
//! Errors carry enough classification to map onto the two-level SAML status
//! codes an identity provider reports back to the requester.

use thiserror::Error;

use crate::types::{status_codes, sub_status_codes};

/// Result type for SAML operations.
pub type SamlResult<T> = Result<T, SamlError>;

/// SAML protocol errors.
#[derive(Debug, Error)]
pub enum SamlError {
    /// Invalid SAML request format or content.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid SAML response format or content.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// XML parsing error.
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    /// Missing required element or attribute.
    #[error("missing required element: {0}")]
    MissingElement(String),

    /// XML signature validation failed.
    #[error("signature validation failed: {0}")]
    SignatureInvalid(String),

    /// XML signature creation failed.
    #[error("signature creation failed: {0}")]
    SignatureCreation(String),

    /// The document structure defeats the signature, e.g. a wrapped element.
    #[error("signature does not cover the processed content: {0}")]
    SignatureWrapped(String),

    /// Invalid assertion content.
    #[error("invalid assertion: {0}")]
    InvalidAssertion(String),

    /// Assertion validity window has passed.
    #[error("assertion expired")]
    AssertionExpired,

    /// Assertion validity window has not started.
    #[error("assertion not yet valid")]
    AssertionNotYetValid,

    /// Issuer differs from the expected entity.
    #[error("invalid issuer: expected {expected}, got {actual}")]
    InvalidIssuer {
        /// The expected issuer.
        expected: String,
        /// The actual issuer.
        actual: String,
    },

    /// Destination differs from this provider's endpoint.
    #[error("invalid destination: expected {expected}, got {actual}")]
    InvalidDestination {
        /// The expected destination URL.
        expected: String,
        /// The actual destination URL.
        actual: String,
    },

    /// The message issuer is not in the trusted-domain list.
    #[error("issuer not trusted: {0}")]
    IssuerNotTrusted(String),

    /// Unknown or unsupported binding.
    #[error("unsupported binding: {0}")]
    UnsupportedBinding(String),

    /// Base64 decoding error.
    #[error("base64 decode error: {0}")]
    Base64Decode(String),

    /// Deflate compression or decompression error.
    #[error("deflate error: {0}")]
    Deflate(String),

    /// Assertion encryption or decryption failed.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Cryptographic operation error.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Internal processing error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SamlError {
    /// Returns the top-level SAML status code for this error.
    ///
    /// Error responses are issued by the provider that failed, so the
    /// top-level code is Responder with the cause in the second level.
    #[must_use]
    pub const fn status_code(&self) -> &'static str {
        status_codes::RESPONDER
    }

    /// Returns the second-level status code for this error.
    #[must_use]
    pub const fn sub_status_code(&self) -> &'static str {
        match self {
            Self::IssuerNotTrusted(_) => sub_status_codes::REQUEST_DENIED,
            _ => sub_status_codes::AUTHN_FAILED,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_)
            | Self::InvalidResponse(_)
            | Self::MissingElement(_)
            | Self::Base64Decode(_)
            | Self::Deflate(_)
            | Self::XmlParse(_)
            | Self::UnsupportedBinding(_) => 400,
            Self::SignatureInvalid(_)
            | Self::SignatureWrapped(_)
            | Self::InvalidAssertion(_)
            | Self::AssertionExpired
            | Self::AssertionNotYetValid
            | Self::InvalidIssuer { .. }
            | Self::InvalidDestination { .. } => 401,
            Self::IssuerNotTrusted(_) => 403,
            _ => 500,
        }
    }
}

impl From<quick_xml::Error> for SamlError {
    fn from(err: quick_xml::Error) -> Self {
        Self::XmlParse(err.to_string())
    }
}

impl From<base64::DecodeError> for SamlError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Base64Decode(err.to_string())
    }
}

impl From<std::io::Error> for SamlError {
    fn from(err: std::io::Error) -> Self {
        Self::Deflate(err.to_string())
    }
}

impl From<fedlink_crypto::CryptoError> for SamlError {
    fn from(err: fedlink_crypto::CryptoError) -> Self {
        Self::Crypto(err.to_string())
    }
}
