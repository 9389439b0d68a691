//! XML-DSig signing and validation for SAML documents.
//!
//! Enveloped signatures are inserted after the root element's `Issuer`.
//! Validation is pinned to the document root: the signature's Reference URI
//! must name the root element, and the verified root is returned so callers
//! parse only content the signature actually covers. This closes the
//! signature-wrapping hole where an attacker prepends a signed element and
//! smuggles unsigned content elsewhere in the document.

mod signer;
mod validator;

pub use signer::XmlSigner;
pub use validator::{VerifiedDocument, XmlSignatureValidator};

use crate::types::{canonicalization_algorithms, digest_algorithms, signature_algorithms};

/// Signature algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    /// RSA with SHA-256.
    #[default]
    RsaSha256,
    /// RSA with SHA-384.
    RsaSha384,
    /// RSA with SHA-512.
    RsaSha512,
}

impl SignatureAlgorithm {
    /// Returns the URI for this signature algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::RsaSha256 => signature_algorithms::RSA_SHA256,
            Self::RsaSha384 => signature_algorithms::RSA_SHA384,
            Self::RsaSha512 => signature_algorithms::RSA_SHA512,
        }
    }

    /// Returns the matching digest algorithm URI.
    #[must_use]
    pub const fn digest_uri(&self) -> &'static str {
        match self {
            Self::RsaSha256 => digest_algorithms::SHA256,
            Self::RsaSha384 => digest_algorithms::SHA384,
            Self::RsaSha512 => digest_algorithms::SHA512,
        }
    }

    /// Parses a signature algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            signature_algorithms::RSA_SHA256 => Some(Self::RsaSha256),
            signature_algorithms::RSA_SHA384 => Some(Self::RsaSha384),
            signature_algorithms::RSA_SHA512 => Some(Self::RsaSha512),
            _ => None,
        }
    }

    pub(crate) const fn rsa_algorithm(&self) -> fedlink_crypto::RsaAlgorithm {
        match self {
            Self::RsaSha256 => fedlink_crypto::RsaAlgorithm::Sha256,
            Self::RsaSha384 => fedlink_crypto::RsaAlgorithm::Sha384,
            Self::RsaSha512 => fedlink_crypto::RsaAlgorithm::Sha512,
        }
    }

    pub(crate) fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::RsaSha256 => fedlink_crypto::sha256(data),
            Self::RsaSha384 => fedlink_crypto::sha384(data),
            Self::RsaSha512 => fedlink_crypto::sha512(data),
        }
    }
}

/// Canonicalization algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CanonicalizationAlgorithm {
    /// Exclusive C14N without comments.
    ExclusiveC14N,
    /// Exclusive C14N with comments.
    #[default]
    ExclusiveC14NWithComments,
    /// Inclusive C14N without comments.
    C14N,
}

impl CanonicalizationAlgorithm {
    /// Returns the URI for this canonicalization algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::ExclusiveC14N => canonicalization_algorithms::EXCLUSIVE_C14N,
            Self::ExclusiveC14NWithComments => {
                canonicalization_algorithms::EXCLUSIVE_C14N_WITH_COMMENTS
            }
            Self::C14N => canonicalization_algorithms::C14N,
        }
    }

    /// Parses a canonicalization algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            canonicalization_algorithms::EXCLUSIVE_C14N => Some(Self::ExclusiveC14N),
            canonicalization_algorithms::EXCLUSIVE_C14N_WITH_COMMENTS => {
                Some(Self::ExclusiveC14NWithComments)
            }
            canonicalization_algorithms::C14N => Some(Self::C14N),
            _ => None,
        }
    }
}

/// Parsed `<ds:Signature>` content.
#[derive(Debug, Clone)]
pub struct XmlSignature {
    /// The signature algorithm.
    pub algorithm: SignatureAlgorithm,
    /// The canonicalization algorithm.
    pub canonicalization: CanonicalizationAlgorithm,
    /// The Reference URI, normally `#` plus the signed element's ID.
    pub reference_uri: String,
    /// Base64 digest of the referenced element.
    pub digest_value: String,
    /// Base64 signature over SignedInfo.
    pub signature_value: String,
    /// Base64 DER certificate embedded in KeyInfo, if any.
    pub x509_certificate: Option<String>,
}

/// Configuration for signature creation.
#[derive(Debug, Clone)]
pub struct SignatureConfig {
    /// The signature algorithm to use.
    pub algorithm: SignatureAlgorithm,
    /// The canonicalization algorithm to use.
    pub canonicalization: CanonicalizationAlgorithm,
    /// Whether to embed the signer's certificate in KeyInfo.
    pub include_certificate: bool,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            algorithm: SignatureAlgorithm::RsaSha256,
            canonicalization: CanonicalizationAlgorithm::ExclusiveC14NWithComments,
            include_certificate: true,
        }
    }
}

impl SignatureConfig {
    /// Creates a configuration with the given algorithm.
    #[must_use]
    pub const fn with_algorithm(algorithm: SignatureAlgorithm) -> Self {
        Self {
            algorithm,
            canonicalization: CanonicalizationAlgorithm::ExclusiveC14NWithComments,
            include_certificate: true,
        }
    }
}
