//! SAML 2.0 protocol layer for fedlink.
//!
//! This crate implements the wire-level half of web-browser SSO federation:
//!
//! - **Protocol messages** - AuthnRequest, Response, Assertion, LogoutRequest
//!   and StatusResponse types with parsing and serialization
//! - **Bindings** - HTTP-POST (auto-submit form) and HTTP-Redirect
//!   (deflate + base64 + URL encoding) message transport
//! - **XML signatures** - enveloped XML-DSig signing and validation,
//!   including the defense against signature-wrapping attacks
//! - **Assertion encryption** - `EncryptedAssertion` via RSA-OAEP key
//!   transport and AES-256-GCM content encryption
//!
//! The federation state machine (handler chain, SP/IDP processors,
//! participant bookkeeping) lives in `fedlink-federation` and drives this
//! crate.
//!
//! # SAML Specifications
//!
//! - [SAML 2.0 Core](https://docs.oasis-open.org/security/saml/v2.0/saml-core-2.0-os.pdf)
//! - [SAML 2.0 Bindings](https://docs.oasis-open.org/security/saml/v2.0/saml-bindings-2.0-os.pdf)
//! - [XML Signature](https://www.w3.org/TR/xmldsig-core1/)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bindings;
pub mod encryption;
pub mod error;
pub mod signature;
pub mod types;
pub mod xml;

pub use error::{SamlError, SamlResult};
pub use types::*;
pub use xml::{
    assertion_to_xml, authn_request_to_xml, logout_request_to_xml, parse_assertion_document,
    parse_message, response_to_xml, status_response_to_xml, SamlMessage,
};
