//! SAML 2.0 message bindings.
//!
//! Two transports are supported:
//!
//! - **HTTP-POST**: the XML is base64-encoded into a hidden form field of an
//!   auto-submitting HTML page. Signatures are enveloped in the XML itself.
//! - **HTTP-Redirect**: the XML is DEFLATE-compressed, base64-encoded and
//!   URL-encoded into query parameters. Signatures are detached and cover
//!   the literal query string bytes.

mod post;
mod redirect;

pub use post::HttpPostBinding;
pub use redirect::HttpRedirectBinding;

/// Whether a binding carries a request or a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamlMessageType {
    /// Carried in the `SAMLRequest` parameter.
    Request,
    /// Carried in the `SAMLResponse` parameter.
    Response,
}

impl SamlMessageType {
    /// Returns the form or query parameter name for this message type.
    #[must_use]
    pub const fn form_param(&self) -> &'static str {
        match self {
            Self::Request => "SAMLRequest",
            Self::Response => "SAMLResponse",
        }
    }
}

/// A SAML message recovered from a binding.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    /// The decoded XML document.
    pub xml: String,
    /// Request or response.
    pub message_type: SamlMessageType,
    /// Opaque relay state echoed back to the sender.
    pub relay_state: Option<String>,
    /// Detached signature, redirect binding only.
    pub signature: Option<String>,
    /// Signature algorithm URI, redirect binding only.
    pub sig_alg: Option<String>,
}
