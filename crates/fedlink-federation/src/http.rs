//! HTTP facade.
//!
//! The federation core is driven through this context rather than a
//! concrete server framework. The host application maps its request type
//! onto `HttpContext` and renders the outcome back.

use std::collections::HashMap;

/// HTTP method of the incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    /// GET, used by the redirect binding.
    #[default]
    Get,
    /// POST, used by the POST binding.
    Post,
}

/// Snapshot of the incoming HTTP request.
#[derive(Debug, Clone, Default)]
pub struct HttpContext {
    /// Request method.
    pub method: HttpMethod,
    /// Opaque session identifier assigned by the host application.
    pub session_id: String,
    /// Raw query string, needed byte-exact for detached redirect signatures.
    pub raw_query: Option<String>,
    /// Peer address of the request.
    pub remote_addr: Option<String>,
    /// Referer header, used for the IDP error fallback.
    pub referer: Option<String>,
    params: HashMap<String, String>,
}

impl HttpContext {
    /// Creates a context for the given method and session.
    #[must_use]
    pub fn new(method: HttpMethod, session_id: impl Into<String>) -> Self {
        Self {
            method,
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Adds a decoded query or form parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Sets the raw query string.
    #[must_use]
    pub fn with_raw_query(mut self, query: impl Into<String>) -> Self {
        self.raw_query = Some(query.into());
        self
    }

    /// Sets the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Sets the Referer header.
    #[must_use]
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Returns a decoded parameter value.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// The `SAMLRequest` parameter.
    #[must_use]
    pub fn saml_request(&self) -> Option<&str> {
        self.param("SAMLRequest")
    }

    /// The `SAMLResponse` parameter.
    #[must_use]
    pub fn saml_response(&self) -> Option<&str> {
        self.param("SAMLResponse")
    }

    /// The `RelayState` parameter.
    #[must_use]
    pub fn relay_state(&self) -> Option<&str> {
        self.param("RelayState")
    }

    /// The detached `Signature` parameter.
    #[must_use]
    pub fn signature(&self) -> Option<&str> {
        self.param("Signature")
    }

    /// The `SigAlg` parameter.
    #[must_use]
    pub fn sig_alg(&self) -> Option<&str> {
        self.param("SigAlg")
    }

    /// True when the request asks for a global logout (`GLO=true`,
    /// case-insensitive).
    #[must_use]
    pub fn is_global_logout(&self) -> bool {
        self.flag("GLO")
    }

    /// True when the request asks for a local logout (`LLO=true`,
    /// case-insensitive).
    #[must_use]
    pub fn is_local_logout(&self) -> bool {
        self.flag("LLO")
    }

    fn flag(&self, name: &str) -> bool {
        self.param(name)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logout_flags_are_case_insensitive() {
        let ctx = HttpContext::new(HttpMethod::Get, "s1").with_param("GLO", "TRUE");
        assert!(ctx.is_global_logout());
        assert!(!ctx.is_local_logout());

        let ctx = HttpContext::new(HttpMethod::Get, "s1").with_param("LLO", "True");
        assert!(ctx.is_local_logout());

        let ctx = HttpContext::new(HttpMethod::Get, "s1").with_param("GLO", "1");
        assert!(!ctx.is_global_logout());
    }

    #[test]
    fn named_parameters() {
        let ctx = HttpContext::new(HttpMethod::Post, "s1")
            .with_param("SAMLResponse", "abc")
            .with_param("RelayState", "rs");
        assert_eq!(ctx.saml_response(), Some("abc"));
        assert_eq!(ctx.relay_state(), Some("rs"));
        assert_eq!(ctx.saml_request(), None);
    }
}
