//! Issuer trust check, first stage of the chain.

use tracing::warn;

use crate::error::{FederationError, FederationResult};
use crate::handlers::{ChainConfig, HandlerRequest, HandlerResponse, Saml2Handler};

/// Rejects messages whose issuer falls outside the trusted domains.
///
/// An empty trusted-domain list trusts every issuer. Trust failures map to
/// a Responder/RequestDenied status at the provider boundary.
#[derive(Debug, Default)]
pub struct IssuerTrustHandler;

impl IssuerTrustHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn check(config: &ChainConfig, issuer: &str) -> FederationResult<()> {
        if config.trusted_domains.is_empty() {
            return Ok(());
        }

        let host = url::Url::parse(issuer)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| issuer.to_string());

        let trusted = config
            .trusted_domains
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")));

        if trusted {
            Ok(())
        } else {
            warn!(issuer, "rejecting message from untrusted issuer");
            Err(FederationError::IssuerNotTrusted(issuer.to_string()))
        }
    }
}

impl Saml2Handler for IssuerTrustHandler {
    fn name(&self) -> &'static str {
        "issuer-trust"
    }

    fn handle_request_type(
        &self,
        config: &ChainConfig,
        request: &mut HandlerRequest,
        _response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        Self::check(config, request.message()?.issuer())
    }

    fn handle_status_response_type(
        &self,
        config: &ChainConfig,
        request: &mut HandlerRequest,
        _response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        Self::check(config, request.message()?.issuer())
    }
}
