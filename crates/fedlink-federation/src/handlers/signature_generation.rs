//! Outgoing signature generation, last stage of the chain.

use fedlink_protocol_saml::bindings::{HttpRedirectBinding, SamlMessageType};
use fedlink_protocol_saml::signature::XmlSigner;
use fedlink_protocol_saml::SamlBinding;
use tracing::debug;

use crate::error::{FederationError, FederationResult};
use crate::handlers::{ChainConfig, HandlerRequest, HandlerResponse, Saml2Handler};

/// Signs the resulting document when signatures are on.
///
/// POST-bound documents get an enveloped XML signature; redirect-bound
/// ones get a detached signature over the literal query bytes, stored as a
/// ready-to-append query string.
#[derive(Debug, Default)]
pub struct SignatureGenerationHandler;

impl SignatureGenerationHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn sign(
        config: &ChainConfig,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        if !config.supports_signatures {
            return Ok(());
        }
        let Some(document) = response.document() else {
            return Ok(());
        };

        let manager = config.key_manager.as_ref().ok_or_else(|| {
            FederationError::Configuration("signatures enabled without a key manager".to_string())
        })?;
        let (key, certificate) = manager.signing_key_pair()?;
        let signer = XmlSigner::new(key, certificate);

        let use_post = response
            .post_binding_override
            .unwrap_or(config.binding == SamlBinding::HttpPost);

        if use_post {
            let xml = document.to_xml();
            let signed = signer.sign(&xml, document.id())?;
            debug!(id = %document.id(), "signed outgoing document");
            response.signed_document = Some(signed);
        } else {
            let message_type = if document.is_request() {
                SamlMessageType::Request
            } else {
                SamlMessageType::Response
            };
            let signed_query = HttpRedirectBinding::signed_query(
                &document.to_xml(),
                response.relay_state.as_deref(),
                signer.algorithm().uri(),
                message_type,
            )?;
            let signature = signer.sign_redirect(&signed_query)?;
            debug!(id = %document.id(), "signed outgoing query");
            response.signed_query_string = Some(format!(
                "{signed_query}&Signature={}",
                urlencoding::encode(&signature)
            ));
        }
        Ok(())
    }
}

impl Saml2Handler for SignatureGenerationHandler {
    fn name(&self) -> &'static str {
        "signature-generation"
    }

    fn generate_request(
        &self,
        config: &ChainConfig,
        _request: &mut HandlerRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        Self::sign(config, response)
    }

    fn handle_request_type(
        &self,
        config: &ChainConfig,
        _request: &mut HandlerRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        Self::sign(config, response)
    }

    fn handle_status_response_type(
        &self,
        config: &ChainConfig,
        _request: &mut HandlerRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        Self::sign(config, response)
    }
}
