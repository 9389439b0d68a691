//! Incoming signature validation, second stage of the chain.

use fedlink_protocol_saml::bindings::HttpRedirectBinding;
use fedlink_protocol_saml::parse_message;
use fedlink_protocol_saml::signature::{SignatureAlgorithm, XmlSignatureValidator};
use tracing::debug;

use crate::error::{FederationError, FederationResult};
use crate::handlers::{ChainConfig, HandlerRequest, HandlerResponse, Saml2Handler};

/// Validates the signature on incoming messages when signatures are on.
///
/// POST-bound documents carry an enveloped signature; after validation the
/// traversal's message and raw bytes are replaced with the verified copy,
/// so later handlers can only see content the signature covers.
/// Redirect-bound messages carry a detached signature over the literal
/// query bytes.
#[derive(Debug, Default)]
pub struct SignatureValidationHandler;

impl SignatureValidationHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn validate(config: &ChainConfig, request: &mut HandlerRequest) -> FederationResult<()> {
        if !config.supports_signatures {
            return Ok(());
        }

        let issuer = request.message()?.issuer().to_string();
        let key = Self::resolve_key(config, request, &issuer)?;
        let validator = XmlSignatureValidator::new(Vec::new()).with_public_keys(vec![key]);

        // A Signature query parameter means the redirect binding carried a
        // detached signature; otherwise the document itself must be signed.
        if let (Some(signature), Some(raw_query)) =
            (request.context.signature(), request.context.raw_query.as_deref())
        {
            let sig_alg = request
                .context
                .sig_alg()
                .map_or_else(|| SignatureAlgorithm::default().uri().to_string(), str::to_string);
            let signed = HttpRedirectBinding::signed_portion(raw_query)?;
            validator.validate_redirect(signed, signature, &sig_alg)?;
            debug!(issuer, "redirect signature verified");
            return Ok(());
        }

        let raw_xml = request.raw_xml.as_deref().ok_or_else(|| {
            FederationError::Processing("signed traversal carries no document bytes".to_string())
        })?;
        let verified = validator.validate(raw_xml)?;

        request.message = Some(parse_message(&verified.xml)?);
        request.raw_xml = Some(verified.xml);
        debug!(issuer, "enveloped signature verified");
        Ok(())
    }

    fn resolve_key(
        config: &ChainConfig,
        request: &HandlerRequest,
        issuer: &str,
    ) -> FederationResult<Vec<u8>> {
        if let Some(ref key) = request.options.sender_public_key {
            return Ok(key.clone());
        }

        let manager = config.key_manager.as_ref().ok_or_else(|| {
            FederationError::Configuration("signatures enabled without a key manager".to_string())
        })?;

        match manager.validating_key_by_host(issuer) {
            Ok(key) => Ok(key),
            Err(err) => {
                if config.allow_remote_address_key_fallback {
                    if let Some(ref addr) = request.context.remote_addr {
                        return manager.validating_key(addr);
                    }
                }
                Err(err)
            }
        }
    }
}

impl Saml2Handler for SignatureValidationHandler {
    fn name(&self) -> &'static str {
        "signature-validation"
    }

    fn handle_request_type(
        &self,
        config: &ChainConfig,
        request: &mut HandlerRequest,
        _response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        Self::validate(config, request)
    }

    fn handle_status_response_type(
        &self,
        config: &ChainConfig,
        request: &mut HandlerRequest,
        _response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        Self::validate(config, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::ProviderMode;
    use crate::http::{HttpContext, HttpMethod};
    use crate::keys::InMemoryKeyManager;
    use fedlink_protocol_saml::signature::XmlSigner;
    use fedlink_protocol_saml::{authn_request_to_xml, AuthnRequest, SamlMessage};
    use std::sync::Arc;

    const SP_KEY: &str = include_str!("../../testdata/sp_key.pem");
    const SP_PUB: &str = include_str!("../../testdata/sp_pub.pem");

    fn signed_request(issuer: &str) -> (SamlMessage, String) {
        let request = AuthnRequest::new(issuer);
        let xml = authn_request_to_xml(&request);
        let signer = XmlSigner::from_pem(SP_KEY, None).unwrap();
        let signed = signer.sign(&xml, &request.id).unwrap();
        (SamlMessage::AuthnRequest(request), signed)
    }

    fn config_with_key(issuer_host: &str) -> ChainConfig {
        let spki = fedlink_crypto::pem_to_der(SP_PUB, "PUBLIC KEY").unwrap();
        let manager = InMemoryKeyManager::new().with_validating_key(issuer_host, spki);

        let mut config = ChainConfig::new(ProviderMode::IdentityProvider, "https://idp.example.com/");
        config.supports_signatures = true;
        config.key_manager = Some(Arc::new(manager));
        config
    }

    #[test]
    fn valid_enveloped_signature_passes_and_replaces_the_message() {
        let issuer = "https://employee.example.com/";
        let (message, signed_xml) = signed_request(issuer);
        let config = config_with_key("employee.example.com");

        let context = HttpContext::new(HttpMethod::Post, "s1");
        let mut request = HandlerRequest::incoming(context, message, signed_xml.clone());

        SignatureValidationHandler::validate(&config, &mut request).unwrap();
        assert!(request.raw_xml.as_deref().unwrap().contains("<ds:Signature"));
    }

    #[test]
    fn tampered_document_is_rejected() {
        let issuer = "https://employee.example.com/";
        let (message, signed_xml) = signed_request(issuer);
        let tampered = signed_xml.replace(issuer, "https://rogue.example.com/");
        let config = config_with_key("employee.example.com");

        let context = HttpContext::new(HttpMethod::Post, "s1");
        let mut request = HandlerRequest::incoming(context, message, tampered);

        assert!(SignatureValidationHandler::validate(&config, &mut request).is_err());
    }

    #[test]
    fn unknown_issuer_without_fallback_fails() {
        let issuer = "https://unknown.example.com/";
        let (message, signed_xml) = signed_request(issuer);
        let config = config_with_key("employee.example.com");

        let context = HttpContext::new(HttpMethod::Post, "s1");
        let mut request = HandlerRequest::incoming(context, message, signed_xml);

        assert!(matches!(
            SignatureValidationHandler::validate(&config, &mut request),
            Err(FederationError::Configuration(_))
        ));
    }

    #[test]
    fn remote_address_fallback_is_opt_in() {
        let issuer = "https://unknown.example.com/";
        let (message, signed_xml) = signed_request(issuer);

        let spki = fedlink_crypto::pem_to_der(SP_PUB, "PUBLIC KEY").unwrap();
        let manager = InMemoryKeyManager::new().with_validating_key("10.0.0.7", spki);
        let mut config = ChainConfig::new(ProviderMode::IdentityProvider, "https://idp.example.com/");
        config.supports_signatures = true;
        config.key_manager = Some(Arc::new(manager));

        let context = HttpContext::new(HttpMethod::Post, "s1").with_remote_addr("10.0.0.7");

        // Off by default.
        let mut request = HandlerRequest::incoming(context.clone(), message.clone(), signed_xml.clone());
        assert!(SignatureValidationHandler::validate(&config, &mut request).is_err());

        config.allow_remote_address_key_fallback = true;
        let mut request = HandlerRequest::incoming(context, message, signed_xml);
        SignatureValidationHandler::validate(&config, &mut request).unwrap();
    }

    #[test]
    fn skipped_when_signatures_are_off() {
        let (message, xml) = signed_request("https://employee.example.com/");
        let config = ChainConfig::new(ProviderMode::IdentityProvider, "https://idp.example.com/");

        let mut request =
            HandlerRequest::incoming(HttpContext::new(HttpMethod::Post, "s1"), message, xml);
        SignatureValidationHandler::validate(&config, &mut request).unwrap();
    }
}
