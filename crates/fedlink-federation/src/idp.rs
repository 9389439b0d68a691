//! Identity provider processor.
//!
//! Drives the handler chain for incoming requests and logout response legs
//! on the IDP side. Processing failures are answered with a signed SAML
//! error response to the requesting provider instead of an opaque HTTP
//! failure, when the requester is known.

use std::sync::Arc;

use fedlink_protocol_saml::bindings::{
    DecodedMessage, HttpPostBinding, HttpRedirectBinding, SamlMessageType,
};
use fedlink_protocol_saml::signature::XmlSigner;
use fedlink_protocol_saml::{parse_message, response_to_xml, Response, Status};
use tracing::{debug, warn};

use crate::config::IdpConfig;
use crate::error::{FederationError, FederationResult};
use crate::handlers::{ChainConfig, HandlerChain, HandlerRequest, HandlerResponse, ProviderMode};
use crate::http::{HttpContext, HttpMethod};
use crate::identity_server::IdentityServer;
use crate::keys::TrustKeyManager;
use crate::roles::RoleGeneratorRegistry;
use crate::session::Principal;
use crate::sp::append_query;
use crate::sts::SecurityTokenService;

/// What the host application should do after IDP processing.
#[derive(Debug)]
pub enum IdpOutcome {
    /// Serve this auto-submitting HTML form.
    SendPost {
        /// Where the form posts to.
        destination: String,
        /// The form document.
        html: String,
    },
    /// Redirect the browser to this URL.
    Redirect {
        /// The full redirect URL.
        url: String,
    },
    /// Logout completed locally with no further leg to send.
    Complete,
}

/// SAML identity provider.
pub struct IdentityProvider {
    config: IdpConfig,
    chain: HandlerChain,
    server: Arc<IdentityServer>,
    key_manager: Arc<dyn TrustKeyManager>,
}

impl IdentityProvider {
    /// Creates an identity provider.
    ///
    /// The role generator named by the configuration must be registered.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown role generator, or when
    /// signatures are enabled without a signing key.
    pub fn new(
        config: IdpConfig,
        key_manager: Arc<dyn TrustKeyManager>,
        registry: &RoleGeneratorRegistry,
    ) -> FederationResult<Self> {
        if config.supports_signatures {
            key_manager.signing_key().map_err(|_| {
                FederationError::Configuration(
                    "signatures enabled but the key manager holds no signing key".to_string(),
                )
            })?;
        }

        let role_generator = registry.get(&config.role_generator)?;
        let server = Arc::new(IdentityServer::new());
        let sts = Arc::new(SecurityTokenService::new(
            &config.identity_url,
            config.token_validity_secs,
        ));

        let mut chain_config =
            ChainConfig::new(ProviderMode::IdentityProvider, &config.identity_url);
        chain_config.trusted_domains = config.trusted_domains.clone();
        chain_config.supports_signatures = config.supports_signatures;
        chain_config.binding = config.binding;
        chain_config.role_attribute = config.role_attribute.clone();
        chain_config.allow_remote_address_key_fallback = config.allow_remote_address_key_fallback;
        chain_config.key_manager = Some(key_manager.clone());
        chain_config.role_generator = Some(role_generator);
        chain_config.sts = Some(sts);
        chain_config.identity_server = Some(server.clone());

        Ok(Self {
            chain: HandlerChain::new(chain_config),
            config,
            server,
            key_manager,
        })
    }

    /// The participant registry, exposed for host-side inspection.
    #[must_use]
    pub fn server(&self) -> &IdentityServer {
        &self.server
    }

    /// Processes one HTTP request against the IDP state machine.
    ///
    /// `principal` is the user the host application has authenticated for
    /// this session, when any.
    ///
    /// # Errors
    ///
    /// Propagates the failure when no error response can be addressed, that
    /// is when the request has no Referer header.
    pub fn process(
        &self,
        context: &HttpContext,
        principal: Option<&Principal>,
    ) -> FederationResult<IdpOutcome> {
        let decoded = self.decode(context)?;
        let message = parse_message(&decoded.xml)?;
        debug!(id = %message.id(), issuer = %message.issuer(), "incoming message");

        let mut request = HandlerRequest::incoming(context.clone(), message, decoded.xml);
        request.relay_state = decoded.relay_state;
        request.options.principal = principal.cloned();
        request.options.existing_assertion_id = self.server.assertion_id(&context.session_id);

        self.chain.reset();
        match self.chain.handle(&mut request) {
            Ok(mut response) => self.render(&mut response),
            Err(err) => self.answer_with_error(context, &err),
        }
    }

    /// Builds a SAML error response for a failed exchange and sends it back
    /// to the referring provider over the binding the exchange arrived on.
    fn answer_with_error(
        &self,
        context: &HttpContext,
        err: &FederationError,
    ) -> FederationResult<IdpOutcome> {
        let Some(ref referer) = context.referer else {
            return Err(FederationError::Processing(format!(
                "cannot address an error response: {err}"
            )));
        };
        warn!(%err, referer, "answering failed exchange with an error response");

        let error_response = Response::error(
            &self.config.identity_url,
            Status::two_level(err.status_code(), err.sub_status_code()),
        )
        .with_destination(referer);
        let relay_state = context.relay_state();
        let xml = response_to_xml(&error_response);

        if context.method == HttpMethod::Get {
            if self.config.supports_signatures {
                let (key, certificate) = self.key_manager.signing_key_pair()?;
                let signer = XmlSigner::new(key, certificate);
                let signed_query = HttpRedirectBinding::signed_query(
                    &xml,
                    relay_state,
                    signer.algorithm().uri(),
                    SamlMessageType::Response,
                )?;
                let signature = signer.sign_redirect(&signed_query)?;
                return Ok(IdpOutcome::Redirect {
                    url: HttpRedirectBinding::finalize_signed(referer, &signed_query, &signature),
                });
            }
            return Ok(IdpOutcome::Redirect {
                url: HttpRedirectBinding::encode_response(&xml, referer, relay_state)?,
            });
        }

        let xml = if self.config.supports_signatures {
            let (key, certificate) = self.key_manager.signing_key_pair()?;
            XmlSigner::new(key, certificate).sign(&xml, &error_response.id)?
        } else {
            xml
        };
        Ok(IdpOutcome::SendPost {
            destination: referer.clone(),
            html: HttpPostBinding::encode_response(&xml, referer, relay_state),
        })
    }

    fn decode(&self, context: &HttpContext) -> FederationResult<DecodedMessage> {
        let decoded = match context.method {
            HttpMethod::Post => HttpPostBinding::decode(
                context.saml_request(),
                context.saml_response(),
                context.relay_state(),
            )?,
            HttpMethod::Get => HttpRedirectBinding::decode(
                context.saml_request(),
                context.saml_response(),
                context.relay_state(),
                context.signature(),
                context.sig_alg(),
            )?,
        };
        Ok(decoded)
    }

    fn render(&self, response: &mut HandlerResponse) -> FederationResult<IdpOutcome> {
        let Some(document) = response.take_document() else {
            // A logout leg can complete without producing a document, for
            // example while another leg is still in transit.
            return Ok(IdpOutcome::Complete);
        };
        let destination = response.destination.clone().ok_or_else(|| {
            FederationError::Processing("document has no destination".to_string())
        })?;
        let relay_state = response.relay_state.as_deref();
        let use_post = response
            .post_binding_override
            .unwrap_or(self.config.binding == fedlink_protocol_saml::SamlBinding::HttpPost);

        if use_post {
            let xml = response
                .signed_document
                .clone()
                .unwrap_or_else(|| document.to_xml());
            let html = if response.send_request {
                HttpPostBinding::encode_request(&xml, &destination, relay_state)
            } else {
                HttpPostBinding::encode_response(&xml, &destination, relay_state)
            };
            return Ok(IdpOutcome::SendPost { destination, html });
        }

        if let Some(ref query) = response.signed_query_string {
            return Ok(IdpOutcome::Redirect {
                url: append_query(&destination, query),
            });
        }

        let xml = document.to_xml();
        let url = if response.send_request {
            HttpRedirectBinding::encode_request(&xml, &destination, relay_state)?
        } else {
            HttpRedirectBinding::encode_response(&xml, &destination, relay_state)?
        };
        Ok(IdpOutcome::Redirect { url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::InMemoryKeyManager;
    use crate::roles::StaticRoleGenerator;
    use fedlink_protocol_saml::{authn_request_to_xml, AuthnRequest};

    const IDP: &str = "https://idp.example.com/idp/";
    const SP: &str = "https://employee.example.com/";

    fn registry() -> RoleGeneratorRegistry {
        let mut registry = RoleGeneratorRegistry::new();
        registry.register(
            "static",
            Arc::new(StaticRoleGenerator::new().with_default_roles(vec!["employee".to_string()])),
        );
        registry
    }

    fn idp() -> IdentityProvider {
        IdentityProvider::new(
            IdpConfig::new(IDP),
            Arc::new(InMemoryKeyManager::new()),
            &registry(),
        )
        .unwrap()
    }

    fn post_context(xml: &str, session: &str) -> HttpContext {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(xml);
        HttpContext::new(HttpMethod::Post, session).with_param("SAMLRequest", encoded)
    }

    #[test]
    fn authn_request_is_answered_with_a_posted_response() {
        let idp = idp();
        let authn = AuthnRequest::new(SP).with_acs_url(SP);
        let context = post_context(&authn_request_to_xml(&authn), "s1");

        let outcome = idp.process(&context, Some(&Principal::new("tomcat"))).unwrap();
        match outcome {
            IdpOutcome::SendPost { destination, html } => {
                assert_eq!(destination, SP);
                assert!(html.contains("SAMLResponse"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(idp.server().participant_count("s1"), 1);
    }

    #[test]
    fn unauthenticated_request_with_referer_gets_an_error_response() {
        let idp = idp();
        let authn = AuthnRequest::new(SP).with_acs_url(SP);
        let context = post_context(&authn_request_to_xml(&authn), "s1").with_referer(SP);

        let outcome = idp.process(&context, None).unwrap();
        match outcome {
            IdpOutcome::SendPost { destination, html } => {
                assert_eq!(destination, SP);
                assert!(html.contains("SAMLResponse"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    fn redirect_context(xml: &str, session: &str) -> HttpContext {
        let url = HttpRedirectBinding::encode_request(xml, "https://unused.example.com/", None)
            .unwrap();
        let query = url.split_once('?').unwrap().1;
        let encoded = query.strip_prefix("SAMLRequest=").unwrap();
        let decoded = urlencoding::decode(encoded).unwrap().into_owned();
        HttpContext::new(HttpMethod::Get, session).with_param("SAMLRequest", decoded)
    }

    #[test]
    fn error_answer_follows_the_request_binding() {
        let idp = idp();
        let authn = AuthnRequest::new(SP).with_acs_url(SP);
        let context = redirect_context(&authn_request_to_xml(&authn), "s1").with_referer(SP);

        // No principal: the exchange fails and the error response must go
        // back over the redirect binding it arrived on.
        match idp.process(&context, None).unwrap() {
            IdpOutcome::Redirect { url } => {
                assert!(url.starts_with(SP));
                assert!(url.contains("SAMLResponse="));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn unauthenticated_request_without_referer_fails() {
        let idp = idp();
        let authn = AuthnRequest::new(SP);
        let context = post_context(&authn_request_to_xml(&authn), "s1");

        assert!(idp.process(&context, None).is_err());
    }

    #[test]
    fn unknown_role_generator_is_a_configuration_error() {
        let mut config = IdpConfig::new(IDP);
        config.role_generator = "ldap".to_string();

        let result = IdentityProvider::new(
            config,
            Arc::new(InMemoryKeyManager::new()),
            &registry(),
        );
        assert!(matches!(result, Err(FederationError::Configuration(_))));
    }
}
