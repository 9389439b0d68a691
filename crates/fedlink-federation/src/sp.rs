//! Service provider processor.
//!
//! Glues the handler chain to the host application's HTTP layer on the SP
//! side. The host maps each request onto an `HttpContext`, calls `process`,
//! and renders the returned outcome.

use std::sync::Arc;

use fedlink_protocol_saml::bindings::{DecodedMessage, HttpPostBinding, HttpRedirectBinding};
use fedlink_protocol_saml::{parse_message, SamlMessage};
use tracing::{debug, info, warn};

use crate::config::SpConfig;
use crate::error::{FederationError, FederationResult};
use crate::handlers::{
    ChainConfig, GenerateKind, HandlerChain, HandlerRequest, HandlerResponse, ProviderMode,
};
use crate::http::{HttpContext, HttpMethod};
use crate::keys::TrustKeyManager;
use crate::session::{Principal, SessionStore};

/// What the host application should do after processing a request.
#[derive(Debug)]
pub enum SpOutcome {
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
    /// The user is authenticated; serve the protected resource.
    Authenticated {
        /// The authenticated principal.
        principal: Principal,
    },
    /// The local session has been terminated.
    LoggedOut,
}

/// SAML service provider.
pub struct ServiceProvider {
    config: SpConfig,
    chain: HandlerChain,
    sessions: Arc<dyn SessionStore>,
    key_manager: Arc<dyn TrustKeyManager>,
}

impl ServiceProvider {
    /// Creates a service provider.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when signatures are enabled but the
    /// key manager holds no signing key.
    pub fn new(
        config: SpConfig,
        sessions: Arc<dyn SessionStore>,
        key_manager: Arc<dyn TrustKeyManager>,
    ) -> FederationResult<Self> {
        if config.supports_signatures {
            key_manager.signing_key().map_err(|_| {
                FederationError::Configuration(
                    "signatures enabled but the key manager holds no signing key".to_string(),
                )
            })?;
        }

        let mut chain_config = ChainConfig::new(ProviderMode::ServiceProvider, &config.service_url);
        chain_config.trusted_domains = config.trusted_domains.clone();
        chain_config.supports_signatures = config.supports_signatures;
        chain_config.binding = config.binding;
        chain_config.role_attribute = config.role_attribute.clone();
        chain_config.allow_remote_address_key_fallback = config.allow_remote_address_key_fallback;
        chain_config.expected_issuer = Some(config.identity_url.clone());
        chain_config.key_manager = Some(key_manager.clone());

        Ok(Self {
            chain: HandlerChain::new(chain_config),
            config,
            sessions,
            key_manager,
        })
    }

    /// Processes one HTTP request against the SP state machine.
    ///
    /// # Errors
    ///
    /// Returns an error when an incoming message fails validation. An
    /// expired assertion is not an error at this level; it restarts the
    /// exchange with a fresh authentication request.
    pub fn process(&self, context: &HttpContext) -> FederationResult<SpOutcome> {
        if context.saml_request().is_some() {
            self.process_incoming_request(context)
        } else if context.saml_response().is_some() {
            match self.process_incoming_response(context) {
                Err(err) if err.is_assertion_expired() => {
                    info!("assertion expired, restarting authentication");
                    let mut session = self.sessions.get_or_create(&context.session_id);
                    session.principal = None;
                    session.clear_exchange();
                    self.sessions.save(session);
                    self.start_exchange(context, GenerateKind::Authentication)
                }
                other => other,
            }
        } else {
            self.serve(context)
        }
    }

    /// Entry point for requests without a SAML payload.
    fn serve(&self, context: &HttpContext) -> FederationResult<SpOutcome> {
        let session = self.sessions.get_or_create(&context.session_id);

        if context.is_local_logout() {
            self.sessions.remove(&context.session_id);
            return Ok(SpOutcome::LoggedOut);
        }

        match session.principal {
            Some(ref principal) if !context.is_global_logout() => Ok(SpOutcome::Authenticated {
                principal: principal.clone(),
            }),
            Some(_) => self.start_exchange(context, GenerateKind::Logout),
            None => self.start_exchange(context, GenerateKind::Authentication),
        }
    }

    fn start_exchange(
        &self,
        context: &HttpContext,
        kind: GenerateKind,
    ) -> FederationResult<SpOutcome> {
        let mut session = self.sessions.get_or_create(&context.session_id);

        let destination = match kind {
            GenerateKind::Authentication => self.config.identity_url.clone(),
            GenerateKind::Logout => self.config.logout_endpoint().to_string(),
        };

        let mut request = HandlerRequest::generate(context.clone(), kind, destination);
        request.relay_state = context.relay_state().map(str::to_string);
        request.options.principal = session.principal.clone();
        request.options.existing_assertion_id = session.assertion_id.clone();

        self.chain.reset();
        let mut response = self.chain.generate(&mut request)?;

        if let Some(document) = response.document() {
            session.exchange.pending_request_id = Some(document.id().to_string());
            session.exchange.relay_state = request.relay_state.clone();
            self.sessions.save(session);
        }

        self.render(&mut response)
    }

    /// Handles a LogoutRequest arriving from the identity provider.
    fn process_incoming_request(&self, context: &HttpContext) -> FederationResult<SpOutcome> {
        let decoded = self.decode(context)?;
        let message = parse_message(&decoded.xml)?;
        debug!(id = %message.id(), issuer = %message.issuer(), "incoming request");

        let mut request = HandlerRequest::incoming(context.clone(), message, decoded.xml);
        request.relay_state = decoded.relay_state;

        self.chain.reset();
        let mut response = self.chain.handle(&mut request)?;

        if response.session_invalidated {
            self.sessions.remove(&context.session_id);
        }
        self.render(&mut response)
    }

    /// Handles a Response or LogoutResponse arriving from the identity
    /// provider.
    fn process_incoming_response(&self, context: &HttpContext) -> FederationResult<SpOutcome> {
        let decoded = self.decode(context)?;
        let message = parse_message(&decoded.xml)?;
        debug!(id = %message.id(), issuer = %message.issuer(), "incoming response");

        let mut request = HandlerRequest::incoming(context.clone(), message, decoded.xml);
        request.relay_state = decoded.relay_state;
        request.options.decrypting_key = self.key_manager.signing_key().ok();

        self.chain.reset();
        let response = self.chain.handle(&mut request)?;

        if response.session_invalidated {
            self.sessions.remove(&context.session_id);
            return Ok(SpOutcome::LoggedOut);
        }

        let principal = response.principal.ok_or_else(|| {
            FederationError::Processing("response established no principal".to_string())
        })?;

        let mut session = self.sessions.get_or_create(&context.session_id);

        // The verified message, post signature validation.
        if let Some(SamlMessage::Response(ref verified)) = request.message {
            if let (Some(pending), Some(in_response_to)) = (
                session.exchange.pending_request_id.as_deref(),
                verified.in_response_to.as_deref(),
            ) {
                if pending != in_response_to {
                    warn!(pending, in_response_to, "response answers an unknown request");
                    return Err(FederationError::Processing(
                        "response does not answer the pending request".to_string(),
                    ));
                }
            }
            session.assertion_id = verified.first_assertion().map(|a| a.id.clone());
        }

        info!(principal = %principal.name, "session authenticated");
        session.principal = Some(principal.clone());
        session.clear_exchange();
        self.sessions.save(session);

        Ok(SpOutcome::Authenticated { principal })
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

    fn render(&self, response: &mut HandlerResponse) -> FederationResult<SpOutcome> {
        let document = response.take_document().ok_or_else(|| {
            FederationError::Processing("traversal produced no document".to_string())
        })?;
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
            return Ok(SpOutcome::SendPost { destination, html });
        }

        if let Some(ref query) = response.signed_query_string {
            return Ok(SpOutcome::Redirect {
                url: append_query(&destination, query),
            });
        }

        let xml = document.to_xml();
        let url = if response.send_request {
            HttpRedirectBinding::encode_request(&xml, &destination, relay_state)?
        } else {
            HttpRedirectBinding::encode_response(&xml, &destination, relay_state)?
        };
        Ok(SpOutcome::Redirect { url })
    }
}

pub(crate) fn append_query(destination: &str, query: &str) -> String {
    let separator = if destination.contains('?') { '&' } else { '?' };
    format!("{destination}{separator}{query}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::InMemoryKeyManager;
    use crate::session::InMemorySessionStore;
    use fedlink_protocol_saml::SamlBinding;

    const IDP: &str = "https://idp.example.com/idp/";
    const SP: &str = "https://employee.example.com/";

    fn provider(binding: SamlBinding) -> ServiceProvider {
        let mut config = SpConfig::new(SP, IDP);
        config.binding = binding;
        ServiceProvider::new(
            config,
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryKeyManager::new()),
        )
        .unwrap()
    }

    #[test]
    fn unauthenticated_visit_starts_sso_over_post() {
        let sp = provider(SamlBinding::HttpPost);
        let context = HttpContext::new(HttpMethod::Get, "s1");

        match sp.process(&context).unwrap() {
            SpOutcome::SendPost { destination, html } => {
                assert_eq!(destination, IDP);
                assert!(html.contains("SAMLRequest"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let session = sp.sessions.get("s1").unwrap();
        assert!(session.exchange.pending_request_id.is_some());
    }

    #[test]
    fn unauthenticated_visit_starts_sso_over_redirect() {
        let sp = provider(SamlBinding::HttpRedirect);
        let context = HttpContext::new(HttpMethod::Get, "s1");

        match sp.process(&context).unwrap() {
            SpOutcome::Redirect { url } => {
                assert!(url.starts_with(IDP));
                assert!(url.contains("SAMLRequest="));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn signatures_require_a_signing_key() {
        let mut config = SpConfig::new(SP, IDP);
        config.supports_signatures = true;

        let result = ServiceProvider::new(
            config,
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryKeyManager::new()),
        );
        assert!(matches!(result, Err(FederationError::Configuration(_))));
    }

    #[test]
    fn local_logout_skips_the_protocol() {
        let sp = provider(SamlBinding::HttpPost);

        let mut session = sp.sessions.get_or_create("s1");
        session.principal = Some(Principal::new("tomcat"));
        sp.sessions.save(session);

        let context = HttpContext::new(HttpMethod::Get, "s1").with_param("LLO", "true");
        match sp.process(&context).unwrap() {
            SpOutcome::LoggedOut => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(sp.sessions.get("s1").is_none());
    }

    #[test]
    fn global_logout_sends_a_logout_request() {
        let sp = provider(SamlBinding::HttpPost);

        let mut session = sp.sessions.get_or_create("s1");
        session.principal = Some(Principal::new("tomcat"));
        sp.sessions.save(session);

        let context = HttpContext::new(HttpMethod::Get, "s1").with_param("GLO", "true");
        match sp.process(&context).unwrap() {
            SpOutcome::SendPost { destination, html } => {
                assert_eq!(destination, IDP);
                assert!(html.contains("SAMLRequest"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn authenticated_visit_serves_the_resource() {
        let sp = provider(SamlBinding::HttpPost);

        let mut session = sp.sessions.get_or_create("s1");
        session.principal = Some(Principal::new("tomcat"));
        sp.sessions.save(session);

        let context = HttpContext::new(HttpMethod::Get, "s1");
        match sp.process(&context).unwrap() {
            SpOutcome::Authenticated { principal } => assert_eq!(principal.name, "tomcat"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn repeated_visits_generate_fresh_exchanges() {
        let sp = provider(SamlBinding::HttpPost);
        let context = HttpContext::new(HttpMethod::Get, "s1");

        let _ = sp.process(&context).unwrap();
        let first = sp.sessions.get("s1").unwrap().exchange.pending_request_id.unwrap();
        let _ = sp.process(&context).unwrap();
        let second = sp.sessions.get("s1").unwrap().exchange.pending_request_id.unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn append_query_handles_existing_queries() {
        assert_eq!(append_query("https://x/", "a=1"), "https://x/?a=1");
        assert_eq!(append_query("https://x/?b=2", "a=1"), "https://x/?b=2&a=1");
    }
}
