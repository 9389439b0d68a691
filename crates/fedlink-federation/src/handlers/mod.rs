//! SAML handler chain.
//!
//! Every protocol exchange is processed by a fixed chain of handlers, each
//! owning one concern. A traversal is one of three entry points: generating
//! an outgoing request, handling an incoming request, or handling an
//! incoming status response. Exactly one handler per traversal may set the
//! resulting document; the chain rejects a second writer.

mod authentication;
mod issuer_trust;
mod logout;
mod roles_generation;
mod signature_generation;
mod signature_validation;

pub use authentication::AuthenticationHandler;
pub use issuer_trust::IssuerTrustHandler;
pub use logout::LogOutHandler;
pub use roles_generation::RolesGenerationHandler;
pub use signature_generation::SignatureGenerationHandler;
pub use signature_validation::SignatureValidationHandler;

use std::sync::{Arc, Mutex};

use fedlink_protocol_saml::{SamlBinding, SamlMessage};

use crate::error::{FederationError, FederationResult};
use crate::http::HttpContext;
use crate::identity_server::IdentityServer;
use crate::keys::TrustKeyManager;
use crate::roles::RoleGenerator;
use crate::session::Principal;
use crate::sts::SecurityTokenService;

/// Which side of the federation the chain runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    /// Service provider.
    ServiceProvider,
    /// Identity provider.
    IdentityProvider,
}

/// Immutable configuration shared by all handlers of one chain.
#[derive(Clone)]
pub struct ChainConfig {
    /// Provider mode.
    pub mode: ProviderMode,
    /// This provider's entity ID.
    pub issuer: String,
    /// Issuer domains to trust. Empty trusts all.
    pub trusted_domains: Vec<String>,
    /// Whether documents are signed and incoming signatures validated.
    pub supports_signatures: bool,
    /// Default outgoing binding.
    pub binding: SamlBinding,
    /// Attribute name carrying roles.
    pub role_attribute: String,
    /// Resolve validating keys by remote address when the issuer host has
    /// none. Off by default.
    pub allow_remote_address_key_fallback: bool,
    /// Issuer an SP expects responses from, when pinned.
    pub expected_issuer: Option<String>,
    /// Key material, required when signatures are enabled.
    pub key_manager: Option<Arc<dyn TrustKeyManager>>,
    /// Role generator, IDP side.
    pub role_generator: Option<Arc<dyn RoleGenerator>>,
    /// Token service, IDP side.
    pub sts: Option<Arc<SecurityTokenService>>,
    /// Participant registry, IDP side.
    pub identity_server: Option<Arc<IdentityServer>>,
}

impl ChainConfig {
    /// Creates a minimal config for the given mode and issuer.
    #[must_use]
    pub fn new(mode: ProviderMode, issuer: impl Into<String>) -> Self {
        Self {
            mode,
            issuer: issuer.into(),
            trusted_domains: Vec::new(),
            supports_signatures: false,
            binding: SamlBinding::default(),
            role_attribute: "Role".to_string(),
            allow_remote_address_key_fallback: false,
            expected_issuer: None,
            key_manager: None,
            role_generator: None,
            sts: None,
            identity_server: None,
        }
    }

    /// Checks an incoming message's Destination against this provider's
    /// URL. Enforced when signatures are on; a missing Destination passes,
    /// a present one must name this provider.
    pub(crate) fn check_destination(&self, destination: Option<&str>) -> FederationResult<()> {
        if !self.supports_signatures {
            return Ok(());
        }
        match destination {
            Some(destination) if destination != self.issuer => {
                Err(FederationError::DestinationMismatch {
                    expected: self.issuer.clone(),
                    destination: destination.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Kind of document to generate on the outgoing path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateKind {
    /// An AuthnRequest starting SSO.
    Authentication,
    /// A LogoutRequest starting single logout.
    Logout,
}

/// Per-traversal inputs resolved by the caller rather than by handlers.
#[derive(Default)]
pub struct RequestOptions {
    /// Validating key for the sender, when already resolved.
    pub sender_public_key: Option<Vec<u8>>,
    /// Private key for decrypting `EncryptedAssertion` elements.
    pub decrypting_key: Option<Vec<u8>>,
    /// Assertion ID to reuse when re-issuing within a session.
    pub existing_assertion_id: Option<String>,
    /// The authenticated principal, IDP side.
    pub principal: Option<Principal>,
    /// Whether this traversal is part of a global logout.
    pub global_logout: bool,
}

/// Mutable state of one chain traversal.
pub struct HandlerRequest {
    /// The HTTP request being served.
    pub context: HttpContext,
    /// The incoming message, replaced by the signature validation handler
    /// with the verified copy.
    pub message: Option<SamlMessage>,
    /// The incoming document bytes, exactly as decoded from the binding.
    pub raw_xml: Option<String>,
    /// Relay state accompanying the message.
    pub relay_state: Option<String>,
    /// Destination for a generated document.
    pub destination: Option<String>,
    /// What to generate, on the outgoing path.
    pub generate_kind: Option<GenerateKind>,
    /// Caller-resolved inputs.
    pub options: RequestOptions,
}

impl HandlerRequest {
    /// Builds a traversal that generates an outgoing document.
    #[must_use]
    pub fn generate(context: HttpContext, kind: GenerateKind, destination: impl Into<String>) -> Self {
        Self {
            context,
            message: None,
            raw_xml: None,
            relay_state: None,
            destination: Some(destination.into()),
            generate_kind: Some(kind),
            options: RequestOptions::default(),
        }
    }

    /// Builds a traversal over an incoming document.
    #[must_use]
    pub fn incoming(context: HttpContext, message: SamlMessage, raw_xml: String) -> Self {
        Self {
            context,
            message: Some(message),
            raw_xml: Some(raw_xml),
            relay_state: None,
            destination: None,
            generate_kind: None,
            options: RequestOptions::default(),
        }
    }

    /// The incoming message, or a processing error when absent.
    pub fn message(&self) -> FederationResult<&SamlMessage> {
        self.message
            .as_ref()
            .ok_or_else(|| FederationError::Processing("traversal carries no message".to_string()))
    }
}

/// Accumulated output of one chain traversal.
#[derive(Debug, Default)]
pub struct HandlerResponse {
    resulting_document: Option<SamlMessage>,
    /// The resulting document serialized and signed, when signatures are on
    /// and the POST binding applies.
    pub signed_document: Option<String>,
    /// Where to send the resulting document.
    pub destination: Option<String>,
    /// Relay state to carry along.
    pub relay_state: Option<String>,
    /// Roles granted during this traversal.
    pub roles: Vec<String>,
    /// True when the resulting document is a request to another provider.
    pub send_request: bool,
    /// Binding override for the resulting document, from participant
    /// bookkeeping. None falls back to the configured binding.
    pub post_binding_override: Option<bool>,
    /// Full query string including the detached signature, redirect binding.
    pub signed_query_string: Option<String>,
    /// Principal established by this traversal, SP side.
    pub principal: Option<Principal>,
    /// True when the local session must be invalidated.
    pub session_invalidated: bool,
}

impl HandlerResponse {
    /// Sets the resulting document.
    ///
    /// # Errors
    ///
    /// Returns `DocumentAlreadySet` when another handler already produced
    /// one in this traversal.
    pub fn set_document(
        &mut self,
        handler: &'static str,
        document: SamlMessage,
    ) -> FederationResult<()> {
        if self.resulting_document.is_some() {
            return Err(FederationError::DocumentAlreadySet(handler));
        }
        self.resulting_document = Some(document);
        Ok(())
    }

    /// The resulting document, if any handler produced one.
    #[must_use]
    pub fn document(&self) -> Option<&SamlMessage> {
        self.resulting_document.as_ref()
    }

    /// Mutable access for handlers that enrich the document in place.
    pub fn document_mut(&mut self) -> Option<&mut SamlMessage> {
        self.resulting_document.as_mut()
    }

    /// Takes the resulting document out of the response.
    #[must_use]
    pub fn take_document(&mut self) -> Option<SamlMessage> {
        self.resulting_document.take()
    }
}

/// One processing stage of the chain.
///
/// Default implementations are no-ops so each handler only overrides the
/// entry points it participates in.
pub trait Saml2Handler: Send + Sync {
    /// Stable handler name, used in errors.
    fn name(&self) -> &'static str;

    /// Outgoing path: contribute to a generated document.
    fn generate_request(
        &self,
        config: &ChainConfig,
        request: &mut HandlerRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        let _ = (config, request, response);
        Ok(())
    }

    /// Incoming path: process a request message.
    fn handle_request_type(
        &self,
        config: &ChainConfig,
        request: &mut HandlerRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        let _ = (config, request, response);
        Ok(())
    }

    /// Incoming path: process a status response message.
    fn handle_status_response_type(
        &self,
        config: &ChainConfig,
        request: &mut HandlerRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        let _ = (config, request, response);
        Ok(())
    }

    /// Clears any state cached across traversals.
    fn reset(&self) {}
}

/// A configured chain of handlers.
pub struct HandlerChain {
    config: ChainConfig,
    handlers: Vec<Box<dyn Saml2Handler>>,
    traversal: Mutex<()>,
}

impl HandlerChain {
    /// Builds the canonical chain for the given configuration.
    #[must_use]
    pub fn new(config: ChainConfig) -> Self {
        Self::with_handlers(
            config,
            vec![
                Box::new(IssuerTrustHandler::new()),
                Box::new(SignatureValidationHandler::new()),
                Box::new(AuthenticationHandler::new()),
                Box::new(RolesGenerationHandler::new()),
                Box::new(LogOutHandler::new()),
                Box::new(SignatureGenerationHandler::new()),
            ],
        )
    }

    /// Builds a chain with an explicit handler list, for hosts that insert
    /// custom stages.
    #[must_use]
    pub fn with_handlers(config: ChainConfig, handlers: Vec<Box<dyn Saml2Handler>>) -> Self {
        Self {
            config,
            handlers,
            traversal: Mutex::new(()),
        }
    }

    /// The chain configuration.
    #[must_use]
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Runs the outgoing path over every handler.
    ///
    /// # Errors
    ///
    /// Propagates the first handler failure.
    pub fn generate(&self, request: &mut HandlerRequest) -> FederationResult<HandlerResponse> {
        self.traverse(request, |handler, config, request, response| {
            handler.generate_request(config, request, response)
        })
    }

    /// Runs the incoming path, dispatching on the message kind.
    ///
    /// # Errors
    ///
    /// Fails when the traversal carries no message, and propagates the
    /// first handler failure.
    pub fn handle(&self, request: &mut HandlerRequest) -> FederationResult<HandlerResponse> {
        let is_request = request.message()?.is_request();
        if is_request {
            self.traverse(request, |handler, config, request, response| {
                handler.handle_request_type(config, request, response)
            })
        } else {
            self.traverse(request, |handler, config, request, response| {
                handler.handle_status_response_type(config, request, response)
            })
        }
    }

    /// Clears handler state cached across traversals.
    pub fn reset(&self) {
        for handler in &self.handlers {
            handler.reset();
        }
    }

    fn traverse<F>(&self, request: &mut HandlerRequest, entry: F) -> FederationResult<HandlerResponse>
    where
        F: Fn(
            &dyn Saml2Handler,
            &ChainConfig,
            &mut HandlerRequest,
            &mut HandlerResponse,
        ) -> FederationResult<()>,
    {
        // One traversal at a time per chain.
        let _guard = self.traversal.lock().unwrap_or_else(|e| e.into_inner());

        let mut response = HandlerResponse {
            relay_state: request.relay_state.clone(),
            ..HandlerResponse::default()
        };

        for handler in &self.handlers {
            entry(handler.as_ref(), &self.config, request, &mut response)?;
        }
        Ok(response)
    }
}
