//! Single logout, fifth stage of the chain.

use chrono::Utc;
use fedlink_protocol_saml::{
    LogoutRequest, NameId, SamlError, SamlMessage, StatusResponse,
};
use tracing::{debug, info};

use crate::error::{FederationError, FederationResult};
use crate::handlers::{ChainConfig, GenerateKind, HandlerRequest, HandlerResponse, Saml2Handler};
use crate::identity_server::IdentityServer;

/// Drives single logout on both sides of the federation.
///
/// The IDP fans logout out over its participant stack one provider at a
/// time: each LogoutRequest it forwards is marked in transit until the
/// provider's LogoutResponse comes back, and the session is destroyed only
/// when no participants remain and nothing is in transit. The provider
/// that started the logout is answered last.
#[derive(Debug, Default)]
pub struct LogOutHandler;

impl LogOutHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn server(config: &ChainConfig) -> FederationResult<&IdentityServer> {
        config.identity_server.as_deref().ok_or_else(|| {
            FederationError::Configuration(
                "logout processing needs an identity server".to_string(),
            )
        })
    }

    /// Sends the next logout leg, or closes the session when the stack is
    /// drained and nothing is in transit.
    fn advance(
        &self,
        config: &ChainConfig,
        session_id: &str,
        name_id: Option<NameId>,
        session_index: Option<String>,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        let server = Self::server(config)?;

        if let Some(next) = server.pop_participant(session_id) {
            server.register_in_transit(session_id, &next);

            let mut logout = LogoutRequest::new(&config.issuer).with_destination(&next);
            if let Some(name_id) = name_id {
                logout = logout.with_name_id(name_id);
            }
            if let Some(index) = session_index {
                logout = logout.with_session_index(index);
            }
            if let Some(ref sts) = config.sts {
                logout = logout.not_on_or_after(Utc::now() + sts.token_validity());
            }

            debug!(participant = %next, "forwarding logout request");
            response.post_binding_override = Some(server.uses_post_binding(session_id, &next));
            response.destination = Some(next);
            response.send_request = true;
            return response.set_document(self.name(), SamlMessage::LogoutRequest(logout));
        }

        if server.in_transit_count(session_id) > 0 {
            // A response leg is still outstanding; it will advance the
            // logout when it arrives.
            return Ok(());
        }

        let (requester, request_id) = server
            .take_original_requester(session_id)
            .ok_or_else(|| FederationError::Session("logout has no original requester".to_string()))?;

        if let Some(assertion_id) = server.assertion_id(session_id) {
            if let Some(ref sts) = config.sts {
                sts.cancel(&assertion_id);
            }
        }

        response.post_binding_override = Some(server.uses_post_binding(session_id, &requester));
        server.session_destroyed(session_id);
        response.session_invalidated = true;

        info!(requester = %requester, "logout complete, answering original requester");
        let status = StatusResponse::logout_success(&config.issuer)
            .in_response_to(request_id)
            .with_destination(&requester);
        response.destination = Some(requester);
        response.set_document(self.name(), SamlMessage::LogoutResponse(status))
    }

    fn handle_idp_logout_request(
        &self,
        config: &ChainConfig,
        request: &HandlerRequest,
        logout: &LogoutRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        if logout.is_expired(Utc::now()) {
            return Err(SamlError::InvalidRequest("logout request expired".to_string()).into());
        }

        let server = Self::server(config)?;
        let session_id = &request.context.session_id;

        server.set_original_requester(session_id, &logout.issuer, &logout.id);
        server.remove_participant(session_id, &logout.issuer);

        self.advance(
            config,
            session_id,
            logout.name_id.clone(),
            logout.session_index.clone(),
            response,
        )
    }

    fn handle_sp_logout_request(
        &self,
        config: &ChainConfig,
        logout: &LogoutRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        config.check_destination(logout.destination.as_deref())?;

        info!(issuer = %logout.issuer, "logging out on identity provider request");
        response.session_invalidated = true;

        let status = StatusResponse::logout_success(&config.issuer)
            .in_response_to(&logout.id)
            .with_destination(&logout.issuer);
        response.destination = Some(logout.issuer.clone());
        response.set_document(self.name(), SamlMessage::LogoutResponse(status))
    }
}

impl Saml2Handler for LogOutHandler {
    fn name(&self) -> &'static str {
        "logout"
    }

    fn generate_request(
        &self,
        config: &ChainConfig,
        request: &mut HandlerRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        if request.generate_kind != Some(GenerateKind::Logout) {
            return Ok(());
        }

        let destination = request.destination.clone().ok_or_else(|| {
            FederationError::Configuration("logout request needs a destination".to_string())
        })?;

        let mut logout = LogoutRequest::new(&config.issuer).with_destination(&destination);
        if let Some(ref principal) = request.options.principal {
            logout = logout.with_name_id(NameId::new(&principal.name));
        }
        if let Some(ref assertion_id) = request.options.existing_assertion_id {
            logout = logout.with_session_index(assertion_id);
        }

        debug!(id = %logout.id, destination, "generated logout request");
        response.destination = Some(destination);
        response.send_request = true;
        response.set_document(self.name(), SamlMessage::LogoutRequest(logout))
    }

    fn handle_request_type(
        &self,
        config: &ChainConfig,
        request: &mut HandlerRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        let logout = match request.message()? {
            SamlMessage::LogoutRequest(r) => r.clone(),
            _ => return Ok(()),
        };
        logout.validate()?;

        match config.mode {
            crate::handlers::ProviderMode::IdentityProvider => {
                self.handle_idp_logout_request(config, request, &logout, response)
            }
            crate::handlers::ProviderMode::ServiceProvider => {
                self.handle_sp_logout_request(config, &logout, response)
            }
        }
    }

    fn handle_status_response_type(
        &self,
        config: &ChainConfig,
        request: &mut HandlerRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        let status = match request.message()? {
            SamlMessage::LogoutResponse(r) => r.clone(),
            _ => return Ok(()),
        };

        match config.mode {
            crate::handlers::ProviderMode::IdentityProvider => {
                let server = Self::server(config)?;
                let session_id = &request.context.session_id;

                if !status.is_success() {
                    // A failed leg still counts as answered; logout keeps
                    // going so one broken provider cannot wedge the session.
                    debug!(issuer = %status.issuer, "participant reported logout failure");
                }
                server.deregister_in_transit(session_id, &status.issuer);

                self.advance(config, session_id, None, None, response)
            }
            crate::handlers::ProviderMode::ServiceProvider => {
                if status.is_success() {
                    response.session_invalidated = true;
                }
                Ok(())
            }
        }
    }
}
