//! Authentication exchange, third stage of the chain.

use chrono::Utc;
use fedlink_protocol_saml::encryption::decrypt_assertion;
use fedlink_protocol_saml::{
    Assertion, AuthnRequest, Response, SamlBinding, SamlError, SamlMessage,
};
use tracing::{debug, info};

use crate::error::{FederationError, FederationResult};
use crate::handlers::{ChainConfig, GenerateKind, HandlerRequest, HandlerResponse, Saml2Handler};
use crate::session::Principal;
use crate::sts::IssueRequest;

/// Drives the SSO exchange.
///
/// On the SP it generates AuthnRequests and consumes Responses; on the IDP
/// it answers AuthnRequests with an assertion-bearing Response and records
/// the requester as a session participant.
#[derive(Debug, Default)]
pub struct AuthenticationHandler;

impl AuthenticationHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn consume_response(
        config: &ChainConfig,
        request: &mut HandlerRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        let saml_response = match request.message()? {
            SamlMessage::Response(r) => r.clone(),
            _ => return Ok(()),
        };

        config.check_destination(saml_response.destination.as_deref())?;

        if let Some(ref expected) = config.expected_issuer {
            if saml_response.issuer != *expected {
                return Err(SamlError::InvalidIssuer {
                    expected: expected.clone(),
                    actual: saml_response.issuer.clone(),
                }
                .into());
            }
        }

        if !saml_response.is_success() {
            return Err(FederationError::Processing(format!(
                "identity provider reported {}",
                saml_response.status.status_code.value
            )));
        }

        let assertion = Self::extract_assertion(&saml_response, request)?;
        assertion.validate(&config.issuer, Utc::now())?;

        let name = assertion.principal_name().ok_or_else(|| {
            FederationError::Processing("assertion carries no subject".to_string())
        })?;
        let principal =
            Principal::new(name).with_roles(assertion.roles(&config.role_attribute));

        info!(principal = %principal.name, "authentication response accepted");
        response.roles = principal.roles.clone();
        response.principal = Some(principal);
        Ok(())
    }

    fn extract_assertion(
        saml_response: &Response,
        request: &HandlerRequest,
    ) -> FederationResult<Assertion> {
        if let Some(assertion) = saml_response.first_assertion() {
            return Ok(assertion.clone());
        }

        if let Some(encrypted) = saml_response.encrypted_assertions.first() {
            let key = request.options.decrypting_key.as_deref().ok_or_else(|| {
                FederationError::Configuration(
                    "encrypted assertion received without a decryption key".to_string(),
                )
            })?;
            let xml = decrypt_assertion(encrypted, key)?;
            let parsed = fedlink_protocol_saml::xml::parse_assertion_document(&xml)?;
            return Ok(parsed);
        }

        Err(FederationError::Saml(SamlError::MissingElement(
            "Assertion".to_string(),
        )))
    }
}

impl Saml2Handler for AuthenticationHandler {
    fn name(&self) -> &'static str {
        "authentication"
    }

    fn generate_request(
        &self,
        config: &ChainConfig,
        request: &mut HandlerRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        if request.generate_kind != Some(GenerateKind::Authentication) {
            return Ok(());
        }

        let destination = request.destination.clone().ok_or_else(|| {
            FederationError::Configuration("authentication request needs a destination".to_string())
        })?;

        let authn = AuthnRequest::new(&config.issuer)
            .with_destination(&destination)
            .with_acs_url(&config.issuer)
            .with_binding(config.binding);

        debug!(id = %authn.id, destination, "generated authentication request");
        response.destination = Some(destination);
        response.send_request = true;
        response.set_document(self.name(), SamlMessage::AuthnRequest(authn))
    }

    fn handle_request_type(
        &self,
        config: &ChainConfig,
        request: &mut HandlerRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        let authn = match request.message()? {
            SamlMessage::AuthnRequest(r) => r.clone(),
            _ => return Ok(()),
        };
        authn.validate()?;

        let principal = request.options.principal.clone().ok_or_else(|| {
            FederationError::Processing("no authenticated principal for this session".to_string())
        })?;
        let sts = config.sts.as_ref().ok_or_else(|| {
            FederationError::Configuration("identity provider has no token service".to_string())
        })?;

        let recipient = authn
            .assertion_consumer_service_url
            .clone()
            .unwrap_or_else(|| authn.issuer.clone());

        let assertion = sts.issue(&IssueRequest {
            principal: &principal,
            audience: &authn.issuer,
            in_response_to: &authn.id,
            recipient: &recipient,
            existing_assertion_id: request.options.existing_assertion_id.as_deref(),
        });

        if let Some(ref server) = config.identity_server {
            let session = &request.context.session_id;
            let post_binding =
                authn.parsed_binding().unwrap_or(config.binding) == SamlBinding::HttpPost;
            server.session_created(session);
            server.register(session, &authn.issuer, post_binding);
            server.set_assertion_id(session, &assertion.id);
        }

        info!(
            requester = %authn.issuer,
            assertion = %assertion.id,
            "issued assertion"
        );

        let doc = Response::success(&config.issuer)
            .in_response_to(&authn.id)
            .with_destination(&recipient)
            .with_assertion(assertion);

        response.destination = Some(recipient);
        response.principal = Some(principal);
        response.set_document(self.name(), SamlMessage::Response(doc))
    }

    fn handle_status_response_type(
        &self,
        config: &ChainConfig,
        request: &mut HandlerRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        Self::consume_response(config, request, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::ProviderMode;
    use crate::http::{HttpContext, HttpMethod};
    use crate::identity_server::IdentityServer;
    use crate::sts::SecurityTokenService;
    use fedlink_protocol_saml::{response_to_xml, Status};
    use std::sync::Arc;

    const IDP: &str = "https://idp.example.com/idp/";
    const SP: &str = "https://employee.example.com/";

    fn idp_config() -> ChainConfig {
        let mut config = ChainConfig::new(ProviderMode::IdentityProvider, IDP);
        config.sts = Some(Arc::new(SecurityTokenService::new(IDP, 300)));
        config.identity_server = Some(Arc::new(IdentityServer::new()));
        config
    }

    fn sp_config() -> ChainConfig {
        let mut config = ChainConfig::new(ProviderMode::ServiceProvider, SP);
        config.expected_issuer = Some(IDP.to_string());
        config
    }

    fn incoming(message: SamlMessage) -> HandlerRequest {
        let xml = message.to_xml();
        HandlerRequest::incoming(HttpContext::new(HttpMethod::Post, "s1"), message, xml)
    }

    #[test]
    fn authn_request_yields_assertion_and_registers_participant() {
        let config = idp_config();
        let handler = AuthenticationHandler::new();

        let authn = AuthnRequest::new(SP).with_acs_url(SP).with_binding(SamlBinding::HttpPost);
        let request_id = authn.id.clone();
        let mut request = incoming(SamlMessage::AuthnRequest(authn));
        request.options.principal = Some(Principal::new("tomcat"));

        let mut response = HandlerResponse::default();
        handler
            .handle_request_type(&config, &mut request, &mut response)
            .unwrap();

        let doc = match response.document().unwrap() {
            SamlMessage::Response(r) => r,
            other => panic!("unexpected document: {other:?}"),
        };
        assert_eq!(doc.in_response_to.as_deref(), Some(request_id.as_str()));
        assert_eq!(doc.first_assertion().unwrap().principal_name(), Some("tomcat"));

        let server = config.identity_server.as_ref().unwrap();
        assert_eq!(server.participant_count("s1"), 1);
        assert!(server.assertion_id("s1").is_some());
    }

    #[test]
    fn missing_principal_is_a_processing_error() {
        let config = idp_config();
        let handler = AuthenticationHandler::new();

        let mut request = incoming(SamlMessage::AuthnRequest(AuthnRequest::new(SP)));
        let mut response = HandlerResponse::default();

        assert!(matches!(
            handler.handle_request_type(&config, &mut request, &mut response),
            Err(FederationError::Processing(_))
        ));
    }

    #[test]
    fn response_with_valid_assertion_yields_principal() {
        let config = sp_config();
        let handler = AuthenticationHandler::new();

        let sts = SecurityTokenService::new(IDP, 300);
        let principal = Principal::new("tomcat");
        let assertion = sts.issue(&IssueRequest {
            principal: &principal,
            audience: SP,
            in_response_to: "ID_q",
            recipient: SP,
            existing_assertion_id: None,
        });
        let saml_response = Response::success(IDP)
            .in_response_to("ID_q")
            .with_destination(SP)
            .with_assertion(assertion);

        let mut request = incoming(SamlMessage::Response(saml_response));
        let mut response = HandlerResponse::default();
        handler
            .handle_status_response_type(&config, &mut request, &mut response)
            .unwrap();

        assert_eq!(response.principal.as_ref().map(|p| p.name.as_str()), Some("tomcat"));
    }

    #[test]
    fn response_destined_elsewhere_is_rejected() {
        let mut config = sp_config();
        config.supports_signatures = true;
        let handler = AuthenticationHandler::new();

        let saml_response = Response::success(IDP)
            .in_response_to("ID_q")
            .with_destination("https://other.example.com/");
        let mut request = incoming(SamlMessage::Response(saml_response));
        let mut response = HandlerResponse::default();

        assert!(matches!(
            handler.handle_status_response_type(&config, &mut request, &mut response),
            Err(FederationError::DestinationMismatch { .. })
        ));
    }

    #[test]
    fn matching_destination_passes_when_signatures_are_on() {
        let mut config = sp_config();
        config.supports_signatures = true;
        let handler = AuthenticationHandler::new();

        let sts = SecurityTokenService::new(IDP, 300);
        let principal = Principal::new("tomcat");
        let assertion = sts.issue(&IssueRequest {
            principal: &principal,
            audience: SP,
            in_response_to: "ID_q",
            recipient: SP,
            existing_assertion_id: None,
        });
        let saml_response = Response::success(IDP)
            .in_response_to("ID_q")
            .with_destination(SP)
            .with_assertion(assertion);

        let mut request = incoming(SamlMessage::Response(saml_response));
        let mut response = HandlerResponse::default();
        handler
            .handle_status_response_type(&config, &mut request, &mut response)
            .unwrap();
        assert!(response.principal.is_some());
    }

    #[test]
    fn response_from_wrong_issuer_is_rejected() {
        let config = sp_config();
        let handler = AuthenticationHandler::new();

        let saml_response = Response::success("https://rogue.example.com/").in_response_to("ID_q");
        let mut request = incoming(SamlMessage::Response(saml_response));
        let mut response = HandlerResponse::default();

        assert!(handler
            .handle_status_response_type(&config, &mut request, &mut response)
            .is_err());
    }

    #[test]
    fn error_status_is_surfaced() {
        let config = sp_config();
        let handler = AuthenticationHandler::new();

        let saml_response = Response::error(IDP, Status::responder_authn_failed());
        let xml = response_to_xml(&saml_response);
        let mut request = HandlerRequest::incoming(
            HttpContext::new(HttpMethod::Post, "s1"),
            SamlMessage::Response(saml_response),
            xml,
        );
        let mut response = HandlerResponse::default();

        assert!(matches!(
            handler.handle_status_response_type(&config, &mut request, &mut response),
            Err(FederationError::Processing(_))
        ));
    }
}
