//! Role generation, fourth stage of the chain.

use std::sync::Mutex;

use fedlink_protocol_saml::{AttributeStatement, SamlMessage};
use tracing::debug;

use crate::error::FederationResult;
use crate::handlers::{ChainConfig, HandlerRequest, HandlerResponse, Saml2Handler};

/// Attaches the principal's roles to the assertion the authentication
/// handler produced.
///
/// The last granted roles are cached for inspection and cleared by
/// `reset`, so nothing leaks between chain traversals.
#[derive(Debug, Default)]
pub struct RolesGenerationHandler {
    last_roles: Mutex<Vec<String>>,
}

impl RolesGenerationHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Roles granted by the most recent traversal.
    #[must_use]
    pub fn last_roles(&self) -> Vec<String> {
        self.last_roles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Saml2Handler for RolesGenerationHandler {
    fn name(&self) -> &'static str {
        "roles-generation"
    }

    fn handle_request_type(
        &self,
        config: &ChainConfig,
        _request: &mut HandlerRequest,
        response: &mut HandlerResponse,
    ) -> FederationResult<()> {
        let Some(ref generator) = config.role_generator else {
            return Ok(());
        };
        let Some(principal) = response.principal.clone() else {
            return Ok(());
        };

        let roles = generator.roles_for(&principal.name);
        debug!(principal = %principal.name, ?roles, "generated roles");

        if let Some(SamlMessage::Response(doc)) = response.document_mut() {
            if let Some(assertion) = doc.assertions.first_mut() {
                assertion
                    .attribute_statements
                    .push(AttributeStatement::roles(&config.role_attribute, roles.clone()));
            }
        }

        response.roles = roles.clone();
        if let Some(p) = response.principal.as_mut() {
            p.roles = roles.clone();
        }

        *self.last_roles.lock().unwrap_or_else(|e| e.into_inner()) = roles;
        Ok(())
    }

    fn reset(&self) {
        self.last_roles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::ProviderMode;
    use crate::http::{HttpContext, HttpMethod};
    use crate::roles::StaticRoleGenerator;
    use crate::session::Principal;
    use fedlink_protocol_saml::{Assertion, AuthnRequest, Response};
    use std::sync::Arc;

    const IDP: &str = "https://idp.example.com/idp/";

    fn config_with_roles() -> ChainConfig {
        let mut config = ChainConfig::new(ProviderMode::IdentityProvider, IDP);
        config.role_generator = Some(Arc::new(
            StaticRoleGenerator::new()
                .with_principal("tomcat", vec!["manager".to_string(), "employee".to_string()]),
        ));
        config
    }

    fn traversal_with_document() -> (HandlerRequest, HandlerResponse) {
        let authn = AuthnRequest::new("https://employee.example.com/");
        let xml = fedlink_protocol_saml::authn_request_to_xml(&authn);
        let request = HandlerRequest::incoming(
            HttpContext::new(HttpMethod::Post, "s1"),
            SamlMessage::AuthnRequest(authn),
            xml,
        );

        let mut response = HandlerResponse::default();
        response.principal = Some(Principal::new("tomcat"));
        let doc = Response::success(IDP).with_assertion(Assertion::new(IDP));
        response
            .set_document("authentication", SamlMessage::Response(doc))
            .unwrap();
        (request, response)
    }

    #[test]
    fn roles_land_on_the_assertion() {
        let config = config_with_roles();
        let handler = RolesGenerationHandler::new();
        let (mut request, mut response) = traversal_with_document();

        handler
            .handle_request_type(&config, &mut request, &mut response)
            .unwrap();

        assert_eq!(response.roles, vec!["manager", "employee"]);
        let doc = match response.document().unwrap() {
            SamlMessage::Response(r) => r,
            other => panic!("unexpected document: {other:?}"),
        };
        assert_eq!(
            doc.first_assertion().unwrap().roles("Role"),
            vec!["manager", "employee"]
        );
    }

    #[test]
    fn reset_clears_cached_roles() {
        let config = config_with_roles();
        let handler = RolesGenerationHandler::new();
        let (mut request, mut response) = traversal_with_document();

        handler
            .handle_request_type(&config, &mut request, &mut response)
            .unwrap();
        assert!(!handler.last_roles().is_empty());

        handler.reset();
        assert!(handler.last_roles().is_empty());
    }

    #[test]
    fn without_generator_nothing_changes() {
        let config = ChainConfig::new(ProviderMode::IdentityProvider, IDP);
        let handler = RolesGenerationHandler::new();
        let (mut request, mut response) = traversal_with_document();

        handler
            .handle_request_type(&config, &mut request, &mut response)
            .unwrap();
        assert!(response.roles.is_empty());
    }
}
