//! End-to-end federation flows.
//!
//! Exercises the SP and IDP processors against each other through the
//! bindings, the way a browser would carry the messages between them.

use std::sync::Arc;

use base64::Engine;
use fedlink_federation::{
    FederationError, HttpContext, HttpMethod, IdentityProvider, IdpConfig, IdpOutcome,
    InMemoryKeyManager, InMemorySessionStore, Principal, RoleGeneratorRegistry, ServiceProvider,
    SessionStore, SpConfig, SpOutcome, StaticRoleGenerator,
};
use fedlink_protocol_saml::bindings::HttpRedirectBinding;
use fedlink_protocol_saml::{parse_message, SamlBinding, SamlError, SamlMessage};

const IDP_URL: &str = "https://idp.example.com/idp/";
const EMPLOYEE_URL: &str = "https://employee.example.com/";
const SALES_URL: &str = "https://sales.example.com/";

const IDP_KEY: &str = include_str!("../testdata/idp_key.pem");
const IDP_PUB: &str = include_str!("../testdata/idp_pub.pem");
const SP_KEY: &str = include_str!("../testdata/sp_key.pem");
const SP_PUB: &str = include_str!("../testdata/sp_pub.pem");

fn registry() -> RoleGeneratorRegistry {
    let mut registry = RoleGeneratorRegistry::new();
    registry.register(
        "static",
        Arc::new(
            StaticRoleGenerator::new()
                .with_principal("tomcat", vec!["manager".to_string()])
                .with_default_roles(vec!["employee".to_string()]),
        ),
    );
    registry
}

fn private_key(pem: &str) -> Vec<u8> {
    fedlink_crypto::pem_to_der(pem, "PRIVATE KEY")
        .or_else(|_| fedlink_crypto::pem_to_der(pem, "RSA PRIVATE KEY"))
        .unwrap()
}

fn public_key(pem: &str) -> Vec<u8> {
    fedlink_crypto::pem_to_der(pem, "PUBLIC KEY").unwrap()
}

fn plain_sp(service_url: &str, binding: SamlBinding) -> ServiceProvider {
    let mut config = SpConfig::new(service_url, IDP_URL);
    config.binding = binding;
    ServiceProvider::new(
        config,
        Arc::new(InMemorySessionStore::new()),
        Arc::new(InMemoryKeyManager::new()),
    )
    .unwrap()
}

fn signed_sp(service_url: &str, binding: SamlBinding) -> ServiceProvider {
    let mut config = SpConfig::new(service_url, IDP_URL);
    config.binding = binding;
    config.supports_signatures = true;

    let keys = InMemoryKeyManager::new()
        .with_signing_key(private_key(SP_KEY))
        .with_validating_key("idp.example.com", public_key(IDP_PUB));

    ServiceProvider::new(config, Arc::new(InMemorySessionStore::new()), Arc::new(keys)).unwrap()
}

fn plain_idp(token_validity_secs: u64) -> IdentityProvider {
    let mut config = IdpConfig::new(IDP_URL);
    config.token_validity_secs = token_validity_secs;
    IdentityProvider::new(config, Arc::new(InMemoryKeyManager::new()), &registry()).unwrap()
}

fn signed_idp() -> IdentityProvider {
    let mut config = IdpConfig::new(IDP_URL);
    config.supports_signatures = true;

    let keys = InMemoryKeyManager::new()
        .with_signing_key(private_key(IDP_KEY))
        .with_validating_key("employee.example.com", public_key(SP_PUB))
        .with_validating_key("sales.example.com", public_key(SP_PUB));

    IdentityProvider::new(config, Arc::new(keys), &registry()).unwrap()
}

/// Pulls a hidden form field out of a POST-binding page.
fn form_field<'a>(html: &'a str, name: &str) -> &'a str {
    let marker = format!("name=\"{name}\" value=\"");
    let start = html
        .find(&marker)
        .unwrap_or_else(|| panic!("form carries no {name} field"))
        + marker.len();
    let end = html[start..].find('"').unwrap();
    &html[start..start + end]
}

fn expect_post(outcome: SpOutcome) -> (String, String) {
    match outcome {
        SpOutcome::SendPost { destination, html } => (destination, html),
        other => panic!("expected a POST form, got {other:?}"),
    }
}

fn expect_idp_post(outcome: IdpOutcome) -> (String, String) {
    match outcome {
        IdpOutcome::SendPost { destination, html } => (destination, html),
        other => panic!("expected a POST form, got {other:?}"),
    }
}

/// Full SSO over the POST binding: the SP's form decodes to an
/// AuthnRequest, the IDP answers with a Response issued by the configured
/// identity URL, and the SP establishes the session from it.
#[test]
fn post_sso_round_trip() {
    let sp = plain_sp(EMPLOYEE_URL, SamlBinding::HttpPost);
    let idp = plain_idp(300);

    // Unauthenticated visit at the SP.
    let (destination, html) = expect_post(
        sp.process(&HttpContext::new(HttpMethod::Get, "sp-session"))
            .unwrap(),
    );
    assert_eq!(destination, IDP_URL);

    let encoded = form_field(&html, "SAMLRequest");
    let xml = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .unwrap();
    let message = parse_message(std::str::from_utf8(&xml).unwrap()).unwrap();
    assert!(matches!(message, SamlMessage::AuthnRequest(_)));

    // The IDP has an authenticated principal and answers.
    let idp_context =
        HttpContext::new(HttpMethod::Post, "idp-session").with_param("SAMLRequest", encoded);
    let (acs, idp_html) =
        expect_idp_post(idp.process(&idp_context, Some(&Principal::new("tomcat"))).unwrap());
    assert_eq!(acs, EMPLOYEE_URL);

    let response_b64 = form_field(&idp_html, "SAMLResponse");
    let response_xml = base64::engine::general_purpose::STANDARD
        .decode(response_b64)
        .unwrap();
    match parse_message(std::str::from_utf8(&response_xml).unwrap()).unwrap() {
        SamlMessage::Response(r) => assert_eq!(r.issuer, IDP_URL),
        other => panic!("expected a Response, got {other:?}"),
    }

    // The browser posts the response back to the SP.
    let sp_context = HttpContext::new(HttpMethod::Post, "sp-session")
        .with_param("SAMLResponse", response_b64);
    match sp.process(&sp_context).unwrap() {
        SpOutcome::Authenticated { principal } => {
            assert_eq!(principal.name, "tomcat");
            assert_eq!(principal.roles, vec!["manager"]);
        }
        other => panic!("expected authentication, got {other:?}"),
    }
}

/// The same round trip with XML signatures on both sides.
#[test]
fn signed_post_sso_round_trip() {
    let sp = signed_sp(EMPLOYEE_URL, SamlBinding::HttpPost);
    let idp = signed_idp();

    let (_, html) = expect_post(
        sp.process(&HttpContext::new(HttpMethod::Get, "sp-session"))
            .unwrap(),
    );
    let encoded = form_field(&html, "SAMLRequest");
    let request_xml = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .unwrap();
    assert!(std::str::from_utf8(&request_xml).unwrap().contains("<ds:Signature"));

    let idp_context =
        HttpContext::new(HttpMethod::Post, "idp-session").with_param("SAMLRequest", encoded);
    let (_, idp_html) =
        expect_idp_post(idp.process(&idp_context, Some(&Principal::new("tomcat"))).unwrap());

    let response_b64 = form_field(&idp_html, "SAMLResponse");
    let sp_context = HttpContext::new(HttpMethod::Post, "sp-session")
        .with_param("SAMLResponse", response_b64);
    match sp.process(&sp_context).unwrap() {
        SpOutcome::Authenticated { principal } => assert_eq!(principal.name, "tomcat"),
        other => panic!("expected authentication, got {other:?}"),
    }
}

/// A signed response whose root ID was swapped so the signature reference
/// points elsewhere is rejected, not authenticated.
#[test]
fn wrapped_response_is_rejected_end_to_end() {
    let sp = signed_sp(EMPLOYEE_URL, SamlBinding::HttpPost);
    let idp = signed_idp();

    let (_, html) = expect_post(
        sp.process(&HttpContext::new(HttpMethod::Get, "sp-session"))
            .unwrap(),
    );
    let encoded = form_field(&html, "SAMLRequest");
    let idp_context =
        HttpContext::new(HttpMethod::Post, "idp-session").with_param("SAMLRequest", encoded);
    let (_, idp_html) =
        expect_idp_post(idp.process(&idp_context, Some(&Principal::new("tomcat"))).unwrap());

    let response_b64 = form_field(&idp_html, "SAMLResponse");
    let response_xml = String::from_utf8(
        base64::engine::general_purpose::STANDARD
            .decode(response_b64)
            .unwrap(),
    )
    .unwrap();

    let root_id = match parse_message(&response_xml).unwrap() {
        SamlMessage::Response(r) => r.id,
        other => panic!("expected a Response, got {other:?}"),
    };

    // Re-point the root ID while the Reference URI still names the signed
    // element, mimicking a wrapped original.
    let wrapped = response_xml.replace(&format!("ID=\"{root_id}\""), "ID=\"ID_wrapped\"");
    let wrapped_b64 = base64::engine::general_purpose::STANDARD.encode(&wrapped);

    let sp_context = HttpContext::new(HttpMethod::Post, "sp-session")
        .with_param("SAMLResponse", wrapped_b64);
    let err = sp.process(&sp_context).unwrap_err();
    assert!(matches!(
        err,
        FederationError::Saml(SamlError::SignatureWrapped(_))
    ));

    // A duplicate of the signed ID elsewhere in the document is equally
    // fatal.
    let duplicated = response_xml.replace(
        "</samlp:Response>",
        &format!("<saml:Evil ID=\"{root_id}\"></saml:Evil></samlp:Response>"),
    );
    let duplicated_b64 = base64::engine::general_purpose::STANDARD.encode(&duplicated);
    let sp_context = HttpContext::new(HttpMethod::Post, "sp-session")
        .with_param("SAMLResponse", duplicated_b64);
    assert!(matches!(
        sp.process(&sp_context).unwrap_err(),
        FederationError::Saml(SamlError::SignatureWrapped(_))
    ));
}

/// A validly signed response addressed to a different provider is rejected.
#[test]
fn response_destined_for_another_provider_is_rejected() {
    let sp = signed_sp(EMPLOYEE_URL, SamlBinding::HttpPost);
    let idp = signed_idp();

    let (_, html) = expect_post(
        sp.process(&HttpContext::new(HttpMethod::Get, "sp-session"))
            .unwrap(),
    );
    let encoded = form_field(&html, "SAMLRequest");
    let idp_context =
        HttpContext::new(HttpMethod::Post, "idp-session").with_param("SAMLRequest", encoded);
    let (_, idp_html) =
        expect_idp_post(idp.process(&idp_context, Some(&Principal::new("tomcat"))).unwrap());

    // Re-address the response to sales and sign it again, so only the
    // Destination check stands between the message and a session.
    let response_xml = String::from_utf8(
        base64::engine::general_purpose::STANDARD
            .decode(form_field(&idp_html, "SAMLResponse"))
            .unwrap(),
    )
    .unwrap();
    let mut response = match parse_message(&response_xml).unwrap() {
        SamlMessage::Response(r) => r,
        other => panic!("expected a Response, got {other:?}"),
    };
    response.destination = Some(SALES_URL.to_string());

    let signer = fedlink_protocol_saml::signature::XmlSigner::new(private_key(IDP_KEY), None);
    let signed = signer
        .sign(&fedlink_protocol_saml::response_to_xml(&response), &response.id)
        .unwrap();

    let sp_context = HttpContext::new(HttpMethod::Post, "sp-session").with_param(
        "SAMLResponse",
        base64::engine::general_purpose::STANDARD.encode(&signed),
    );
    assert!(matches!(
        sp.process(&sp_context).unwrap_err(),
        FederationError::DestinationMismatch { .. }
    ));
}

/// An expired assertion restarts authentication instead of failing hard.
#[test]
fn expired_assertion_triggers_reissue() {
    let sp = plain_sp(EMPLOYEE_URL, SamlBinding::HttpPost);
    // Zero validity: the assertion is expired the instant it is issued,
    // since the window is exclusive at its upper bound.
    let idp = plain_idp(0);

    let (_, html) = expect_post(
        sp.process(&HttpContext::new(HttpMethod::Get, "sp-session"))
            .unwrap(),
    );
    let encoded = form_field(&html, "SAMLRequest");
    let idp_context =
        HttpContext::new(HttpMethod::Post, "idp-session").with_param("SAMLRequest", encoded);
    let (_, idp_html) =
        expect_idp_post(idp.process(&idp_context, Some(&Principal::new("tomcat"))).unwrap());

    let response_b64 = form_field(&idp_html, "SAMLResponse");
    let sp_context = HttpContext::new(HttpMethod::Post, "sp-session")
        .with_param("SAMLResponse", response_b64);

    // The SP answers with a fresh AuthnRequest rather than an error.
    let (destination, retry_html) = expect_post(sp.process(&sp_context).unwrap());
    assert_eq!(destination, IDP_URL);
    let retry = base64::engine::general_purpose::STANDARD
        .decode(form_field(&retry_html, "SAMLRequest"))
        .unwrap();
    assert!(matches!(
        parse_message(std::str::from_utf8(&retry).unwrap()).unwrap(),
        SamlMessage::AuthnRequest(_)
    ));
}

/// Global logout initiated by one SP fans out to every participant and
/// leaves the IDP session fully drained.
#[test]
fn global_logout_fans_out_over_all_participants() {
    let idp = plain_idp(300);
    let idp_session = "idp-session";

    // Register sales and employee as participants by running SSO for both.
    for sp_url in [SALES_URL, EMPLOYEE_URL] {
        let sp = plain_sp(sp_url, SamlBinding::HttpPost);
        let (_, html) = expect_post(
            sp.process(&HttpContext::new(HttpMethod::Get, "sp-session"))
                .unwrap(),
        );
        let encoded = form_field(&html, "SAMLRequest");
        let context =
            HttpContext::new(HttpMethod::Post, idp_session).with_param("SAMLRequest", encoded);
        let _ = expect_idp_post(idp.process(&context, Some(&Principal::new("tomcat"))).unwrap());
    }
    assert_eq!(idp.server().participant_count(idp_session), 2);

    // Employee initiates a global logout from an authenticated session.
    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let mut session = sessions.get_or_create("sp-session");
    session.principal = Some(Principal::new("tomcat"));
    sessions.save(session);

    let employee = ServiceProvider::new(
        SpConfig::new(EMPLOYEE_URL, IDP_URL),
        sessions,
        Arc::new(InMemoryKeyManager::new()),
    )
    .unwrap();
    let glo = HttpContext::new(HttpMethod::Get, "sp-session").with_param("GLO", "true");
    let (_, logout_html) = expect_post(employee.process(&glo).unwrap());
    let logout_b64 = form_field(&logout_html, "SAMLRequest").to_string();

    // The IDP forwards the logout to sales first.
    let context =
        HttpContext::new(HttpMethod::Post, idp_session).with_param("SAMLRequest", &logout_b64);
    let (leg_destination, leg_html) = expect_idp_post(idp.process(&context, None).unwrap());
    assert_eq!(leg_destination, SALES_URL);
    assert!(leg_html.contains("SAMLRequest"));
    assert_eq!(idp.server().participant_count(idp_session), 0);
    assert_eq!(idp.server().in_transit_count(idp_session), 1);

    // Sales answers its leg through its own SP instance.
    let sales = plain_sp(SALES_URL, SamlBinding::HttpPost);
    let sales_context = HttpContext::new(HttpMethod::Post, "sales-session")
        .with_param("SAMLRequest", form_field(&leg_html, "SAMLRequest"));
    let (back_to, sales_html) = expect_post(sales.process(&sales_context).unwrap());
    assert_eq!(back_to, IDP_URL);

    // The final leg answers the original requester and drains the session.
    let context = HttpContext::new(HttpMethod::Post, idp_session)
        .with_param("SAMLResponse", form_field(&sales_html, "SAMLResponse"));
    let (final_destination, final_html) = expect_idp_post(idp.process(&context, None).unwrap());
    assert_eq!(final_destination, EMPLOYEE_URL);

    assert_eq!(idp.server().participant_count(idp_session), 0);
    assert_eq!(idp.server().in_transit_count(idp_session), 0);
    assert_eq!(idp.server().total_sessions(), 0);

    // Employee's SP terminates its session on the success response.
    let employee_context = HttpContext::new(HttpMethod::Post, "sp-session")
        .with_param("SAMLResponse", form_field(&final_html, "SAMLResponse"));
    match employee.process(&employee_context).unwrap() {
        SpOutcome::LoggedOut => {}
        other => panic!("expected logout, got {other:?}"),
    }
}

/// Redirect binding round trip preserves the request fields, and the
/// detached signature breaks if any signed byte changes.
#[test]
fn redirect_binding_preserves_fields_and_pins_bytes() {
    let sp = signed_sp(EMPLOYEE_URL, SamlBinding::HttpRedirect);

    let context = HttpContext::new(HttpMethod::Get, "sp-session")
        .with_param("RelayState", "deep-link");
    let url = match sp.process(&context).unwrap() {
        SpOutcome::Redirect { url } => url,
        other => panic!("expected a redirect, got {other:?}"),
    };
    assert!(url.starts_with(IDP_URL));

    // Round trip: the deflated payload decodes back to the same request.
    let decoded = HttpRedirectBinding::decode_url(&url).unwrap();
    let request = match parse_message(&decoded.xml).unwrap() {
        SamlMessage::AuthnRequest(r) => r,
        other => panic!("expected an AuthnRequest, got {other:?}"),
    };
    assert_eq!(request.issuer, EMPLOYEE_URL);
    assert_eq!(request.destination.as_deref(), Some(IDP_URL));
    assert_eq!(decoded.relay_state.as_deref(), Some("deep-link"));

    // The detached signature covers the literal query bytes.
    let query = url.split_once('?').unwrap().1;
    let signed = HttpRedirectBinding::signed_portion(query).unwrap();
    let signature = decoded.signature.as_deref().unwrap();
    let sig_alg = decoded.sig_alg.as_deref().unwrap();

    let validator = fedlink_protocol_saml::signature::XmlSignatureValidator::new(Vec::new())
        .with_public_keys(vec![public_key(SP_PUB)]);
    validator.validate_redirect(signed, signature, sig_alg).unwrap();

    // Any changed byte in the signed portion breaks verification.
    let tampered = signed.replace("RelayState=deep-link", "RelayState=elsewhere");
    assert!(validator.validate_redirect(&tampered, signature, sig_alg).is_err());
}

/// An `EncryptedAssertion` is decrypted with the SP's own key and
/// establishes the session like a plaintext one.
#[test]
fn encrypted_assertion_authenticates_the_session() {
    let sp = signed_sp(EMPLOYEE_URL, SamlBinding::HttpPost);
    let idp = signed_idp();

    let (_, html) = expect_post(
        sp.process(&HttpContext::new(HttpMethod::Get, "sp-session"))
            .unwrap(),
    );
    let encoded = form_field(&html, "SAMLRequest");
    let idp_context =
        HttpContext::new(HttpMethod::Post, "idp-session").with_param("SAMLRequest", encoded);
    let (_, idp_html) =
        expect_idp_post(idp.process(&idp_context, Some(&Principal::new("tomcat"))).unwrap());

    // Rebuild the IDP's response with the assertion encrypted for the SP,
    // then sign it again.
    let response_xml = String::from_utf8(
        base64::engine::general_purpose::STANDARD
            .decode(form_field(&idp_html, "SAMLResponse"))
            .unwrap(),
    )
    .unwrap();
    let mut response = match parse_message(&response_xml).unwrap() {
        SamlMessage::Response(r) => r,
        other => panic!("expected a Response, got {other:?}"),
    };
    let assertion = response.assertions.remove(0);
    let assertion_xml = fedlink_protocol_saml::assertion_to_xml(&assertion);
    let encrypted =
        fedlink_protocol_saml::encryption::encrypt_assertion(&assertion_xml, &public_key(SP_PUB))
            .unwrap();
    let response = response.with_encrypted_assertion(encrypted);

    let signer =
        fedlink_protocol_saml::signature::XmlSigner::new(private_key(IDP_KEY), None);
    let signed = signer
        .sign(&fedlink_protocol_saml::response_to_xml(&response), &response.id)
        .unwrap();

    let sp_context = HttpContext::new(HttpMethod::Post, "sp-session").with_param(
        "SAMLResponse",
        base64::engine::general_purpose::STANDARD.encode(&signed),
    );
    match sp.process(&sp_context).unwrap() {
        SpOutcome::Authenticated { principal } => assert_eq!(principal.name, "tomcat"),
        other => panic!("expected authentication, got {other:?}"),
    }
}

/// Back-to-back exchanges see only their own traversal's state.
#[test]
fn chain_state_does_not_leak_between_exchanges() {
    let idp = plain_idp(300);

    let roles_for = |principal: &str, session: &str| -> Vec<String> {
        let sp = plain_sp(EMPLOYEE_URL, SamlBinding::HttpPost);
        let (_, html) = expect_post(
            sp.process(&HttpContext::new(HttpMethod::Get, "sp-session"))
                .unwrap(),
        );
        let encoded = form_field(&html, "SAMLRequest");
        let context =
            HttpContext::new(HttpMethod::Post, session).with_param("SAMLRequest", encoded);
        let (_, idp_html) =
            expect_idp_post(idp.process(&context, Some(&Principal::new(principal))).unwrap());

        let xml = base64::engine::general_purpose::STANDARD
            .decode(form_field(&idp_html, "SAMLResponse"))
            .unwrap();
        match parse_message(std::str::from_utf8(&xml).unwrap()).unwrap() {
            SamlMessage::Response(r) => r.first_assertion().unwrap().roles("Role"),
            other => panic!("expected a Response, got {other:?}"),
        }
    };

    assert_eq!(roles_for("tomcat", "session-a"), vec!["manager"]);
    // A different principal right after must not inherit tomcat's roles.
    assert_eq!(roles_for("duke", "session-b"), vec!["employee"]);
}
