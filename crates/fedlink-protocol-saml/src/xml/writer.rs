//! SAML message serialization.
//!
//! Messages are emitted without insignificant whitespace so the enveloped
//! signature digests exactly what the peer receives.

use quick_xml::escape::escape;

use crate::types::{
    format_instant, Assertion, AuthnRequest, LogoutRequest, Response, Status, StatusResponse,
    SAMLP_NS, SAML_NS,
};

/// Serializes an AuthnRequest to protocol XML.
#[must_use]
pub fn authn_request_to_xml(request: &AuthnRequest) -> String {
    let mut xml = format!(
        r#"<samlp:AuthnRequest xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}" ID="{}" Version="{}" IssueInstant="{}""#,
        escape(&request.id),
        escape(&request.version),
        format_instant(request.issue_instant),
    );
    push_opt_attr(&mut xml, "Destination", request.destination.as_deref());
    push_opt_attr(
        &mut xml,
        "AssertionConsumerServiceURL",
        request.assertion_consumer_service_url.as_deref(),
    );
    push_opt_attr(&mut xml, "ProtocolBinding", request.protocol_binding.as_deref());
    if request.force_authn {
        xml.push_str(r#" ForceAuthn="true""#);
    }
    if request.is_passive {
        xml.push_str(r#" IsPassive="true""#);
    }
    xml.push('>');

    push_issuer(&mut xml, &request.issuer);

    if let Some(ref policy) = request.name_id_policy {
        xml.push_str("<samlp:NameIDPolicy");
        push_opt_attr(&mut xml, "Format", policy.format.as_deref());
        if policy.allow_create {
            xml.push_str(r#" AllowCreate="true""#);
        }
        xml.push_str("/>");
    }

    xml.push_str("</samlp:AuthnRequest>");
    xml
}

/// Serializes a Response to protocol XML.
#[must_use]
pub fn response_to_xml(response: &Response) -> String {
    let mut xml = format!(
        r#"<samlp:Response xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}" ID="{}" Version="{}" IssueInstant="{}""#,
        escape(&response.id),
        escape(&response.version),
        format_instant(response.issue_instant),
    );
    push_opt_attr(&mut xml, "Destination", response.destination.as_deref());
    push_opt_attr(&mut xml, "InResponseTo", response.in_response_to.as_deref());
    xml.push('>');

    push_issuer(&mut xml, &response.issuer);
    push_status(&mut xml, &response.status);

    for assertion in &response.assertions {
        xml.push_str(&assertion_to_xml(assertion));
    }
    for encrypted in &response.encrypted_assertions {
        xml.push_str(&format!(
            r#"<saml:EncryptedAssertion>{encrypted}</saml:EncryptedAssertion>"#
        ));
    }

    xml.push_str("</samlp:Response>");
    xml
}

/// Serializes an Assertion to XML.
///
/// The `saml` prefix is declared on the element so the assertion stays
/// well-formed when extracted from its response.
#[must_use]
pub fn assertion_to_xml(assertion: &Assertion) -> String {
    let mut xml = format!(
        r#"<saml:Assertion xmlns:saml="{SAML_NS}" ID="{}" Version="{}" IssueInstant="{}">"#,
        escape(&assertion.id),
        escape(&assertion.version),
        format_instant(assertion.issue_instant),
    );

    push_issuer(&mut xml, &assertion.issuer);

    if let Some(ref subject) = assertion.subject {
        xml.push_str("<saml:Subject>");
        if let Some(ref name_id) = subject.name_id {
            push_name_id(&mut xml, name_id);
        }
        for confirmation in &subject.confirmations {
            xml.push_str(&format!(
                r#"<saml:SubjectConfirmation Method="{}">"#,
                escape(&confirmation.method)
            ));
            let has_data = confirmation.in_response_to.is_some()
                || confirmation.recipient.is_some()
                || confirmation.not_on_or_after.is_some();
            if has_data {
                xml.push_str("<saml:SubjectConfirmationData");
                push_opt_attr(&mut xml, "InResponseTo", confirmation.in_response_to.as_deref());
                push_opt_attr(&mut xml, "Recipient", confirmation.recipient.as_deref());
                if let Some(limit) = confirmation.not_on_or_after {
                    xml.push_str(&format!(r#" NotOnOrAfter="{}""#, format_instant(limit)));
                }
                xml.push_str("/>");
            }
            xml.push_str("</saml:SubjectConfirmation>");
        }
        xml.push_str("</saml:Subject>");
    }

    if let Some(ref conditions) = assertion.conditions {
        xml.push_str("<saml:Conditions");
        if let Some(not_before) = conditions.not_before {
            xml.push_str(&format!(r#" NotBefore="{}""#, format_instant(not_before)));
        }
        if let Some(not_on_or_after) = conditions.not_on_or_after {
            xml.push_str(&format!(r#" NotOnOrAfter="{}""#, format_instant(not_on_or_after)));
        }
        if conditions.audiences.is_empty() {
            xml.push_str("/>");
        } else {
            xml.push_str("><saml:AudienceRestriction>");
            for audience in &conditions.audiences {
                xml.push_str(&format!("<saml:Audience>{}</saml:Audience>", escape(audience)));
            }
            xml.push_str("</saml:AudienceRestriction></saml:Conditions>");
        }
    }

    if let Some(ref statement) = assertion.authn_statement {
        xml.push_str(&format!(
            r#"<saml:AuthnStatement AuthnInstant="{}""#,
            format_instant(statement.authn_instant)
        ));
        push_opt_attr(&mut xml, "SessionIndex", statement.session_index.as_deref());
        xml.push_str(&format!(
            "><saml:AuthnContext><saml:AuthnContextClassRef>{}</saml:AuthnContextClassRef></saml:AuthnContext></saml:AuthnStatement>",
            escape(&statement.authn_context_class_ref)
        ));
    }

    for statement in &assertion.attribute_statements {
        xml.push_str("<saml:AttributeStatement>");
        for attribute in &statement.attributes {
            xml.push_str(&format!(r#"<saml:Attribute Name="{}">"#, escape(&attribute.name)));
            for value in &attribute.values {
                xml.push_str(&format!(
                    "<saml:AttributeValue>{}</saml:AttributeValue>",
                    escape(value)
                ));
            }
            xml.push_str("</saml:Attribute>");
        }
        xml.push_str("</saml:AttributeStatement>");
    }

    xml.push_str("</saml:Assertion>");
    xml
}

/// Serializes a LogoutRequest to protocol XML.
#[must_use]
pub fn logout_request_to_xml(request: &LogoutRequest) -> String {
    let mut xml = format!(
        r#"<samlp:LogoutRequest xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}" ID="{}" Version="{}" IssueInstant="{}""#,
        escape(&request.id),
        escape(&request.version),
        format_instant(request.issue_instant),
    );
    push_opt_attr(&mut xml, "Destination", request.destination.as_deref());
    if let Some(limit) = request.not_on_or_after {
        xml.push_str(&format!(r#" NotOnOrAfter="{}""#, format_instant(limit)));
    }
    xml.push('>');

    push_issuer(&mut xml, &request.issuer);

    if let Some(ref name_id) = request.name_id {
        push_name_id(&mut xml, name_id);
    }
    if let Some(ref index) = request.session_index {
        xml.push_str(&format!(
            "<samlp:SessionIndex>{}</samlp:SessionIndex>",
            escape(index)
        ));
    }

    xml.push_str("</samlp:LogoutRequest>");
    xml
}

/// Serializes a StatusResponse (LogoutResponse) to protocol XML.
#[must_use]
pub fn status_response_to_xml(response: &StatusResponse) -> String {
    let mut xml = format!(
        r#"<samlp:LogoutResponse xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}" ID="{}" Version="{}" IssueInstant="{}""#,
        escape(&response.id),
        escape(&response.version),
        format_instant(response.issue_instant),
    );
    push_opt_attr(&mut xml, "Destination", response.destination.as_deref());
    push_opt_attr(&mut xml, "InResponseTo", response.in_response_to.as_deref());
    xml.push('>');

    push_issuer(&mut xml, &response.issuer);
    push_status(&mut xml, &response.status);

    xml.push_str("</samlp:LogoutResponse>");
    xml
}

fn push_opt_attr(xml: &mut String, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        xml.push_str(&format!(r#" {}="{}""#, name, escape(value)));
    }
}

fn push_issuer(xml: &mut String, issuer: &str) {
    xml.push_str(&format!("<saml:Issuer>{}</saml:Issuer>", escape(issuer)));
}

fn push_name_id(xml: &mut String, name_id: &crate::types::NameId) {
    xml.push_str("<saml:NameID");
    push_opt_attr(xml, "Format", name_id.format.as_deref());
    push_opt_attr(xml, "NameQualifier", name_id.name_qualifier.as_deref());
    xml.push_str(&format!(">{}</saml:NameID>", escape(&name_id.value)));
}

fn push_status(xml: &mut String, status: &Status) {
    xml.push_str("<samlp:Status>");
    xml.push_str(&format!(
        r#"<samlp:StatusCode Value="{}""#,
        escape(&status.status_code.value)
    ));
    if let Some(ref sub) = status.status_code.status_code {
        xml.push_str(&format!(
            r#"><samlp:StatusCode Value="{}"/></samlp:StatusCode>"#,
            escape(&sub.value)
        ));
    } else {
        xml.push_str("/>");
    }
    if let Some(ref message) = status.status_message {
        xml.push_str(&format!(
            "<samlp:StatusMessage>{}</samlp:StatusMessage>",
            escape(message)
        ));
    }
    xml.push_str("</samlp:Status>");
}
