//! SAML message parsing.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{SamlError, SamlResult};
use crate::types::{
    Assertion, AttributeStatement, Attribute, AuthnRequest, AuthnStatement, Conditions,
    LogoutRequest, NameId, NameIdPolicy, Response, Status, StatusCode, StatusResponse, Subject,
    SubjectConfirmation, SAML_VERSION,
};

use super::SamlMessage;

/// Parses a SAML protocol message from XML.
///
/// The root element determines the message kind. Enveloped `ds:Signature`
/// elements are skipped here; signature validation happens before parsing,
/// on the raw document.
///
/// # Errors
///
/// Returns an error if the document is not well-formed or the root element
/// is not a known SAML protocol message.
pub fn parse_message(xml: &str) -> SamlResult<SamlMessage> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match read_event(&mut reader)? {
            Event::Start(e) => {
                return match e.local_name().as_ref() {
                    b"AuthnRequest" => {
                        parse_authn_request(&mut reader, &e).map(SamlMessage::AuthnRequest)
                    }
                    b"LogoutRequest" => {
                        parse_logout_request(&mut reader, &e).map(SamlMessage::LogoutRequest)
                    }
                    b"Response" => parse_response(&mut reader, &e).map(SamlMessage::Response),
                    b"LogoutResponse" => {
                        parse_logout_response(&mut reader, &e).map(SamlMessage::LogoutResponse)
                    }
                    other => Err(SamlError::InvalidRequest(format!(
                        "unknown SAML message: {}",
                        String::from_utf8_lossy(other)
                    ))),
                };
            }
            Event::Eof => {
                return Err(SamlError::MissingElement("SAML root element".to_string()));
            }
            _ => {}
        }
    }
}

/// Parses a standalone `saml:Assertion` document.
///
/// Decrypted `EncryptedAssertion` payloads arrive as bare assertion
/// documents rather than full protocol messages.
///
/// # Errors
///
/// Returns an error if the document is not well-formed or the root element
/// is not an Assertion.
pub fn parse_assertion_document(xml: &str) -> SamlResult<Assertion> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match read_event(&mut reader)? {
            Event::Start(e) => {
                return match e.local_name().as_ref() {
                    b"Assertion" => parse_assertion(&mut reader, &e),
                    other => Err(SamlError::InvalidResponse(format!(
                        "expected Assertion, found {}",
                        String::from_utf8_lossy(other)
                    ))),
                };
            }
            Event::Eof => {
                return Err(SamlError::MissingElement("Assertion".to_string()));
            }
            _ => {}
        }
    }
}

fn read_event<'a>(reader: &mut Reader<&'a [u8]>) -> SamlResult<Event<'a>> {
    reader
        .read_event()
        .map_err(|e| SamlError::XmlParse(e.to_string()))
}

fn attr_pairs(e: &BytesStart<'_>) -> SamlResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| SamlError::XmlParse(err.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| SamlError::XmlParse(err.to_string()))?
            .into_owned();
        pairs.push((key, value));
    }
    Ok(pairs)
}

fn parse_instant(value: &str) -> SamlResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| SamlError::XmlParse(format!("invalid timestamp '{value}': {e}")))
}

fn element_text<'a>(reader: &mut Reader<&'a [u8]>, e: &BytesStart<'a>) -> SamlResult<String> {
    let end = e.to_end().into_owned();
    let raw = reader
        .read_text(end.name())
        .map_err(|err| SamlError::XmlParse(err.to_string()))?;
    let text = quick_xml::escape::unescape(&raw)
        .map_err(|err| SamlError::XmlParse(err.to_string()))?;
    Ok(text.trim().to_string())
}

fn skip_element<'a>(reader: &mut Reader<&'a [u8]>, e: &BytesStart<'a>) -> SamlResult<()> {
    let end = e.to_end().into_owned();
    reader
        .read_to_end(end.name())
        .map_err(|err| SamlError::XmlParse(err.to_string()))?;
    Ok(())
}

fn parse_name_id<'a>(reader: &mut Reader<&'a [u8]>, e: &BytesStart<'a>) -> SamlResult<NameId> {
    let mut name_id = NameId::new(String::new());
    for (key, value) in attr_pairs(e)? {
        match key.as_str() {
            "Format" => name_id.format = Some(value),
            "NameQualifier" => name_id.name_qualifier = Some(value),
            _ => {}
        }
    }
    name_id.value = element_text(reader, e)?;
    Ok(name_id)
}

fn parse_authn_request<'a>(
    reader: &mut Reader<&'a [u8]>,
    root: &BytesStart<'a>,
) -> SamlResult<AuthnRequest> {
    let mut request = AuthnRequest::new(String::new());
    request.version = SAML_VERSION.to_string();

    for (key, value) in attr_pairs(root)? {
        match key.as_str() {
            "ID" => request.id = value,
            "Version" => request.version = value,
            "IssueInstant" => request.issue_instant = parse_instant(&value)?,
            "Destination" => request.destination = Some(value),
            "AssertionConsumerServiceURL" => {
                request.assertion_consumer_service_url = Some(value);
            }
            "ProtocolBinding" => request.protocol_binding = Some(value),
            "ForceAuthn" => request.force_authn = value.eq_ignore_ascii_case("true"),
            "IsPassive" => request.is_passive = value.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }

    loop {
        match read_event(reader)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Issuer" => request.issuer = element_text(reader, &e)?,
                b"NameIDPolicy" => {
                    request.name_id_policy = Some(parse_name_id_policy(&e)?);
                    skip_element(reader, &e)?;
                }
                _ => skip_element(reader, &e)?,
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"NameIDPolicy" {
                    request.name_id_policy = Some(parse_name_id_policy(&e)?);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"AuthnRequest" => break,
            Event::Eof => return Err(SamlError::XmlParse("unexpected end of document".to_string())),
            _ => {}
        }
    }

    request.validate()?;
    Ok(request)
}

fn parse_name_id_policy(e: &BytesStart<'_>) -> SamlResult<NameIdPolicy> {
    let mut policy = NameIdPolicy::default();
    for (key, value) in attr_pairs(e)? {
        match key.as_str() {
            "Format" => policy.format = Some(value),
            "AllowCreate" => policy.allow_create = value.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }
    Ok(policy)
}

fn parse_logout_request<'a>(
    reader: &mut Reader<&'a [u8]>,
    root: &BytesStart<'a>,
) -> SamlResult<LogoutRequest> {
    let mut request = LogoutRequest::new(String::new());
    request.version = SAML_VERSION.to_string();

    for (key, value) in attr_pairs(root)? {
        match key.as_str() {
            "ID" => request.id = value,
            "Version" => request.version = value,
            "IssueInstant" => request.issue_instant = parse_instant(&value)?,
            "Destination" => request.destination = Some(value),
            "NotOnOrAfter" => request.not_on_or_after = Some(parse_instant(&value)?),
            _ => {}
        }
    }

    loop {
        match read_event(reader)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Issuer" => request.issuer = element_text(reader, &e)?,
                b"NameID" => request.name_id = Some(parse_name_id(reader, &e)?),
                b"SessionIndex" => request.session_index = Some(element_text(reader, &e)?),
                _ => skip_element(reader, &e)?,
            },
            Event::End(e) if e.local_name().as_ref() == b"LogoutRequest" => break,
            Event::Eof => return Err(SamlError::XmlParse("unexpected end of document".to_string())),
            _ => {}
        }
    }

    request.validate()?;
    Ok(request)
}

fn parse_response<'a>(reader: &mut Reader<&'a [u8]>, root: &BytesStart<'a>) -> SamlResult<Response> {
    let mut response = Response::success(String::new());
    response.version = SAML_VERSION.to_string();

    for (key, value) in attr_pairs(root)? {
        match key.as_str() {
            "ID" => response.id = value,
            "Version" => response.version = value,
            "IssueInstant" => response.issue_instant = parse_instant(&value)?,
            "Destination" => response.destination = Some(value),
            "InResponseTo" => response.in_response_to = Some(value),
            _ => {}
        }
    }

    loop {
        match read_event(reader)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Issuer" => response.issuer = element_text(reader, &e)?,
                b"Status" => response.status = parse_status(reader)?,
                b"Assertion" => response.assertions.push(parse_assertion(reader, &e)?),
                b"EncryptedAssertion" => {
                    let end = e.to_end().into_owned();
                    let raw = reader
                        .read_text(end.name())
                        .map_err(|err| SamlError::XmlParse(err.to_string()))?;
                    response.encrypted_assertions.push(raw.trim().to_string());
                }
                b"Signature" => skip_element(reader, &e)?,
                _ => skip_element(reader, &e)?,
            },
            Event::End(e) if e.local_name().as_ref() == b"Response" => break,
            Event::Eof => return Err(SamlError::XmlParse("unexpected end of document".to_string())),
            _ => {}
        }
    }

    response.validate()?;
    Ok(response)
}

fn parse_logout_response<'a>(
    reader: &mut Reader<&'a [u8]>,
    root: &BytesStart<'a>,
) -> SamlResult<StatusResponse> {
    let mut response = StatusResponse::logout_success(String::new());
    response.version = SAML_VERSION.to_string();
    response.status = Status::success();

    for (key, value) in attr_pairs(root)? {
        match key.as_str() {
            "ID" => response.id = value,
            "Version" => response.version = value,
            "IssueInstant" => response.issue_instant = parse_instant(&value)?,
            "Destination" => response.destination = Some(value),
            "InResponseTo" => response.in_response_to = Some(value),
            _ => {}
        }
    }

    loop {
        match read_event(reader)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Issuer" => response.issuer = element_text(reader, &e)?,
                b"Status" => response.status = parse_status(reader)?,
                _ => skip_element(reader, &e)?,
            },
            Event::End(e) if e.local_name().as_ref() == b"LogoutResponse" => break,
            Event::Eof => return Err(SamlError::XmlParse("unexpected end of document".to_string())),
            _ => {}
        }
    }

    response.validate()?;
    Ok(response)
}

fn parse_status(reader: &mut Reader<&[u8]>) -> SamlResult<Status> {
    // Status codes appear in document order, outermost first.
    let mut codes: Vec<String> = Vec::new();
    let mut message = None;

    loop {
        match read_event(reader)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"StatusCode" => {
                    if let Some(value) = status_code_value(&e)? {
                        codes.push(value);
                    }
                }
                b"StatusMessage" => message = Some(element_text(reader, &e)?),
                _ => skip_element(reader, &e)?,
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"StatusCode" {
                    if let Some(value) = status_code_value(&e)? {
                        codes.push(value);
                    }
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"Status" => break,
            Event::Eof => return Err(SamlError::XmlParse("unexpected end of document".to_string())),
            _ => {}
        }
    }

    let mut codes = codes.into_iter();
    let top = codes
        .next()
        .ok_or_else(|| SamlError::MissingElement("StatusCode".to_string()))?;
    let mut status_code = StatusCode::new(top);
    if let Some(sub) = codes.next() {
        status_code = status_code.with_sub_status(StatusCode::new(sub));
    }

    Ok(Status {
        status_code,
        status_message: message,
    })
}

fn status_code_value(e: &BytesStart<'_>) -> SamlResult<Option<String>> {
    Ok(attr_pairs(e)?
        .into_iter()
        .find(|(key, _)| key == "Value")
        .map(|(_, value)| value))
}

fn parse_assertion<'a>(
    reader: &mut Reader<&'a [u8]>,
    root: &BytesStart<'a>,
) -> SamlResult<Assertion> {
    let mut assertion = Assertion::new(String::new());
    assertion.version = SAML_VERSION.to_string();

    for (key, value) in attr_pairs(root)? {
        match key.as_str() {
            "ID" => assertion.id = value,
            "Version" => assertion.version = value,
            "IssueInstant" => assertion.issue_instant = parse_instant(&value)?,
            _ => {}
        }
    }

    loop {
        match read_event(reader)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Issuer" => assertion.issuer = element_text(reader, &e)?,
                b"Subject" => assertion.subject = Some(parse_subject(reader)?),
                b"Conditions" => {
                    assertion.conditions = Some(parse_conditions(reader, &e, false)?);
                }
                b"AuthnStatement" => {
                    assertion.authn_statement = Some(parse_authn_statement(reader, &e)?);
                }
                b"AttributeStatement" => {
                    assertion
                        .attribute_statements
                        .push(parse_attribute_statement(reader)?);
                }
                b"Signature" => skip_element(reader, &e)?,
                _ => skip_element(reader, &e)?,
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"Conditions" {
                    assertion.conditions = Some(parse_conditions(reader, &e, true)?);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"Assertion" => break,
            Event::Eof => return Err(SamlError::XmlParse("unexpected end of document".to_string())),
            _ => {}
        }
    }

    Ok(assertion)
}

fn parse_subject(reader: &mut Reader<&[u8]>) -> SamlResult<Subject> {
    let mut subject = Subject {
        name_id: None,
        confirmations: Vec::new(),
    };

    loop {
        match read_event(reader)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"NameID" => subject.name_id = Some(parse_name_id(reader, &e)?),
                b"SubjectConfirmation" => {
                    subject
                        .confirmations
                        .push(parse_subject_confirmation(reader, &e)?);
                }
                _ => skip_element(reader, &e)?,
            },
            Event::End(e) if e.local_name().as_ref() == b"Subject" => break,
            Event::Eof => return Err(SamlError::XmlParse("unexpected end of document".to_string())),
            _ => {}
        }
    }

    Ok(subject)
}

fn parse_subject_confirmation<'a>(
    reader: &mut Reader<&'a [u8]>,
    root: &BytesStart<'a>,
) -> SamlResult<SubjectConfirmation> {
    let mut confirmation = SubjectConfirmation::bearer();
    for (key, value) in attr_pairs(root)? {
        if key == "Method" {
            confirmation.method = value;
        }
    }

    loop {
        match read_event(reader)? {
            Event::Start(e) => {
                if e.local_name().as_ref() == b"SubjectConfirmationData" {
                    parse_confirmation_data(&e, &mut confirmation)?;
                    skip_element(reader, &e)?;
                } else {
                    skip_element(reader, &e)?;
                }
            }
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"SubjectConfirmationData" {
                    parse_confirmation_data(&e, &mut confirmation)?;
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"SubjectConfirmation" => break,
            Event::Eof => return Err(SamlError::XmlParse("unexpected end of document".to_string())),
            _ => {}
        }
    }

    Ok(confirmation)
}

fn parse_confirmation_data(
    e: &BytesStart<'_>,
    confirmation: &mut SubjectConfirmation,
) -> SamlResult<()> {
    for (key, value) in attr_pairs(e)? {
        match key.as_str() {
            "InResponseTo" => confirmation.in_response_to = Some(value),
            "Recipient" => confirmation.recipient = Some(value),
            "NotOnOrAfter" => confirmation.not_on_or_after = Some(parse_instant(&value)?),
            _ => {}
        }
    }
    Ok(())
}

fn parse_conditions<'a>(
    reader: &mut Reader<&'a [u8]>,
    root: &BytesStart<'a>,
    is_empty: bool,
) -> SamlResult<Conditions> {
    let mut conditions = Conditions::default();
    for (key, value) in attr_pairs(root)? {
        match key.as_str() {
            "NotBefore" => conditions.not_before = Some(parse_instant(&value)?),
            "NotOnOrAfter" => conditions.not_on_or_after = Some(parse_instant(&value)?),
            _ => {}
        }
    }

    if is_empty {
        return Ok(conditions);
    }

    loop {
        match read_event(reader)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"AudienceRestriction" => {}
                b"Audience" => conditions.audiences.push(element_text(reader, &e)?),
                _ => skip_element(reader, &e)?,
            },
            Event::End(e) if e.local_name().as_ref() == b"Conditions" => break,
            Event::Eof => return Err(SamlError::XmlParse("unexpected end of document".to_string())),
            _ => {}
        }
    }

    Ok(conditions)
}

fn parse_authn_statement<'a>(
    reader: &mut Reader<&'a [u8]>,
    root: &BytesStart<'a>,
) -> SamlResult<AuthnStatement> {
    let mut statement = AuthnStatement::new(String::new());
    for (key, value) in attr_pairs(root)? {
        match key.as_str() {
            "AuthnInstant" => statement.authn_instant = parse_instant(&value)?,
            "SessionIndex" => statement.session_index = Some(value),
            _ => {}
        }
    }

    loop {
        match read_event(reader)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"AuthnContext" => {}
                b"AuthnContextClassRef" => {
                    statement.authn_context_class_ref = element_text(reader, &e)?;
                }
                _ => skip_element(reader, &e)?,
            },
            Event::End(e) if e.local_name().as_ref() == b"AuthnStatement" => break,
            Event::Eof => return Err(SamlError::XmlParse("unexpected end of document".to_string())),
            _ => {}
        }
    }

    Ok(statement)
}

fn parse_attribute_statement(reader: &mut Reader<&[u8]>) -> SamlResult<AttributeStatement> {
    let mut statement = AttributeStatement::new();
    let mut current: Option<Attribute> = None;

    loop {
        match read_event(reader)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Attribute" => {
                    let name = attr_pairs(&e)?
                        .into_iter()
                        .find(|(key, _)| key == "Name")
                        .map(|(_, value)| value)
                        .unwrap_or_default();
                    current = Some(Attribute {
                        name,
                        values: Vec::new(),
                    });
                }
                b"AttributeValue" => {
                    let value = element_text(reader, &e)?;
                    if let Some(ref mut attribute) = current {
                        attribute.values.push(value);
                    }
                }
                _ => skip_element(reader, &e)?,
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"Attribute" => {
                    if let Some(attribute) = current.take() {
                        statement.attributes.push(attribute);
                    }
                }
                b"AttributeStatement" => break,
                _ => {}
            },
            Event::Eof => return Err(SamlError::XmlParse("unexpected end of document".to_string())),
            _ => {}
        }
    }

    Ok(statement)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_prefixed_response_with_assertion() {
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="ID_r1" Version="2.0" IssueInstant="2024-05-01T12:00:00Z" Destination="https://employee.example.com/" InResponseTo="ID_q1"><saml:Issuer>https://idp.example.com/idp/</saml:Issuer><samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status><saml:Assertion ID="ID_a1" Version="2.0" IssueInstant="2024-05-01T12:00:00Z"><saml:Issuer>https://idp.example.com/idp/</saml:Issuer><saml:Subject><saml:NameID>tomcat</saml:NameID></saml:Subject><saml:Conditions NotBefore="2024-05-01T12:00:00Z" NotOnOrAfter="2024-05-01T12:05:00Z"/><saml:AttributeStatement><saml:Attribute Name="Role"><saml:AttributeValue>manager</saml:AttributeValue></saml:Attribute></saml:AttributeStatement></saml:Assertion></samlp:Response>"#;

        let response = match parse_message(xml).unwrap() {
            SamlMessage::Response(r) => r,
            other => panic!("unexpected message: {other:?}"),
        };

        assert_eq!(response.id, "ID_r1");
        assert!(response.is_success());
        let assertion = response.first_assertion().unwrap();
        assert_eq!(assertion.principal_name(), Some("tomcat"));
        assert_eq!(assertion.roles("Role"), vec!["manager"]);
        assert!(assertion.conditions.as_ref().unwrap().not_on_or_after.is_some());
    }

    #[test]
    fn parse_unprefixed_logout_response() {
        let xml = r#"<LogoutResponse xmlns="urn:oasis:names:tc:SAML:2.0:protocol" ID="ID_r2" Version="2.0" IssueInstant="2024-05-01T12:00:00Z" InResponseTo="ID_q2"><Issuer xmlns="urn:oasis:names:tc:SAML:2.0:assertion">https://sales.example.com</Issuer><Status><StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Responder"><StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></StatusCode></Status></LogoutResponse>"#;

        let response = match parse_message(xml).unwrap() {
            SamlMessage::LogoutResponse(r) => r,
            other => panic!("unexpected message: {other:?}"),
        };

        assert_eq!(response.issuer, "https://sales.example.com");
        assert!(response.is_success());
        assert_eq!(response.in_response_to.as_deref(), Some("ID_q2"));
    }

    #[test]
    fn signature_subtree_is_skipped() {
        let xml = r##"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="ID_q3" Version="2.0" IssueInstant="2024-05-01T12:00:00Z"><saml:Issuer>https://employee.example.com</saml:Issuer><ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo><ds:Reference URI="#ID_q3"/></ds:SignedInfo></ds:Signature></samlp:AuthnRequest>"##;

        let request = match parse_message(xml).unwrap() {
            SamlMessage::AuthnRequest(r) => r,
            other => panic!("unexpected message: {other:?}"),
        };
        assert_eq!(request.id, "ID_q3");
    }

    #[test]
    fn unknown_root_is_rejected() {
        let xml = "<ArtifactResolve/>";
        assert!(parse_message(xml).is_err());
    }
}
