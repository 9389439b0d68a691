//! HTTP-POST binding.
//!
//! The SAML document travels base64-encoded in a hidden `INPUT` field of an
//! HTML form that submits itself on load. A `noscript` fallback renders a
//! plain submit button.

use base64::Engine;

use crate::error::{SamlError, SamlResult};

use super::{DecodedMessage, SamlMessageType};

/// HTTP-POST binding encoder/decoder.
pub struct HttpPostBinding;

impl HttpPostBinding {
    /// Encodes a request into an auto-submitting HTML form.
    #[must_use]
    pub fn encode_request(xml: &str, destination: &str, relay_state: Option<&str>) -> String {
        Self::encode(xml, destination, relay_state, SamlMessageType::Request)
    }

    /// Encodes a response into an auto-submitting HTML form.
    #[must_use]
    pub fn encode_response(xml: &str, destination: &str, relay_state: Option<&str>) -> String {
        Self::encode(xml, destination, relay_state, SamlMessageType::Response)
    }

    fn encode(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
        message_type: SamlMessageType,
    ) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(xml);

        let relay_state_input = relay_state
            .map(|rs| {
                format!(
                    r#"<input type="hidden" name="RelayState" value="{}"/>"#,
                    html_escape(rs)
                )
            })
            .unwrap_or_default();

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Redirecting</title>
</head>
<body onload="document.forms[0].submit()">
    <form method="post" action="{}">
        <input type="hidden" name="{}" value="{}"/>
        {}
        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
            html_escape(destination),
            message_type.form_param(),
            encoded,
            relay_state_input
        )
    }

    /// Decodes a message from posted form parameters.
    ///
    /// Exactly one of `saml_request` and `saml_response` must be present.
    ///
    /// # Errors
    ///
    /// Returns an error when neither parameter is present or the payload is
    /// not valid base64-encoded UTF-8.
    pub fn decode(
        saml_request: Option<&str>,
        saml_response: Option<&str>,
        relay_state: Option<&str>,
    ) -> SamlResult<DecodedMessage> {
        let (encoded, message_type) = if let Some(req) = saml_request {
            (req, SamlMessageType::Request)
        } else if let Some(resp) = saml_response {
            (resp, SamlMessageType::Response)
        } else {
            return Err(SamlError::InvalidRequest(
                "no SAMLRequest or SAMLResponse parameter".to_string(),
            ));
        };

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| SamlError::Base64Decode(e.to_string()))?;

        let xml = String::from_utf8(decoded)
            .map_err(|e| SamlError::InvalidRequest(format!("message is not UTF-8: {e}")))?;

        Ok(DecodedMessage {
            xml,
            message_type,
            relay_state: relay_state.map(String::from),
            signature: None,
            sig_alg: None,
        })
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
