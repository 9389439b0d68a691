//! HTTP-Redirect binding.
//!
//! Messages are raw-DEFLATE compressed, base64-encoded and URL-encoded into
//! query parameters. A detached signature covers the literal query bytes
//! `SAMLRequest=..[&RelayState=..]&SigAlg=..`, so signing and verification
//! both work on the exact string placed on the wire rather than a
//! re-canonicalized form.

use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::{SamlError, SamlResult};

use super::{DecodedMessage, SamlMessageType};

/// HTTP-Redirect binding encoder/decoder.
pub struct HttpRedirectBinding;

impl HttpRedirectBinding {
    /// Encodes a request into a redirect URL without a signature.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn encode_request(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
    ) -> SamlResult<String> {
        let query = Self::message_query(xml, relay_state, SamlMessageType::Request)?;
        Ok(Self::append_query(destination, &query))
    }

    /// Encodes a response into a redirect URL without a signature.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn encode_response(
        xml: &str,
        destination: &str,
        relay_state: Option<&str>,
    ) -> SamlResult<String> {
        let query = Self::message_query(xml, relay_state, SamlMessageType::Response)?;
        Ok(Self::append_query(destination, &query))
    }

    /// Builds the query string a detached signature covers.
    ///
    /// The result is `SAMLRequest=..[&RelayState=..]&SigAlg=..` (or
    /// `SAMLResponse=` for responses). Sign these exact bytes, then pass the
    /// result to [`Self::finalize_signed`].
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn signed_query(
        xml: &str,
        relay_state: Option<&str>,
        sig_alg: &str,
        message_type: SamlMessageType,
    ) -> SamlResult<String> {
        let mut query = Self::message_query(xml, relay_state, message_type)?;
        query.push_str("&SigAlg=");
        query.push_str(&urlencoding::encode(sig_alg));
        Ok(query)
    }

    /// Appends the signature to a signed query and attaches it to the
    /// destination URL.
    #[must_use]
    pub fn finalize_signed(destination: &str, signed_query: &str, signature_b64: &str) -> String {
        let query = format!(
            "{signed_query}&Signature={}",
            urlencoding::encode(signature_b64)
        );
        Self::append_query(destination, &query)
    }

    /// Returns the portion of a raw query string covered by the detached
    /// signature, everything up to `&Signature=`.
    ///
    /// # Errors
    ///
    /// Returns an error when the query carries no `Signature` parameter.
    pub fn signed_portion(raw_query: &str) -> SamlResult<&str> {
        raw_query
            .find("&Signature=")
            .map(|idx| &raw_query[..idx])
            .ok_or_else(|| {
                SamlError::InvalidRequest("query carries no Signature parameter".to_string())
            })
    }

    fn message_query(
        xml: &str,
        relay_state: Option<&str>,
        message_type: SamlMessageType,
    ) -> SamlResult<String> {
        let compressed = deflate_compress(xml.as_bytes())?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&compressed);

        let mut query = format!(
            "{}={}",
            message_type.form_param(),
            urlencoding::encode(&encoded)
        );
        if let Some(rs) = relay_state {
            query.push_str("&RelayState=");
            query.push_str(&urlencoding::encode(rs));
        }
        Ok(query)
    }

    fn append_query(destination: &str, query: &str) -> String {
        let separator = if destination.contains('?') { '&' } else { '?' };
        format!("{destination}{separator}{query}")
    }

    /// Decodes a message from redirect query parameters.
    ///
    /// Parameter values must already be URL-decoded, as a query parser
    /// produces them.
    ///
    /// # Errors
    ///
    /// Returns an error when neither message parameter is present or the
    /// payload does not decode.
    pub fn decode(
        saml_request: Option<&str>,
        saml_response: Option<&str>,
        relay_state: Option<&str>,
        signature: Option<&str>,
        sig_alg: Option<&str>,
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

        let b64_decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| SamlError::Base64Decode(e.to_string()))?;

        let xml_bytes = deflate_decompress(&b64_decoded)?;
        let xml = String::from_utf8(xml_bytes)
            .map_err(|e| SamlError::InvalidRequest(format!("message is not UTF-8: {e}")))?;

        Ok(DecodedMessage {
            xml,
            message_type,
            relay_state: relay_state.map(String::from),
            signature: signature.map(String::from),
            sig_alg: sig_alg.map(String::from),
        })
    }

    /// Decodes a message from a complete redirect URL.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL does not parse or carries no message.
    pub fn decode_url(url: &str) -> SamlResult<DecodedMessage> {
        let parsed = url::Url::parse(url)
            .map_err(|e| SamlError::InvalidRequest(format!("invalid URL: {e}")))?;

        let mut saml_request = None;
        let mut saml_response = None;
        let mut relay_state = None;
        let mut signature = None;
        let mut sig_alg = None;

        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "SAMLRequest" => saml_request = Some(value.into_owned()),
                "SAMLResponse" => saml_response = Some(value.into_owned()),
                "RelayState" => relay_state = Some(value.into_owned()),
                "Signature" => signature = Some(value.into_owned()),
                "SigAlg" => sig_alg = Some(value.into_owned()),
                _ => {}
            }
        }

        Self::decode(
            saml_request.as_deref(),
            saml_response.as_deref(),
            relay_state.as_deref(),
            signature.as_deref(),
            sig_alg.as_deref(),
        )
    }
}

fn deflate_compress(data: &[u8]) -> SamlResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SamlError::Deflate(format!("compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| SamlError::Deflate(format!("compression failed: {e}")))
}

fn deflate_decompress(data: &[u8]) -> SamlResult<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| SamlError::Deflate(format!("decompression failed: {e}")))?;
    Ok(decompressed)
}
