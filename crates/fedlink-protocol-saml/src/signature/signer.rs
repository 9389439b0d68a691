//! XML signature creation.

use base64::Engine;

use crate::error::{SamlError, SamlResult};

use super::{SignatureAlgorithm, SignatureConfig};

/// Signs SAML documents with an RSA private key.
pub struct XmlSigner {
    private_key_der: Vec<u8>,
    certificate_der: Option<Vec<u8>>,
    config: SignatureConfig,
}

impl XmlSigner {
    /// Creates a signer from a DER private key and optional DER certificate.
    #[must_use]
    pub fn new(private_key_der: Vec<u8>, certificate_der: Option<Vec<u8>>) -> Self {
        Self {
            private_key_der,
            certificate_der,
            config: SignatureConfig::default(),
        }
    }

    /// Creates a signer from PEM-encoded key material.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or certificate PEM does not decode.
    pub fn from_pem(private_key_pem: &str, certificate_pem: Option<&str>) -> SamlResult<Self> {
        let private_key_der = fedlink_crypto::pem_to_der(private_key_pem, "PRIVATE KEY")
            .or_else(|_| fedlink_crypto::pem_to_der(private_key_pem, "RSA PRIVATE KEY"))?;

        let certificate_der = match certificate_pem {
            Some(pem) => Some(fedlink_crypto::pem_to_der(pem, "CERTIFICATE")?),
            None => None,
        };

        Ok(Self::new(private_key_der, certificate_der))
    }

    /// Sets the signature configuration.
    #[must_use]
    pub fn with_config(mut self, config: SignatureConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the configured signature algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        self.config.algorithm
    }

    /// Signs an XML document with an enveloped signature.
    ///
    /// `reference_id` is the ID of the element to sign, without the `#`
    /// prefix. The `<ds:Signature>` lands after the element's Issuer, or
    /// right after the opening tag when there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the referenced element is missing or signing
    /// fails.
    pub fn sign(&self, xml: &str, reference_id: &str) -> SamlResult<String> {
        let (element_start, insert_position) = locate_reference(xml, reference_id)?;

        let element = extract_element(xml, element_start)?;
        let digest = self.config.algorithm.digest(canonicalize(&element).as_bytes());
        let digest_b64 = base64::engine::general_purpose::STANDARD.encode(&digest);

        let signed_info = build_signed_info(reference_id, &digest_b64, &self.config);
        let signature_value = self.sign_data(canonicalize(&signed_info).as_bytes())?;
        let signature_b64 = base64::engine::general_purpose::STANDARD.encode(&signature_value);

        let signature_element = self.build_signature_element(&signed_info, &signature_b64);

        Ok(format!(
            "{}{}{}",
            &xml[..insert_position],
            signature_element,
            &xml[insert_position..]
        ))
    }

    /// Signs the literal query bytes of an HTTP-Redirect binding.
    ///
    /// Pass the exact string produced by the binding's signed-query builder.
    /// Returns the base64 signature for the `Signature` parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn sign_redirect(&self, signed_query: &str) -> SamlResult<String> {
        let signature = self.sign_data(signed_query.as_bytes())?;
        Ok(base64::engine::general_purpose::STANDARD.encode(&signature))
    }

    fn sign_data(&self, data: &[u8]) -> SamlResult<Vec<u8>> {
        fedlink_crypto::rsa_sign(
            &self.private_key_der,
            data,
            self.config.algorithm.rsa_algorithm(),
        )
        .map_err(|e| SamlError::SignatureCreation(e.to_string()))
    }

    fn build_signature_element(&self, signed_info: &str, signature_b64: &str) -> String {
        let mut signature = format!(
            "<ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\">{signed_info}<ds:SignatureValue>{signature_b64}</ds:SignatureValue>"
        );

        if self.config.include_certificate {
            if let Some(ref cert) = self.certificate_der {
                let cert_b64 = base64::engine::general_purpose::STANDARD.encode(cert);
                signature.push_str(&format!(
                    "<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert_b64}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>"
                ));
            }
        }

        signature.push_str("</ds:Signature>");
        signature
    }
}

/// Finds the signed element and the insertion point for the signature.
fn locate_reference(xml: &str, reference_id: &str) -> SamlResult<(usize, usize)> {
    let id_pattern = format!("ID=\"{reference_id}\"");
    let alt_pattern = format!("Id=\"{reference_id}\"");

    let id_pos = xml
        .find(&id_pattern)
        .or_else(|| xml.find(&alt_pattern))
        .ok_or_else(|| {
            SamlError::SignatureCreation(format!("element with ID '{reference_id}' not found"))
        })?;

    let mut tag_start = id_pos;
    while tag_start > 0 && xml.as_bytes()[tag_start - 1] != b'<' {
        tag_start -= 1;
    }
    if tag_start > 0 {
        tag_start -= 1;
    }

    let tag_end = xml[id_pos..]
        .find('>')
        .map(|pos| id_pos + pos + 1)
        .ok_or_else(|| SamlError::SignatureCreation("malformed XML element".to_string()))?;

    // SAML schema order puts Signature right after Issuer.
    let insert_pos = find_issuer_end(xml, tag_end).unwrap_or(tag_end);

    Ok((tag_start, insert_pos))
}

fn find_issuer_end(xml: &str, after: usize) -> Option<usize> {
    let search_area = &xml[after..];
    for pattern in &["</saml:Issuer>", "</Issuer>", "</saml2:Issuer>"] {
        if let Some(pos) = search_area.find(pattern) {
            return Some(after + pos + pattern.len());
        }
    }
    None
}

/// Extracts the complete element starting at `start`.
pub(super) fn extract_element(xml: &str, start: usize) -> SamlResult<String> {
    let xml_bytes = xml.as_bytes();

    let mut tag_end = start + 1;
    while tag_end < xml.len() && xml_bytes[tag_end] != b' ' && xml_bytes[tag_end] != b'>' {
        tag_end += 1;
    }
    let full_tag_name = &xml[start + 1..tag_end];

    let close_pattern = format!("</{full_tag_name}>");
    if let Some(close_pos) = xml[start..].find(&close_pattern) {
        return Ok(xml[start..start + close_pos + close_pattern.len()].to_string());
    }

    // Fall back to the local name if the closing tag drops the prefix.
    let local_name = full_tag_name.split(':').next_back().unwrap_or(full_tag_name);
    let close_pattern = format!("</{local_name}>");
    let close_pos = xml[start..].find(&close_pattern).ok_or_else(|| {
        SamlError::SignatureCreation(format!("unclosed XML element '{full_tag_name}'"))
    })?;

    Ok(xml[start..start + close_pos + close_pattern.len()].to_string())
}

/// Whitespace-normalizing canonicalization.
///
/// Stands in for full C14N: serialization never reorders attributes or
/// rewrites namespaces, so collapsing whitespace runs is enough for
/// documents this codec produced.
pub(super) fn canonicalize(xml: &str) -> String {
    xml.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn build_signed_info(reference_id: &str, digest_b64: &str, config: &SignatureConfig) -> String {
    format!(
        "<ds:SignedInfo xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\"><ds:CanonicalizationMethod Algorithm=\"{}\"/><ds:SignatureMethod Algorithm=\"{}\"/><ds:Reference URI=\"#{}\"><ds:Transforms><ds:Transform Algorithm=\"http://www.w3.org/2000/09/xmldsig#enveloped-signature\"/><ds:Transform Algorithm=\"{}\"/></ds:Transforms><ds:DigestMethod Algorithm=\"{}\"/><ds:DigestValue>{}</ds:DigestValue></ds:Reference></ds:SignedInfo>",
        config.canonicalization.uri(),
        config.algorithm.uri(),
        reference_id,
        config.canonicalization.uri(),
        config.algorithm.digest_uri(),
        digest_b64
    )
}
