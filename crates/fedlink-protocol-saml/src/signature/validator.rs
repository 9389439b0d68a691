//! XML signature validation.
//!
//! Validation is pinned to the document root. The Reference URI must name
//! the root element's ID, that ID must be unique in the document, and the
//! verified root is handed back so callers never parse unsigned content.

use base64::Engine;
use tracing::{debug, warn};

use crate::error::{SamlError, SamlResult};

use super::signer::{canonicalize, extract_element};
use super::{CanonicalizationAlgorithm, SignatureAlgorithm, XmlSignature};

/// A document whose enveloped signature verified.
#[derive(Debug, Clone)]
pub struct VerifiedDocument {
    /// The root element the signature covers, exactly as signed.
    pub xml: String,
    /// The parsed signature.
    pub signature: XmlSignature,
}

/// Validates enveloped and detached SAML signatures against trusted keys.
pub struct XmlSignatureValidator {
    trusted_certificates: Vec<Vec<u8>>,
    trusted_keys: Vec<Vec<u8>>,
}

impl XmlSignatureValidator {
    /// Creates a validator trusting the given DER certificates.
    #[must_use]
    pub fn new(trusted_certificates: Vec<Vec<u8>>) -> Self {
        Self {
            trusted_certificates,
            trusted_keys: Vec::new(),
        }
    }

    /// Creates a validator from PEM-encoded certificates.
    ///
    /// # Errors
    ///
    /// Returns an error if any certificate PEM does not decode.
    pub fn from_pem(certificates_pem: &[&str]) -> SamlResult<Self> {
        let mut certs = Vec::new();
        for pem in certificates_pem {
            certs.push(fedlink_crypto::pem_to_der(pem, "CERTIFICATE")?);
        }
        Ok(Self::new(certs))
    }

    /// Adds bare SubjectPublicKeyInfo keys to the trust set.
    #[must_use]
    pub fn with_public_keys(mut self, keys_der: Vec<Vec<u8>>) -> Self {
        self.trusted_keys = keys_der;
        self
    }

    /// Validates the enveloped signature on a document.
    ///
    /// On success returns the verified root element. Callers must parse the
    /// returned XML, not the input, so content outside the signed root never
    /// reaches the protocol layer.
    ///
    /// # Errors
    ///
    /// Returns `SignatureWrapped` when the Reference does not pin the
    /// document root or the root ID is duplicated, `SignatureInvalid` for
    /// digest or signature mismatches.
    pub fn validate(&self, xml: &str) -> SamlResult<VerifiedDocument> {
        let root_id = root_element_id(xml)?;

        // A second element carrying the signed ID is how wrapped content
        // masquerades as the verified element.
        if count_id_occurrences(xml, &root_id) > 1 {
            warn!(id = %root_id, "rejecting document with duplicated signed ID");
            return Err(SamlError::SignatureWrapped(format!(
                "ID '{root_id}' appears more than once"
            )));
        }

        let signature = extract_signature(xml)?;

        let reference_id = signature
            .reference_uri
            .strip_prefix('#')
            .unwrap_or(&signature.reference_uri);
        if reference_id != root_id {
            warn!(reference = %reference_id, root = %root_id, "signature does not pin the document root");
            return Err(SamlError::SignatureWrapped(format!(
                "signature references '{reference_id}' but the document root is '{root_id}'"
            )));
        }

        self.verify_digest(xml, &signature)?;
        self.verify_signature(xml, &signature)?;

        let root = extract_element(xml, prolog_end(xml))?;
        debug!(id = %root_id, "enveloped signature verified");

        Ok(VerifiedDocument {
            xml: root,
            signature,
        })
    }

    /// Validates a detached HTTP-Redirect signature.
    ///
    /// `signed_query` must be the literal query bytes up to `&Signature=`.
    ///
    /// # Errors
    ///
    /// Returns an error when the algorithm is unknown or no trusted key
    /// verifies the signature.
    pub fn validate_redirect(
        &self,
        signed_query: &str,
        signature_b64: &str,
        sig_alg: &str,
    ) -> SamlResult<()> {
        let algorithm = SignatureAlgorithm::from_uri(sig_alg).ok_or_else(|| {
            SamlError::SignatureInvalid(format!("unknown signature algorithm: {sig_alg}"))
        })?;

        let signature = base64::engine::general_purpose::STANDARD
            .decode(signature_b64)
            .map_err(|e| SamlError::SignatureInvalid(format!("signature encoding: {e}")))?;

        for key in self.candidate_keys(None)? {
            if fedlink_crypto::rsa_verify(
                &key,
                signed_query.as_bytes(),
                &signature,
                algorithm.rsa_algorithm(),
            )
            .unwrap_or(false)
            {
                return Ok(());
            }
        }

        Err(SamlError::SignatureInvalid(
            "no trusted key verifies the query signature".to_string(),
        ))
    }

    fn verify_digest(&self, xml: &str, signature: &XmlSignature) -> SamlResult<()> {
        let root_start = prolog_end(xml);
        let element = extract_element(xml, root_start)?;
        let element_without_sig = remove_signature_element(&element);

        let digest = signature
            .algorithm
            .digest(canonicalize(&element_without_sig).as_bytes());
        let digest_b64 = base64::engine::general_purpose::STANDARD.encode(&digest);

        if digest_b64 != signature.digest_value {
            return Err(SamlError::SignatureInvalid("digest mismatch".to_string()));
        }
        Ok(())
    }

    fn verify_signature(&self, xml: &str, signature: &XmlSignature) -> SamlResult<()> {
        // Verify the SignedInfo exactly as it appears in the document rather
        // than a reconstruction, so a peer's serialization quirks cannot
        // break verification.
        let signed_info = extract_signed_info(xml)?;
        let data = canonicalize(&signed_info);

        let signature_bytes = base64::engine::general_purpose::STANDARD
            .decode(&signature.signature_value)
            .map_err(|e| SamlError::SignatureInvalid(format!("signature encoding: {e}")))?;

        for key in self.candidate_keys(signature.x509_certificate.as_deref())? {
            if fedlink_crypto::rsa_verify(
                &key,
                data.as_bytes(),
                &signature_bytes,
                signature.algorithm.rsa_algorithm(),
            )
            .unwrap_or(false)
            {
                return Ok(());
            }
        }

        Err(SamlError::SignatureInvalid(
            "no trusted key verifies the signature".to_string(),
        ))
    }

    /// Collects SubjectPublicKeyInfo keys to try, embedded certificate first.
    fn candidate_keys(&self, embedded_cert_b64: Option<&str>) -> SamlResult<Vec<Vec<u8>>> {
        let mut keys = Vec::new();

        if let Some(cert_b64) = embedded_cert_b64 {
            let cert_der = base64::engine::general_purpose::STANDARD
                .decode(cert_b64)
                .map_err(|e| SamlError::SignatureInvalid(format!("certificate encoding: {e}")))?;

            let trusted = self.trusted_certificates.iter().any(|tc| tc == &cert_der);
            let nothing_pinned = self.trusted_certificates.is_empty() && self.trusted_keys.is_empty();
            if trusted || nothing_pinned {
                keys.push(fedlink_crypto::public_key_from_cert(&cert_der)?);
            }
        }

        for cert_der in &self.trusted_certificates {
            keys.push(fedlink_crypto::public_key_from_cert(cert_der)?);
        }
        keys.extend(self.trusted_keys.iter().cloned());

        if keys.is_empty() {
            return Err(SamlError::SignatureInvalid(
                "no validation key available".to_string(),
            ));
        }
        Ok(keys)
    }
}

fn prolog_end(xml: &str) -> usize {
    let trimmed = xml.trim_start();
    let mut offset = xml.len() - trimmed.len();
    if trimmed.starts_with("<?xml") {
        if let Some(end) = trimmed.find("?>") {
            offset += end + 2;
            let rest = &xml[offset..];
            offset += rest.len() - rest.trim_start().len();
        }
    }
    offset
}

fn skip_prolog(xml: &str) -> &str {
    &xml[prolog_end(xml)..]
}

/// Returns the ID attribute of the document's root element.
fn root_element_id(xml: &str) -> SamlResult<String> {
    let body = skip_prolog(xml);
    let tag_end = body
        .find('>')
        .ok_or_else(|| SamlError::XmlParse("no root element".to_string()))?;
    let opening_tag = &body[..tag_end];

    for pattern in ["ID=\"", "Id=\""] {
        if let Some(start) = opening_tag.find(pattern) {
            let value_start = start + pattern.len();
            if let Some(len) = opening_tag[value_start..].find('"') {
                return Ok(opening_tag[value_start..value_start + len].to_string());
            }
        }
    }

    Err(SamlError::SignatureWrapped(
        "document root carries no ID".to_string(),
    ))
}

fn count_id_occurrences(xml: &str, id: &str) -> usize {
    let patterns = [format!("ID=\"{id}\""), format!("Id=\"{id}\"")];
    patterns
        .iter()
        .map(|p| xml.matches(p.as_str()).count())
        .sum()
}

/// Extracts signature fields from the document by literal scanning.
fn extract_signature(xml: &str) -> SamlResult<XmlSignature> {
    xml.find("<ds:Signature")
        .or_else(|| xml.find("<Signature"))
        .ok_or_else(|| SamlError::SignatureInvalid("no Signature element".to_string()))?;

    let algorithm = extract_attribute(xml, "SignatureMethod", "Algorithm")
        .and_then(|uri| SignatureAlgorithm::from_uri(&uri))
        .ok_or_else(|| {
            SamlError::SignatureInvalid("unknown or missing signature algorithm".to_string())
        })?;

    let canonicalization = extract_attribute(xml, "CanonicalizationMethod", "Algorithm")
        .and_then(|uri| CanonicalizationAlgorithm::from_uri(&uri))
        .unwrap_or_default();

    let reference_uri = extract_attribute(xml, "Reference", "URI")
        .ok_or_else(|| SamlError::SignatureInvalid("no Reference URI".to_string()))?;

    let digest_value = extract_element_content(xml, "DigestValue")
        .ok_or_else(|| SamlError::SignatureInvalid("no DigestValue".to_string()))?;

    let signature_value = extract_element_content(xml, "SignatureValue")
        .ok_or_else(|| SamlError::SignatureInvalid("no SignatureValue".to_string()))?;

    let x509_certificate = extract_element_content(xml, "X509Certificate");

    Ok(XmlSignature {
        algorithm,
        canonicalization,
        reference_uri,
        digest_value: strip_whitespace(&digest_value),
        signature_value: strip_whitespace(&signature_value),
        x509_certificate: x509_certificate.as_deref().map(strip_whitespace),
    })
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Extracts the literal SignedInfo element, tags included.
fn extract_signed_info(xml: &str) -> SamlResult<String> {
    for (open, close) in [
        ("<ds:SignedInfo", "</ds:SignedInfo>"),
        ("<SignedInfo", "</SignedInfo>"),
    ] {
        if let Some(start) = xml.find(open) {
            let end = xml[start..].find(close).ok_or_else(|| {
                SamlError::SignatureInvalid("unterminated SignedInfo".to_string())
            })?;
            return Ok(xml[start..start + end + close.len()].to_string());
        }
    }
    Err(SamlError::SignatureInvalid("no SignedInfo element".to_string()))
}

fn extract_attribute(xml: &str, element: &str, attribute: &str) -> Option<String> {
    let patterns = [format!("<ds:{element}"), format!("<{element}")];

    for pattern in &patterns {
        if let Some(pos) = xml.find(pattern.as_str()) {
            let end = xml[pos..].find('>')?;
            let element_str = &xml[pos..pos + end];

            let attr_pattern = format!("{attribute}=\"");
            if let Some(attr_start) = element_str.find(&attr_pattern) {
                let value_start = attr_start + attr_pattern.len();
                let value_end = element_str[value_start..].find('"')?;
                return Some(element_str[value_start..value_start + value_end].to_string());
            }
        }
    }
    None
}

fn extract_element_content(xml: &str, element: &str) -> Option<String> {
    let patterns = [
        (format!("<ds:{element}>"), format!("</ds:{element}>")),
        (format!("<{element}>"), format!("</{element}>")),
    ];

    for (open, close) in &patterns {
        if let Some(start) = xml.find(open.as_str()) {
            let content_start = start + open.len();
            if let Some(end) = xml[content_start..].find(close.as_str()) {
                return Some(xml[content_start..content_start + end].to_string());
            }
        }
    }
    None
}

/// Removes the first Signature element for digest recomputation.
fn remove_signature_element(xml: &str) -> String {
    for (open, close) in [
        ("<ds:Signature", "</ds:Signature>"),
        ("<Signature", "</Signature>"),
    ] {
        if let Some(start) = xml.find(open) {
            if let Some(end_offset) = xml[start..].find(close) {
                let end = start + end_offset + close.len();
                return format!("{}{}", &xml[..start], &xml[end..]);
            }
        }
    }
    xml.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::XmlSigner;

    const KEY_PEM: &str = include_str!("../../testdata/idp_key.pem");
    const CERT_PEM: &str = include_str!("../../testdata/idp_cert.pem");

    fn signer() -> XmlSigner {
        XmlSigner::from_pem(KEY_PEM, Some(CERT_PEM)).unwrap()
    }

    fn validator() -> XmlSignatureValidator {
        XmlSignatureValidator::from_pem(&[CERT_PEM]).unwrap()
    }

    const DOC: &str = "<samlp:Response ID=\"ID_doc\"><saml:Issuer>https://idp.example.com/idp/</saml:Issuer><samlp:Status/></samlp:Response>";

    #[test]
    fn signed_document_verifies() {
        let signed = signer().sign(DOC, "ID_doc").unwrap();
        let verified = validator().validate(&signed).unwrap();

        assert_eq!(verified.signature.reference_uri, "#ID_doc");
        assert!(verified.xml.contains("<samlp:Status/>"));
    }

    #[test]
    fn tampered_content_fails_digest() {
        let signed = signer().sign(DOC, "ID_doc").unwrap();
        let tampered = signed.replace("<samlp:Status/>", "<samlp:Status Value=\"forged\"/>");

        assert!(matches!(
            validator().validate(&tampered),
            Err(SamlError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn wrapped_document_is_rejected() {
        let signed = signer().sign(DOC, "ID_doc").unwrap();

        // Smuggle a second element reusing the signed ID.
        let wrapped = format!(
            "<samlp:Response ID=\"ID_doc\"><Evil/>{}</samlp:Response>",
            signed
        );

        assert!(matches!(
            validator().validate(&wrapped),
            Err(SamlError::SignatureWrapped(_))
        ));
    }

    #[test]
    fn reference_must_pin_the_root() {
        // Signed inner element wrapped in an unsigned root with its own ID.
        let inner = signer()
            .sign(
                "<saml:Assertion ID=\"ID_inner\"><saml:Issuer>i</saml:Issuer></saml:Assertion>",
                "ID_inner",
            )
            .unwrap();
        let wrapped = format!("<samlp:Response ID=\"ID_outer\">{inner}</samlp:Response>");

        assert!(matches!(
            validator().validate(&wrapped),
            Err(SamlError::SignatureWrapped(_))
        ));
    }

    #[test]
    fn untrusted_signer_is_rejected() {
        let other_validator = XmlSignatureValidator::new(Vec::new())
            .with_public_keys(vec![vec![0u8; 32]]);
        let signed = signer().sign(DOC, "ID_doc").unwrap();

        assert!(other_validator.validate(&signed).is_err());
    }

    #[test]
    fn redirect_signature_roundtrip() {
        let query = "SAMLRequest=abc&RelayState=xyz&SigAlg=alg";
        let signature = signer().sign_redirect(query).unwrap();

        assert!(validator()
            .validate_redirect(
                query,
                &signature,
                "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"
            )
            .is_ok());

        // One flipped byte in the covered query must fail.
        assert!(validator()
            .validate_redirect(
                "SAMLRequest=abd&RelayState=xyz&SigAlg=alg",
                &signature,
                "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"
            )
            .is_err());
    }
}
