//! SAML Assertion types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SamlError, SamlResult};

use super::{confirmation_methods, saml_id, NameId, SAML_VERSION};

/// A package of statements about a subject, issued by an identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assertion {
    /// Unique identifier for this assertion.
    pub id: String,

    /// SAML protocol version (always "2.0").
    pub version: String,

    /// Timestamp when this assertion was issued.
    pub issue_instant: DateTime<Utc>,

    /// The entity ID of the issuing identity provider.
    pub issuer: String,

    /// The subject of this assertion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,

    /// Validity conditions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,

    /// How and when the subject authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authn_statement: Option<AuthnStatement>,

    /// Attribute statements about the subject.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attribute_statements: Vec<AttributeStatement>,
}

impl Assertion {
    /// Creates a new assertion.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            id: saml_id(),
            version: SAML_VERSION.to_string(),
            issue_instant: Utc::now(),
            issuer: issuer.into(),
            subject: None,
            conditions: None,
            authn_statement: None,
            attribute_statements: Vec::new(),
        }
    }

    /// Creates a new assertion reusing a previously issued ID.
    ///
    /// The IDP keeps the assertion ID stable across re-issues within a
    /// session so logout can correlate the token.
    #[must_use]
    pub fn with_id(id: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::new(issuer)
        }
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Sets the conditions.
    #[must_use]
    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Sets the authentication statement.
    #[must_use]
    pub fn with_authn_statement(mut self, statement: AuthnStatement) -> Self {
        self.authn_statement = Some(statement);
        self
    }

    /// Adds an attribute statement.
    #[must_use]
    pub fn with_attribute_statement(mut self, statement: AttributeStatement) -> Self {
        self.attribute_statements.push(statement);
        self
    }

    /// Returns the subject's name ID value, if any.
    #[must_use]
    pub fn principal_name(&self) -> Option<&str> {
        self.subject
            .as_ref()
            .and_then(|s| s.name_id.as_ref())
            .map(|n| n.value.as_str())
    }

    /// Checks the validity window at the given instant.
    ///
    /// The window is inclusive at `not_before` and exclusive at
    /// `not_on_or_after`: an assertion checked exactly at `not_on_or_after`
    /// has expired.
    ///
    /// # Errors
    ///
    /// Returns `AssertionNotYetValid` or `AssertionExpired` when the instant
    /// falls outside the window.
    pub fn check_validity(&self, now: DateTime<Utc>) -> SamlResult<()> {
        if let Some(ref conditions) = self.conditions {
            if let Some(not_before) = conditions.not_before {
                if now < not_before {
                    return Err(SamlError::AssertionNotYetValid);
                }
            }
            if let Some(not_on_or_after) = conditions.not_on_or_after {
                if now >= not_on_or_after {
                    return Err(SamlError::AssertionExpired);
                }
            }
        }
        Ok(())
    }

    /// Validates structure, issuer, audience and validity window.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first failed check.
    pub fn validate(&self, audience: &str, now: DateTime<Utc>) -> SamlResult<()> {
        if self.version != SAML_VERSION {
            return Err(SamlError::InvalidAssertion(format!(
                "unsupported SAML version: {}",
                self.version
            )));
        }

        self.check_validity(now)?;

        if let Some(ref conditions) = self.conditions {
            if !conditions.audiences.is_empty()
                && !conditions.audiences.iter().any(|a| a == audience)
            {
                return Err(SamlError::InvalidAssertion(format!(
                    "audience restriction does not include {audience}"
                )));
            }
        }

        Ok(())
    }

    /// Collects role attribute values from all attribute statements.
    #[must_use]
    pub fn roles(&self, role_attribute: &str) -> Vec<String> {
        self.attribute_statements
            .iter()
            .flat_map(|s| s.attributes.iter())
            .filter(|a| a.name == role_attribute)
            .flat_map(|a| a.values.iter().cloned())
            .collect()
    }
}

/// Subject of an assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    /// The name identifier for the subject.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_id: Option<NameId>,

    /// Subject confirmations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confirmations: Vec<SubjectConfirmation>,
}

impl Subject {
    /// Creates a new subject with a name ID.
    #[must_use]
    pub fn new(name_id: NameId) -> Self {
        Self {
            name_id: Some(name_id),
            confirmations: Vec::new(),
        }
    }

    /// Adds a subject confirmation.
    #[must_use]
    pub fn with_confirmation(mut self, confirmation: SubjectConfirmation) -> Self {
        self.confirmations.push(confirmation);
        self
    }
}

/// Subject confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectConfirmation {
    /// The confirmation method URI.
    pub method: String,

    /// The request ID this confirmation responds to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,

    /// The location where the assertion may be presented.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    /// Confirmation expiry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_on_or_after: Option<DateTime<Utc>>,
}

impl SubjectConfirmation {
    /// Creates a bearer confirmation.
    #[must_use]
    pub fn bearer() -> Self {
        Self {
            method: confirmation_methods::BEARER.to_string(),
            in_response_to: None,
            recipient: None,
            not_on_or_after: None,
        }
    }

    /// Sets the request this confirmation responds to.
    #[must_use]
    pub fn in_response_to(mut self, request_id: impl Into<String>) -> Self {
        self.in_response_to = Some(request_id.into());
        self
    }

    /// Sets the recipient URL.
    #[must_use]
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }
}

/// Conditions bounding assertion validity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conditions {
    /// Inclusive start of the validity window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    /// Exclusive end of the validity window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_on_or_after: Option<DateTime<Utc>>,

    /// Entity IDs allowed to consume the assertion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,
}

impl Conditions {
    /// Creates conditions spanning `validity` starting at `not_before`.
    #[must_use]
    pub fn starting_at(not_before: DateTime<Utc>, validity: chrono::Duration) -> Self {
        Self {
            not_before: Some(not_before),
            not_on_or_after: Some(not_before + validity),
            audiences: Vec::new(),
        }
    }

    /// Adds an audience restriction.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audiences.push(audience.into());
        self
    }
}

/// Authentication statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthnStatement {
    /// The time of authentication.
    pub authn_instant: DateTime<Utc>,

    /// Session index correlating the assertion with the IDP session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_index: Option<String>,

    /// Authentication context class reference URI.
    pub authn_context_class_ref: String,
}

impl AuthnStatement {
    /// Password-over-protected-transport context class.
    pub const PASSWORD_PROTECTED_TRANSPORT: &'static str =
        "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport";

    /// Previous-session (SSO) context class.
    pub const PREVIOUS_SESSION: &'static str =
        "urn:oasis:names:tc:SAML:2.0:ac:classes:PreviousSession";

    /// Creates an authentication statement for the given context class.
    #[must_use]
    pub fn new(authn_context_class_ref: impl Into<String>) -> Self {
        Self {
            authn_instant: Utc::now(),
            session_index: None,
            authn_context_class_ref: authn_context_class_ref.into(),
        }
    }

    /// Sets the session index.
    #[must_use]
    pub fn with_session_index(mut self, index: impl Into<String>) -> Self {
        self.session_index = Some(index.into());
        self
    }
}

/// Attribute statement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeStatement {
    /// List of attributes.
    pub attributes: Vec<Attribute>,
}

impl AttributeStatement {
    /// Creates an empty attribute statement.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            attributes: Vec::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, attr: Attribute) -> Self {
        self.attributes.push(attr);
        self
    }

    /// Builds the statement carrying the principal's roles.
    #[must_use]
    pub fn roles(role_attribute: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            attributes: vec![Attribute {
                name: role_attribute.into(),
                values: roles,
            }],
        }
    }
}

/// SAML attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    /// The attribute name.
    pub name: String,

    /// The attribute values.
    pub values: Vec<String>,
}

impl Attribute {
    /// Creates an attribute with a single value.
    #[must_use]
    pub fn single(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: vec![value.into()],
        }
    }
}
