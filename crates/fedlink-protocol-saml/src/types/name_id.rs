//! SAML Name ID types.

use serde::{Deserialize, Serialize};

use super::NameIdFormat;

/// Identifier of a subject in assertions and logout requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameId {
    /// The identifier value.
    pub value: String,

    /// The format URI of the identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// The domain that qualifies the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_qualifier: Option<String>,
}

impl NameId {
    /// Creates a name ID with no declared format.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            format: None,
            name_qualifier: None,
        }
    }

    /// Creates an email-format name ID.
    #[must_use]
    pub fn email(email: impl Into<String>) -> Self {
        Self::new(email).with_format(NameIdFormat::Email)
    }

    /// Creates a persistent-format name ID.
    #[must_use]
    pub fn persistent(value: impl Into<String>) -> Self {
        Self::new(value).with_format(NameIdFormat::Persistent)
    }

    /// Sets the format.
    #[must_use]
    pub fn with_format(mut self, format: NameIdFormat) -> Self {
        self.format = Some(format.uri().to_string());
        self
    }

    /// Sets the name qualifier.
    #[must_use]
    pub fn with_name_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.name_qualifier = Some(qualifier.into());
        self
    }

    /// Returns the parsed format, defaulting to unspecified.
    #[must_use]
    pub fn parsed_format(&self) -> NameIdFormat {
        self.format
            .as_deref()
            .and_then(NameIdFormat::from_uri)
            .unwrap_or_default()
    }
}

/// Name ID policy carried in authentication requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameIdPolicy {
    /// The requested name ID format URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Whether the IDP may create a new identifier for the principal.
    #[serde(default)]
    pub allow_create: bool,
}

impl NameIdPolicy {
    /// Creates a policy requesting a specific format.
    #[must_use]
    pub fn with_format(format: NameIdFormat) -> Self {
        Self {
            format: Some(format.uri().to_string()),
            allow_create: false,
        }
    }

    /// Sets whether new identifiers can be created.
    #[must_use]
    pub const fn allow_create(mut self, allow: bool) -> Self {
        self.allow_create = allow;
        self
    }
}
