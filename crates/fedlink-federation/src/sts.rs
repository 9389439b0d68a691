//! Security token service.
//!
//! Issues and cancels assertions for the identity provider. The service is
//! constructed explicitly and handed to the components that need it; there
//! is no process-global instance.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{Duration, Utc};
use fedlink_protocol_saml::{
    saml_id, Assertion, AuthnStatement, Conditions, NameId, Subject, SubjectConfirmation,
};

use crate::session::Principal;

/// Parameters for one assertion issuance.
#[derive(Debug, Clone)]
pub struct IssueRequest<'a> {
    /// The authenticated principal.
    pub principal: &'a Principal,
    /// Entity ID allowed to consume the assertion.
    pub audience: &'a str,
    /// The AuthnRequest this assertion answers.
    pub in_response_to: &'a str,
    /// Where the assertion will be presented.
    pub recipient: &'a str,
    /// Reuse a previously issued assertion ID, keeping it stable across
    /// re-issues within a session so logout can correlate the token.
    pub existing_assertion_id: Option<&'a str>,
}

/// Issues and cancels SAML assertions.
pub struct SecurityTokenService {
    issuer: String,
    token_validity: Duration,
    issued: Mutex<HashSet<String>>,
}

impl SecurityTokenService {
    /// Creates a service issuing for the given entity.
    #[must_use]
    pub fn new(issuer: impl Into<String>, token_validity_secs: u64) -> Self {
        Self {
            issuer: issuer.into(),
            token_validity: Duration::seconds(token_validity_secs.min(i64::MAX as u64) as i64),
            issued: Mutex::new(HashSet::new()),
        }
    }

    /// The configured token validity.
    #[must_use]
    pub const fn token_validity(&self) -> Duration {
        self.token_validity
    }

    /// Issues an assertion and records its ID.
    #[must_use]
    pub fn issue(&self, request: &IssueRequest<'_>) -> Assertion {
        let now = Utc::now();
        let id = request
            .existing_assertion_id
            .map_or_else(saml_id, str::to_string);

        let subject = Subject::new(NameId::new(&request.principal.name)).with_confirmation(
            SubjectConfirmation::bearer()
                .in_response_to(request.in_response_to)
                .with_recipient(request.recipient),
        );

        let assertion = Assertion::with_id(&id, &self.issuer)
            .with_subject(subject)
            .with_conditions(
                Conditions::starting_at(now, self.token_validity)
                    .with_audience(request.audience),
            )
            .with_authn_statement(
                AuthnStatement::new(AuthnStatement::PASSWORD_PROTECTED_TRANSPORT)
                    .with_session_index(&id),
            );

        self.issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
        assertion
    }

    /// Cancels an issued assertion. Returns false when the ID is unknown.
    pub fn cancel(&self, assertion_id: &str) -> bool {
        self.issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(assertion_id)
    }

    /// True while the assertion is issued and not cancelled.
    #[must_use]
    pub fn is_issued(&self, assertion_id: &str) -> bool {
        self.issued
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(assertion_id)
    }
}
