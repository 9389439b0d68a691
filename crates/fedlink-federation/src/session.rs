//! Provider-side session state.
//!
//! The in-flight SSO exchange is typed state on the session instead of
//! loose string attributes, and is cleared explicitly when the exchange
//! completes.

use std::collections::HashMap;
use std::sync::Mutex;

/// An authenticated user attached to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Subject name from the assertion's NameID.
    pub name: String,
    /// Roles granted by the identity provider.
    pub roles: Vec<String>,
}

impl Principal {
    /// Creates a principal with no roles.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: Vec::new(),
        }
    }

    /// Sets the granted roles.
    #[must_use]
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}

/// State of a single SSO protocol exchange in flight on a session.
#[derive(Debug, Clone, Default)]
pub struct SsoExchange {
    /// ID of the request this session is waiting on a response for.
    pub pending_request_id: Option<String>,
    /// Relay state to match against the response.
    pub relay_state: Option<String>,
}

impl SsoExchange {
    /// True when no exchange is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending_request_id.is_none() && self.relay_state.is_none()
    }
}

/// A provider-side session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Opaque session identifier.
    pub id: String,
    /// Authenticated principal, once the exchange completes.
    pub principal: Option<Principal>,
    /// ID of the assertion that authenticated this session. Kept for
    /// logout correlation and assertion re-issue continuity.
    pub assertion_id: Option<String>,
    /// The in-flight exchange, if any.
    pub exchange: SsoExchange,
}

impl Session {
    /// Creates an empty session.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Clears the in-flight exchange after it completes.
    pub fn clear_exchange(&mut self) {
        self.exchange = SsoExchange::default();
    }
}

/// Storage for provider-side sessions, keyed by opaque session id.
pub trait SessionStore: Send + Sync {
    /// Returns the session, creating an empty one when absent.
    fn get_or_create(&self, session_id: &str) -> Session;

    /// Returns the session if it exists.
    fn get(&self, session_id: &str) -> Option<Session>;

    /// Persists the session.
    fn save(&self, session: Session);

    /// Invalidates the session.
    fn remove(&self, session_id: &str);
}

/// Process-local session store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get_or_create(&self, session_id: &str) -> Session {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id))
            .clone()
    }

    fn get(&self, session_id: &str) -> Option<Session> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).cloned()
    }

    fn save(&self, session: Session) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(session.id.clone(), session);
    }

    fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
    }
}
