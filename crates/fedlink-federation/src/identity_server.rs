//! IDP-side session registry.
//!
//! Tracks, per IDP session, which service providers hold assertions and
//! which logout legs are in transit. Single logout pops participants off a
//! stack one at a time; the session is invalidated only when both the stack
//! and the in-transit set are empty.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::info;

/// Log the active-session count every this many create/destroy events.
const SESSION_LOG_INTERVAL: u64 = 100;

#[derive(Debug, Default)]
struct SessionParticipants {
    /// Providers holding an assertion, in registration order. Logout pops
    /// from the back.
    stack: Vec<String>,
    /// Binding preference per provider URL. Kept after the provider is
    /// popped so the response leg still knows how to reach it.
    post_binding: HashMap<String, bool>,
    /// Providers a LogoutRequest has been sent to, awaiting their response.
    in_transit: HashSet<String>,
    /// The provider that initiated global logout, with the ID of its
    /// LogoutRequest. Answered last.
    original_requester: Option<(String, String)>,
    /// ID of the assertion issued for this session.
    assertion_id: Option<String>,
}

/// Registry of IDP sessions and their service provider participants.
#[derive(Debug, Default)]
pub struct IdentityServer {
    sessions: Mutex<HashMap<String, SessionParticipants>>,
    events: Mutex<u64>,
}

impl IdentityServer {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records session creation.
    pub fn session_created(&self, session_id: &str) {
        let mut sessions = self.lock();
        sessions.entry(session_id.to_string()).or_default();
        let active = sessions.len();
        drop(sessions);
        self.maybe_log(active);
    }

    /// Drops all state for a session.
    pub fn session_destroyed(&self, session_id: &str) {
        let mut sessions = self.lock();
        sessions.remove(session_id);
        let active = sessions.len();
        drop(sessions);
        self.maybe_log(active);
    }

    /// Number of sessions currently tracked.
    #[must_use]
    pub fn total_sessions(&self) -> usize {
        self.lock().len()
    }

    /// Registers a service provider as a participant of the session.
    ///
    /// Re-registering an already-present participant only updates its
    /// binding preference.
    pub fn register(&self, session_id: &str, provider_url: &str, post_binding: bool) {
        let mut sessions = self.lock();
        let entry = sessions.entry(session_id.to_string()).or_default();
        if !entry.stack.iter().any(|p| p == provider_url) {
            entry.stack.push(provider_url.to_string());
        }
        entry
            .post_binding
            .insert(provider_url.to_string(), post_binding);
    }

    /// Removes a specific participant without touching the in-transit set.
    pub fn remove_participant(&self, session_id: &str, provider_url: &str) {
        let mut sessions = self.lock();
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.stack.retain(|p| p != provider_url);
        }
    }

    /// The participant a logout would go to next, without removing it.
    #[must_use]
    pub fn peek_participant(&self, session_id: &str) -> Option<String> {
        self.lock()
            .get(session_id)
            .and_then(|e| e.stack.last().cloned())
    }

    /// Pops the next participant to send a logout request to.
    #[must_use]
    pub fn pop_participant(&self, session_id: &str) -> Option<String> {
        let mut sessions = self.lock();
        sessions.get_mut(session_id).and_then(|e| e.stack.pop())
    }

    /// Number of participants still holding assertions.
    #[must_use]
    pub fn participant_count(&self, session_id: &str) -> usize {
        self.lock()
            .get(session_id)
            .map_or(0, |e| e.stack.len())
    }

    /// Marks a participant as having a logout request in transit.
    pub fn register_in_transit(&self, session_id: &str, provider_url: &str) {
        let mut sessions = self.lock();
        sessions
            .entry(session_id.to_string())
            .or_default()
            .in_transit
            .insert(provider_url.to_string());
    }

    /// Clears the in-transit mark once the participant responded.
    pub fn deregister_in_transit(&self, session_id: &str, provider_url: &str) {
        let mut sessions = self.lock();
        if let Some(entry) = sessions.get_mut(session_id) {
            entry.in_transit.remove(provider_url);
        }
    }

    /// Number of logout legs still awaiting a response.
    #[must_use]
    pub fn in_transit_count(&self, session_id: &str) -> usize {
        self.lock()
            .get(session_id)
            .map_or(0, |e| e.in_transit.len())
    }

    /// Whether a participant prefers the POST binding. Defaults to POST
    /// when the participant never declared a preference.
    #[must_use]
    pub fn uses_post_binding(&self, session_id: &str, provider_url: &str) -> bool {
        self.lock()
            .get(session_id)
            .and_then(|e| e.post_binding.get(provider_url).copied())
            .unwrap_or(true)
    }

    /// Remembers which provider initiated global logout and the ID of its
    /// request, so the final response can answer it.
    pub fn set_original_requester(&self, session_id: &str, provider_url: &str, request_id: &str) {
        let mut sessions = self.lock();
        sessions
            .entry(session_id.to_string())
            .or_default()
            .original_requester = Some((provider_url.to_string(), request_id.to_string()));
    }

    /// Takes the original logout requester and request ID, clearing them.
    #[must_use]
    pub fn take_original_requester(&self, session_id: &str) -> Option<(String, String)> {
        let mut sessions = self.lock();
        sessions
            .get_mut(session_id)
            .and_then(|e| e.original_requester.take())
    }

    /// Associates the issued assertion with the session.
    pub fn set_assertion_id(&self, session_id: &str, assertion_id: &str) {
        let mut sessions = self.lock();
        sessions
            .entry(session_id.to_string())
            .or_default()
            .assertion_id = Some(assertion_id.to_string());
    }

    /// The assertion issued for this session, if any.
    #[must_use]
    pub fn assertion_id(&self, session_id: &str) -> Option<String> {
        self.lock()
            .get(session_id)
            .and_then(|e| e.assertion_id.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionParticipants>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn maybe_log(&self, active: usize) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        *events += 1;
        if *events % SESSION_LOG_INTERVAL == 0 {
            info!(active_sessions = active, "session registry checkpoint");
        }
    }
}
