//! Concurrency-safe session id → session mapping

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use vd_protocol::SessionId;

use super::lifecycle::Session;

/// Live sessions indexed by id.
///
/// Lookups on different keys proceed in parallel; `create` is an atomic
/// check-and-insert, so two racing creates for one id yield one winner.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Insert `session` unless its id is taken.
    ///
    /// Returns the registered session and whether the id already existed; on
    /// a duplicate the existing session is returned and `session` is left
    /// unregistered.
    pub fn create(&self, session: Arc<Session>) -> (Arc<Session>, bool) {
        match self.sessions.entry(session.id().clone()) {
            Entry::Occupied(existing) => (Arc::clone(existing.get()), true),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&session));
                (session, false)
            }
        }
    }

    /// Get a session by id
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|r| Arc::clone(&r))
    }

    /// Remove whatever session is registered under `id`
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Remove `session` only if it is still the one registered under its id.
    ///
    /// A late cleanup must never evict a newer session that reused the id.
    pub fn remove_if_same(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
