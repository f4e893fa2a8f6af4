//! Session Registry
//!
//! Maps identities to their live connections and routes outbound events to
//! the right sessions. This is the only holder of connection state: handlers
//! never touch a shared map directly, they go through `register`,
//! `unregister`, `sessions_of`, `identity_of` and `dispatch`.
//!
//! No guard from the internal maps is ever held across an await point;
//! dispatch copies the session-id snapshot out first.

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::application::events::{Outbound, Route, ServerEvent};
use crate::application::services::LiveRoster;

/// One live connection bound to exactly one identity.
pub struct ConnectedSession {
    pub identity: i64,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

/// Registry of live sessions and the identity → sessions index.
pub struct SessionRegistry {
    sessions: DashMap<Uuid, ConnectedSession>,
    identity_index: DashMap<i64, Vec<Uuid>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            identity_index: DashMap::new(),
        }
    }

    /// Register a live session. Idempotent per session id; a second session
    /// for the same identity is added alongside the first (multi-device).
    /// Returns true when this is the identity's first live session.
    pub fn register(
        &self,
        identity: i64,
        session_id: Uuid,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> bool {
        if self.sessions.contains_key(&session_id) {
            return false;
        }

        self.sessions
            .insert(session_id, ConnectedSession { identity, sender });

        let mut sessions = self.identity_index.entry(identity).or_default();
        let first = sessions.is_empty();
        sessions.push(session_id);

        tracing::info!(identity, session_id = %session_id, first, "Session registered");
        first
    }

    /// Unregister a session. A duplicate disconnect is a no-op. Returns the
    /// owning identity and whether this was its last live session.
    pub fn unregister(&self, session_id: &Uuid) -> Option<(i64, bool)> {
        let (_, session) = self.sessions.remove(session_id)?;
        let identity = session.identity;

        let last = {
            let mut sessions = match self.identity_index.get_mut(&identity) {
                Some(sessions) => sessions,
                None => return Some((identity, true)),
            };
            sessions.retain(|s| s != session_id);
            sessions.is_empty()
        };
        if last {
            self.identity_index.remove_if(&identity, |_, v| v.is_empty());
        }

        tracing::info!(identity, session_id = %session_id, last, "Session unregistered");
        Some((identity, last))
    }

    /// Snapshot of the identity's live session ids.
    pub fn sessions_of(&self, identity: i64) -> Vec<Uuid> {
        self.identity_index
            .get(&identity)
            .map(|sessions| sessions.clone())
            .unwrap_or_default()
    }

    /// The identity a session belongs to, if it is still live.
    pub fn identity_of(&self, session_id: &Uuid) -> Option<i64> {
        self.sessions.get(session_id).map(|s| s.identity)
    }

    /// Total live session count.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Route an outbound event to its target sessions. Send failures mean
    /// the connection is tearing down; the disconnect path cleans up.
    pub fn dispatch(&self, outbound: &Outbound) {
        match &outbound.route {
            Route::All => {
                for session in self.sessions.iter() {
                    if Some(*session.key()) == outbound.exclude {
                        continue;
                    }
                    let _ = session.sender.send(outbound.event.clone());
                }
            }
            Route::Identity(identity) => {
                for session_id in self.sessions_of(*identity) {
                    if Some(session_id) == outbound.exclude {
                        continue;
                    }
                    if let Some(session) = self.sessions.get(&session_id) {
                        let _ = session.sender.send(outbound.event.clone());
                    }
                }
            }
            Route::Session(session_id) => {
                if let Some(session) = self.sessions.get(session_id) {
                    let _ = session.sender.send(outbound.event.clone());
                }
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveRoster for SessionRegistry {
    fn is_online(&self, identity: i64) -> bool {
        self.identity_index
            .get(&identity)
            .map(|sessions| !sessions.is_empty())
            .unwrap_or(false)
    }

    fn live_session_count(&self, identity: i64) -> usize {
        self.identity_index
            .get(&identity)
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::ServerEvent;

    fn channel() -> (
        mpsc::UnboundedSender<ServerEvent>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn first_and_subsequent_registrations() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();

        let device1 = Uuid::new_v4();
        let device2 = Uuid::new_v4();
        assert!(registry.register(1, device1, tx.clone()));
        assert!(!registry.register(1, device2, tx.clone()));
        assert_eq!(registry.live_session_count(1), 2);
        assert_eq!(registry.identity_of(&device1), Some(1));
    }

    #[test]
    fn duplicate_register_is_a_noop() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();

        let session = Uuid::new_v4();
        assert!(registry.register(1, session, tx.clone()));
        assert!(!registry.register(1, session, tx));
        assert_eq!(registry.live_session_count(1), 1);
    }

    #[test]
    fn unregister_reports_last_session_and_tolerates_duplicates() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = channel();

        let device1 = Uuid::new_v4();
        let device2 = Uuid::new_v4();
        registry.register(1, device1, tx.clone());
        registry.register(1, device2, tx);

        assert_eq!(registry.unregister(&device1), Some((1, false)));
        assert_eq!(registry.unregister(&device2), Some((1, true)));
        assert_eq!(registry.unregister(&device2), None);
        assert!(!registry.is_online(1));
    }

    #[tokio::test]
    async fn dispatch_routes_and_respects_exclusions() {
        let registry = SessionRegistry::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();

        let session_a = Uuid::new_v4();
        let session_b = Uuid::new_v4();
        registry.register(1, session_a, tx_a);
        registry.register(1, session_b, tx_b);

        registry.dispatch(&Outbound::to_identity_excluding(
            1,
            session_a,
            ServerEvent::Pong,
        ));

        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }
}
