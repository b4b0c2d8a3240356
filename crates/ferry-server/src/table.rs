//! The per-node session table: `user -> { session_id -> SessionHandle }`.
//!
//! All mutators take the writer lock; lookups copy handles out so no lock
//! is ever held across an await or a socket operation. Closing evicted or
//! removed sessions happens in the caller, out of lock.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::info;

use ferry_proto::Transport;

use crate::session::SessionHandle;

#[derive(Default)]
pub struct SessionTable {
    inner: RwLock<HashMap<String, HashMap<String, SessionHandle>>>,
}

/// Result of removing one session.
pub struct Unregistered {
    pub session: Option<SessionHandle>,
    /// True when the user has no sessions left on this node.
    pub last_for_user: bool,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session. When the new session is a binary transport, any
    /// JSON WebSocket sessions the user has on this node are removed and
    /// returned; the caller closes them out of lock (arbitration rule).
    pub fn register(&self, handle: SessionHandle) -> Vec<SessionHandle> {
        let user = handle.user().to_string();
        let mut evicted = Vec::new();

        let mut inner = self.inner.write().expect("session table poisoned");
        let sessions = inner.entry(user.clone()).or_default();

        if handle.transport().is_binary() {
            let json_ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.transport() == Transport::WsJson)
                .map(|(id, _)| id.clone())
                .collect();
            for id in json_ids {
                if let Some(old) = sessions.remove(&id) {
                    evicted.push(old);
                }
            }
        }

        info!(
            user = %user,
            transport = %handle.transport(),
            session_id = %handle.session_id(),
            evicted = evicted.len(),
            "session registered"
        );
        sessions.insert(handle.session_id().to_string(), handle);
        evicted
    }

    /// Remove one session by id.
    pub fn unregister(&self, user: &str, session_id: &str) -> Unregistered {
        let mut inner = self.inner.write().expect("session table poisoned");
        let Some(sessions) = inner.get_mut(user) else {
            return Unregistered {
                session: None,
                last_for_user: false,
            };
        };

        let session = sessions.remove(session_id);
        let last_for_user = sessions.is_empty();
        if last_for_user {
            inner.remove(user);
        }

        if session.is_some() {
            info!(user, session_id, last_for_user, "session unregistered");
        }
        Unregistered {
            session,
            last_for_user,
        }
    }

    /// The user's sessions in delivery priority order
    /// (`tcp-bin > ws-bin > ws-json`).
    pub fn sessions_for(&self, user: &str) -> Vec<SessionHandle> {
        let inner = self.inner.read().expect("session table poisoned");
        let mut sessions: Vec<SessionHandle> = inner
            .get(user)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        sessions.sort_by_key(|s| s.transport().priority());
        sessions
    }

    pub fn contains(&self, user: &str) -> bool {
        self.inner
            .read()
            .expect("session table poisoned")
            .contains_key(user)
    }

    /// All users with at least one session on this node (heartbeat input).
    pub fn users(&self) -> Vec<String> {
        self.inner
            .read()
            .expect("session table poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.inner
            .read()
            .expect("session table poisoned")
            .values()
            .map(|m| m.len())
            .sum()
    }

    /// Remove and return every session (node shutdown).
    pub fn drain_all(&self) -> Vec<SessionHandle> {
        let mut inner = self.inner.write().expect("session table poisoned");
        inner
            .drain()
            .flat_map(|(_, sessions)| sessions.into_values())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing;

    fn session(user: &str, transport: Transport) -> SessionHandle {
        let (handle, rx) = testing::session(user, transport);
        // Keep the queue alive for the duration of the test.
        std::mem::forget(rx);
        handle
    }

    #[test]
    fn binary_session_evicts_json_session() {
        let table = SessionTable::new();
        let json = session("u1", Transport::WsJson);
        let json_id = json.session_id().to_string();

        assert!(table.register(json).is_empty());
        let evicted = table.register(session("u1", Transport::WsBinary));

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].session_id(), json_id);
        let remaining = table.sessions_for("u1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].transport(), Transport::WsBinary);
    }

    #[test]
    fn same_transport_sessions_coexist() {
        let table = SessionTable::new();
        table.register(session("u1", Transport::TcpBinary));
        let evicted = table.register(session("u1", Transport::TcpBinary));

        assert!(evicted.is_empty());
        assert_eq!(table.sessions_for("u1").len(), 2);
    }

    #[test]
    fn json_session_does_not_evict_binary() {
        let table = SessionTable::new();
        table.register(session("u1", Transport::TcpBinary));
        let evicted = table.register(session("u1", Transport::WsJson));

        assert!(evicted.is_empty());
        assert_eq!(table.sessions_for("u1").len(), 2);
    }

    #[test]
    fn sessions_are_priority_ordered() {
        let table = SessionTable::new();
        table.register(session("u1", Transport::WsJson));
        table.register(session("u1", Transport::TcpBinary));

        let ordered = table.sessions_for("u1");
        assert_eq!(ordered[0].transport(), Transport::TcpBinary);
        assert_eq!(ordered.last().unwrap().transport(), Transport::WsJson);
    }

    #[test]
    fn unregister_reports_last_session() {
        let table = SessionTable::new();
        let a = session("u1", Transport::WsJson);
        let b = session("u1", Transport::WsJson);
        let (a_id, b_id) = (a.session_id().to_string(), b.session_id().to_string());
        table.register(a);
        table.register(b);

        let first = table.unregister("u1", &a_id);
        assert!(first.session.is_some());
        assert!(!first.last_for_user);

        let second = table.unregister("u1", &b_id);
        assert!(second.session.is_some());
        assert!(second.last_for_user);
        assert!(!table.contains("u1"));
    }

    #[test]
    fn unregister_unknown_session_is_a_no_op() {
        let table = SessionTable::new();
        table.register(session("u1", Transport::WsJson));

        let outcome = table.unregister("u1", "missing-id");
        assert!(outcome.session.is_none());
        assert!(!outcome.last_for_user);
        assert!(table.contains("u1"));

        let other = table.unregister("u2", "whatever");
        assert!(other.session.is_none());
    }

    #[test]
    fn drain_all_empties_the_table() {
        let table = SessionTable::new();
        table.register(session("u1", Transport::WsJson));
        table.register(session("u2", Transport::TcpBinary));

        let drained = table.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(table.session_count(), 0);
    }
}
