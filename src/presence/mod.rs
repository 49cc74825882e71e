//! Presence registry: which users currently hold an open live connection.
//!
//! Process-local only. A deployment with multiple server processes will
//! deliver live pushes solely to users connected to the same process;
//! offline users catch up from the notification feed endpoint.

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::fanout::LiveMessage;

/// Handle to one live connection's outbound queue.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<LiveMessage>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<LiveMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a message for the socket task to drain.
    /// Returns false if the connection has already gone away.
    pub fn push(&self, msg: LiveMessage) -> bool {
        self.tx.send(msg).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Injectable registry of live connections.
///
/// One user may hold several connections at once (laptop + phone);
/// `lookup` returns every live handle so pushes reach all of them.
pub trait Presence: Send + Sync {
    /// Add a connection for the user. Appends; never replaces.
    fn register(&self, user_id: Uuid, conn: ConnectionHandle);

    /// Remove the connection with the given id, wherever it is registered.
    fn unregister(&self, conn_id: Uuid);

    /// All live connections for the user, or empty if absent.
    fn lookup(&self, user_id: Uuid) -> Vec<ConnectionHandle>;

    /// Total registered connections across all users.
    fn connection_count(&self) -> usize;

    /// Drop connections whose channel has closed without a clean
    /// disconnect. Returns the number evicted.
    fn sweep(&self) -> usize;
}

/// Process-local implementation backed by a concurrent multimap.
#[derive(Default)]
pub struct LocalPresence {
    inner: DashMap<Uuid, Vec<ConnectionHandle>>,
}

impl LocalPresence {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }
}

impl Presence for LocalPresence {
    fn register(&self, user_id: Uuid, conn: ConnectionHandle) {
        self.inner.entry(user_id).or_default().push(conn);
    }

    fn unregister(&self, conn_id: Uuid) {
        self.inner.retain(|_, conns| {
            conns.retain(|c| c.id != conn_id);
            !conns.is_empty()
        });
    }

    fn lookup(&self, user_id: Uuid) -> Vec<ConnectionHandle> {
        self.inner
            .get(&user_id)
            .map(|conns| conns.value().clone())
            .unwrap_or_default()
    }

    fn connection_count(&self) -> usize {
        self.inner.iter().map(|entry| entry.value().len()).sum()
    }

    fn sweep(&self) -> usize {
        let before = self.connection_count();
        self.inner.retain(|_, conns| {
            conns.retain(|c| !c.is_closed());
            !conns.is_empty()
        });
        before - self.connection_count()
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<LiveMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionHandle::new(tx), rx)
    }

    #[test]
    fn lookup_absent_user_is_empty() {
        let presence = LocalPresence::new();
        assert!(presence.lookup(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn register_appends_instead_of_replacing() {
        let presence = LocalPresence::new();
        let user = Uuid::new_v4();
        let (a, _rx_a) = handle();
        let (b, _rx_b) = handle();
        let a_id = a.id();
        let b_id = b.id();

        presence.register(user, a);
        presence.register(user, b);

        let conns = presence.lookup(user);
        assert_eq!(conns.len(), 2);
        assert!(conns.iter().any(|c| c.id() == a_id));
        assert!(conns.iter().any(|c| c.id() == b_id));
    }

    #[test]
    fn unregister_removes_only_the_matching_connection() {
        let presence = LocalPresence::new();
        let user = Uuid::new_v4();
        let (a, _rx_a) = handle();
        let (b, _rx_b) = handle();
        let a_id = a.id();
        let b_id = b.id();

        presence.register(user, a);
        presence.register(user, b);
        presence.unregister(a_id);

        let conns = presence.lookup(user);
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].id(), b_id);
    }

    #[test]
    fn unregister_last_connection_drops_the_user_entry() {
        let presence = LocalPresence::new();
        let user = Uuid::new_v4();
        let (a, _rx) = handle();
        let a_id = a.id();

        presence.register(user, a);
        presence.unregister(a_id);

        assert!(presence.lookup(user).is_empty());
        assert_eq!(presence.connection_count(), 0);
    }

    #[test]
    fn sweep_evicts_closed_channels() {
        let presence = LocalPresence::new();
        let user = Uuid::new_v4();
        let (a, rx_a) = handle();
        let (b, _rx_b) = handle();

        presence.register(user, a);
        presence.register(user, b);
        drop(rx_a);

        assert_eq!(presence.sweep(), 1);
        assert_eq!(presence.lookup(user).len(), 1);
    }
}
