//! Presence registry tests, run through the injectable trait object
//! exactly the way the server holds it.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use herald::fanout::LiveMessage;
use herald::presence::{ConnectionHandle, LocalPresence, Presence};

fn connect(
    presence: &Arc<dyn Presence>,
    user_id: Uuid,
) -> (Uuid, mpsc::UnboundedReceiver<LiveMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = ConnectionHandle::new(tx);
    let id = conn.id();
    presence.register(user_id, conn);
    (id, rx)
}

#[test]
fn registry_isolates_users() {
    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let (_a, _rx_a) = connect(&presence, alice);
    assert_eq!(presence.lookup(alice).len(), 1);
    assert!(presence.lookup(bob).is_empty());
}

#[test]
fn second_connection_keeps_the_first_resolvable() {
    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let user = Uuid::new_v4();

    let (first, _rx1) = connect(&presence, user);
    let (second, _rx2) = connect(&presence, user);

    let ids: Vec<Uuid> = presence.lookup(user).iter().map(|c| c.id()).collect();
    assert!(ids.contains(&first));
    assert!(ids.contains(&second));
    assert_eq!(presence.connection_count(), 2);
}

#[test]
fn disconnect_then_reconnect_round_trip() {
    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let user = Uuid::new_v4();

    let (conn_id, _rx) = connect(&presence, user);
    presence.unregister(conn_id);
    assert!(presence.lookup(user).is_empty());

    let (_again, _rx2) = connect(&presence, user);
    assert_eq!(presence.lookup(user).len(), 1);
}

#[test]
fn unregister_unknown_connection_is_a_noop() {
    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let user = Uuid::new_v4();
    let (_conn, _rx) = connect(&presence, user);

    presence.unregister(Uuid::new_v4());
    assert_eq!(presence.connection_count(), 1);
}

#[test]
fn sweep_only_touches_dead_connections() {
    let presence: Arc<dyn Presence> = Arc::new(LocalPresence::new());
    let user = Uuid::new_v4();

    let (_live_id, _rx_live) = connect(&presence, user);
    let (dead_id, rx_dead) = connect(&presence, user);
    drop(rx_dead);

    assert_eq!(presence.sweep(), 1);
    let remaining = presence.lookup(user);
    assert_eq!(remaining.len(), 1);
    assert_ne!(remaining[0].id(), dead_id);

    // A second sweep finds nothing new.
    assert_eq!(presence.sweep(), 0);
}
