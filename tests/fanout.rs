//! Fan-out pipeline tests.
//!
//! These run against in-memory doubles for the store and the presence
//! registry, so no Postgres is required. They verify:
//! 1. One record per distinct recipient, self-notifications suppressed
//! 2. Live pushes reach exactly the connections registered at creation time
//! 3. Store failures are swallowed — callers never see an error
//! 4. Board broadcasts are ephemeral and skip the actor

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use herald::fanout::{BoardChange, BoardEvent, Dispatcher, LiveMessage};
use herald::models::notification::{EntityKind, Notification, NotificationKind, NoticeDraft};
use herald::models::workspace::UserSummary;
use herald::presence::{ConnectionHandle, LocalPresence, Presence};
use herald::store::NotificationStore;

// ── Doubles ───────────────────────────────────────────────────

/// In-memory notification store. Records every insert; optionally
/// fails to simulate an unavailable database.
#[derive(Default)]
struct MemoryStore {
    records: Mutex<Vec<Notification>>,
    batches: AtomicUsize,
    fail: bool,
}

impl MemoryStore {
    fn new() -> Self {
        Self::default()
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn records(&self) -> Vec<Notification> {
        self.records.lock().unwrap().clone()
    }

    fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notifications(
        &self,
        sender_id: Uuid,
        draft: &NoticeDraft,
        recipients: &[Uuid],
    ) -> anyhow::Result<Vec<Notification>> {
        if self.fail {
            anyhow::bail!("store unavailable");
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        let rows: Vec<Notification> = recipients
            .iter()
            .map(|r| Notification {
                id: Uuid::new_v4(),
                workspace_id: draft.workspace_id,
                recipient_id: *r,
                sender_id,
                kind: draft.kind,
                message: draft.message.clone(),
                entity_id: draft.entity_id,
                entity_kind: draft.entity_kind,
                is_read: false,
                created_at: Utc::now(),
            })
            .collect();
        self.records.lock().unwrap().extend(rows.clone());
        Ok(rows)
    }
}

fn sender(name: &str) -> UserSummary {
    UserSummary {
        id: Uuid::new_v4(),
        name: name.into(),
        avatar_url: None,
    }
}

fn draft(kind: NotificationKind) -> NoticeDraft {
    NoticeDraft {
        workspace_id: Uuid::new_v4(),
        kind,
        message: "test".into(),
        entity_id: Some(Uuid::new_v4()),
        entity_kind: Some(EntityKind::Task),
    }
}

/// Open a live connection for the user and return the receiving end.
fn connect(
    presence: &LocalPresence,
    user_id: Uuid,
) -> mpsc::UnboundedReceiver<LiveMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    presence.register(user_id, ConnectionHandle::new(tx));
    rx
}

fn drain(rx: &mut mpsc::UnboundedReceiver<LiveMessage>) -> Vec<LiveMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

// ── Cohort creation ───────────────────────────────────────────

#[tokio::test]
async fn notify_creates_one_record_per_distinct_recipient() {
    let store = Arc::new(MemoryStore::new());
    let presence = Arc::new(LocalPresence::new());
    let dispatcher = Dispatcher::new(store.clone(), presence);

    let actor = sender("ada");
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();

    // Duplicates and the actor herself must collapse out.
    dispatcher
        .notify(
            &actor,
            &[b, actor.id, c, b],
            draft(NotificationKind::CommentAdded),
        )
        .await;

    let records = store.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.recipient_id != r.sender_id));
    assert!(records.iter().all(|r| !r.is_read));
    // One triggering event, one batch.
    assert_eq!(store.batch_count(), 1);
}

#[tokio::test]
async fn notify_with_only_the_actor_is_a_silent_noop() {
    let store = Arc::new(MemoryStore::new());
    let presence = Arc::new(LocalPresence::new());
    let dispatcher = Dispatcher::new(store.clone(), presence);

    let actor = sender("ada");
    dispatcher
        .notify(&actor, &[actor.id], draft(NotificationKind::TaskUpdated))
        .await;

    assert!(store.records().is_empty());
    assert_eq!(store.batch_count(), 0);
}

// ── Live delivery ─────────────────────────────────────────────

#[tokio::test]
async fn notify_pushes_to_live_recipients_and_skips_offline_ones() {
    let store = Arc::new(MemoryStore::new());
    let presence = Arc::new(LocalPresence::new());
    let dispatcher = Dispatcher::new(store.clone(), presence.clone());

    let actor = sender("ada");
    let online = Uuid::new_v4();
    let offline = Uuid::new_v4();
    let mut rx = connect(&presence, online);

    dispatcher
        .notify(
            &actor,
            &[online, offline],
            draft(NotificationKind::TaskAssigned),
        )
        .await;

    // Both records exist regardless of connectivity.
    assert_eq!(store.records().len(), 2);

    // Exactly one push for the online recipient, zero for the offline one.
    let msgs = drain(&mut rx);
    assert_eq!(msgs.len(), 1);
    match &msgs[0] {
        LiveMessage::NewNotification(payload) => {
            assert_eq!(payload.recipient_id, online);
            assert_eq!(payload.kind, NotificationKind::TaskAssigned);
            assert_eq!(payload.sender.name, "ada");
            assert!(!payload.is_read);
        }
        other => panic!("expected newNotification, got {:?}", other),
    }
}

#[tokio::test]
async fn notify_reaches_every_connection_of_a_recipient() {
    let store = Arc::new(MemoryStore::new());
    let presence = Arc::new(LocalPresence::new());
    let dispatcher = Dispatcher::new(store.clone(), presence.clone());

    let actor = sender("ada");
    let user = Uuid::new_v4();
    let mut laptop = connect(&presence, user);
    let mut phone = connect(&presence, user);

    dispatcher
        .notify(&actor, &[user], draft(NotificationKind::Mentioned))
        .await;

    assert_eq!(drain(&mut laptop).len(), 1);
    assert_eq!(drain(&mut phone).len(), 1);
    // Still a single record: connections multiply pushes, not rows.
    assert_eq!(store.records().len(), 1);
}

/// A assigns a task to B and C. B is also watching and online; C is
/// offline. Two records, one push.
#[tokio::test]
async fn assignment_scenario_two_records_one_push() {
    let store = Arc::new(MemoryStore::new());
    let presence = Arc::new(LocalPresence::new());
    let dispatcher = Dispatcher::new(store.clone(), presence.clone());

    let a = sender("a");
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    let mut rx_b = connect(&presence, b);

    // B appears twice (assignee + watcher) and must still get one record.
    dispatcher
        .notify(&a, &[b, c, b], draft(NotificationKind::TaskAssigned))
        .await;

    let records = store.records();
    assert_eq!(records.len(), 2);
    let recipients: Vec<Uuid> = records.iter().map(|r| r.recipient_id).collect();
    assert!(recipients.contains(&b));
    assert!(recipients.contains(&c));

    assert_eq!(drain(&mut rx_b).len(), 1);
}

// ── Failure handling ──────────────────────────────────────────

#[tokio::test]
async fn store_failure_is_swallowed_and_nothing_is_pushed() {
    let store = Arc::new(MemoryStore::failing());
    let presence = Arc::new(LocalPresence::new());
    let dispatcher = Dispatcher::new(store.clone(), presence.clone());

    let actor = sender("ada");
    let recipient = Uuid::new_v4();
    let mut rx = connect(&presence, recipient);

    // Must not panic or surface an error to the caller.
    dispatcher
        .notify(&actor, &[recipient], draft(NotificationKind::TaskStatus))
        .await;

    assert!(store.records().is_empty());
    // No record, no push: pushes only follow successful inserts.
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn push_to_dropped_connection_is_not_an_error() {
    let store = Arc::new(MemoryStore::new());
    let presence = Arc::new(LocalPresence::new());
    let dispatcher = Dispatcher::new(store.clone(), presence.clone());

    let actor = sender("ada");
    let recipient = Uuid::new_v4();
    let rx = connect(&presence, recipient);
    drop(rx); // socket died without unregistering

    dispatcher
        .notify(&actor, &[recipient], draft(NotificationKind::TaskUpdated))
        .await;

    // The record still exists; only the push was skipped.
    assert_eq!(store.records().len(), 1);
}

// ── Board broadcasts ──────────────────────────────────────────

#[tokio::test]
async fn broadcast_reaches_other_members_but_never_the_actor_or_the_store() {
    let store = Arc::new(MemoryStore::new());
    let presence = Arc::new(LocalPresence::new());
    let dispatcher = Dispatcher::new(store.clone(), presence.clone());

    let actor_id = Uuid::new_v4();
    let member = Uuid::new_v4();
    let mut actor_rx = connect(&presence, actor_id);
    let mut member_rx = connect(&presence, member);

    let change = BoardChange {
        workspace_id: Uuid::new_v4(),
        project_id: Uuid::new_v4(),
        task_id: Uuid::new_v4(),
        comment_id: None,
        actor_id,
    };
    dispatcher.broadcast(
        actor_id,
        &[actor_id, member],
        BoardEvent::TaskUpdated(change),
    );

    assert!(drain(&mut actor_rx).is_empty());
    let msgs = drain(&mut member_rx);
    assert_eq!(msgs.len(), 1);
    assert!(matches!(msgs[0], LiveMessage::TaskUpdated(_)));

    // Ephemeral by contract: nothing persisted.
    assert!(store.records().is_empty());
}
