//! Notification fan-out.
//!
//! One triggering event (task update, comment, assignment, invite)
//! produces a cohort of notification records plus best-effort live
//! pushes. Two message kinds share the socket with different
//! guarantees:
//!
//! - notices are persisted first, then pushed (`newNotification`);
//!   an offline recipient sees the record on next feed fetch
//! - board events are fire-and-forget cache invalidation
//!   (`taskCreated`, `taskUpdated`, `taskDeleted`, `newComment`)
//!
//! Fan-out never fails the primary mutation: store errors are logged,
//! counted, and swallowed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::metrics::metrics;
use crate::models::notification::{EntityKind, Notification, NotificationKind, NoticeDraft};
use crate::models::workspace::UserSummary;
use crate::presence::Presence;
use crate::store::NotificationStore;

// ── Wire messages ─────────────────────────────────────────────

/// Everything that can travel down a live connection.
/// Serializes as `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum LiveMessage {
    NewNotification(NoticePayload),
    TaskCreated(BoardChange),
    TaskUpdated(BoardChange),
    TaskDeleted(BoardChange),
    NewComment(BoardChange),
}

/// A persisted notification with the sender expanded for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticePayload {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub entity_id: Option<Uuid>,
    pub entity_kind: Option<EntityKind>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub sender: UserSummary,
}

impl NoticePayload {
    fn from_record(n: Notification, sender: UserSummary) -> Self {
        Self {
            id: n.id,
            workspace_id: n.workspace_id,
            recipient_id: n.recipient_id,
            kind: n.kind,
            message: n.message,
            entity_id: n.entity_id,
            entity_kind: n.entity_kind,
            is_read: n.is_read,
            created_at: n.created_at,
            sender,
        }
    }
}

/// Coordinates of a board-level change, enough for a client to
/// invalidate its cache. Never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardChange {
    pub workspace_id: Uuid,
    pub project_id: Uuid,
    pub task_id: Uuid,
    pub comment_id: Option<Uuid>,
    pub actor_id: Uuid,
}

/// The ephemeral message kind. Kept distinct from notices so the two
/// delivery guarantees cannot be mixed up at a call site.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    TaskCreated(BoardChange),
    TaskUpdated(BoardChange),
    TaskDeleted(BoardChange),
    NewComment(BoardChange),
}

impl From<BoardEvent> for LiveMessage {
    fn from(event: BoardEvent) -> Self {
        match event {
            BoardEvent::TaskCreated(c) => LiveMessage::TaskCreated(c),
            BoardEvent::TaskUpdated(c) => LiveMessage::TaskUpdated(c),
            BoardEvent::TaskDeleted(c) => LiveMessage::TaskDeleted(c),
            BoardEvent::NewComment(c) => LiveMessage::NewComment(c),
        }
    }
}

// ── Dispatcher ────────────────────────────────────────────────

/// Owned by the shared application state; every mutation handler ends
/// in calls to it.
pub struct Dispatcher {
    store: Arc<dyn NotificationStore>,
    presence: Arc<dyn Presence>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn NotificationStore>, presence: Arc<dyn Presence>) -> Self {
        Self { store, presence }
    }

    /// Persist one notification per recipient, then push to every live
    /// connection of each recipient.
    ///
    /// The sender is removed from the cohort and duplicates collapse, so
    /// recipient == sender records cannot exist. Errors never propagate:
    /// the triggering mutation has already succeeded and must report
    /// success regardless.
    pub async fn notify(&self, sender: &UserSummary, recipients: &[Uuid], draft: NoticeDraft) {
        let cohort = dedup_without(recipients, sender.id);
        if cohort.is_empty() {
            return;
        }

        let created = match self
            .store
            .insert_notifications(sender.id, &draft, &cohort)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                metrics().fanout_failures.with_label_values(&["insert"]).inc();
                tracing::error!(
                    workspace_id = %draft.workspace_id,
                    kind = ?draft.kind,
                    cohort = cohort.len(),
                    error = %e,
                    "notification insert failed; cohort lost"
                );
                return;
            }
        };
        metrics().notifications_created.inc_by(created.len() as u64);

        for record in created {
            let recipient = record.recipient_id;
            let payload = NoticePayload::from_record(record, sender.clone());
            for conn in self.presence.lookup(recipient) {
                metrics().live_pushes.with_label_values(&["notice"]).inc();
                if !conn.push(LiveMessage::NewNotification(payload.clone())) {
                    // Closed channel at push time counts as absent.
                    tracing::debug!(%recipient, conn_id = %conn.id(), "notice push to closed connection skipped");
                }
            }
        }
    }

    /// Push a board event to every other member's live connections.
    /// Nothing is persisted; a disconnected member simply misses it.
    pub fn broadcast(&self, actor_id: Uuid, members: &[Uuid], event: BoardEvent) {
        let msg: LiveMessage = event.into();
        for member in dedup_without(members, actor_id) {
            for conn in self.presence.lookup(member) {
                metrics().live_pushes.with_label_values(&["board"]).inc();
                if !conn.push(msg.clone()) {
                    tracing::debug!(%member, conn_id = %conn.id(), "board push to closed connection skipped");
                }
            }
        }
    }
}

/// Audience minus the acting user, duplicates collapsed, order kept.
fn dedup_without(ids: &[Uuid], excluded: Uuid) -> Vec<Uuid> {
    let mut seen = std::collections::HashSet::new();
    ids.iter()
        .copied()
        .filter(|id| *id != excluded && seen.insert(*id))
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_removes_actor_and_duplicates() {
        let actor = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let cohort = dedup_without(&[b, actor, c, b], actor);
        assert_eq!(cohort, vec![b, c]);
    }

    #[test]
    fn dedup_of_actor_only_is_empty() {
        let actor = Uuid::new_v4();
        assert!(dedup_without(&[actor, actor], actor).is_empty());
    }

    #[test]
    fn live_message_event_names_match_the_client_contract() {
        let change = BoardChange {
            workspace_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            comment_id: None,
            actor_id: Uuid::new_v4(),
        };
        for (event, name) in [
            (BoardEvent::TaskCreated(change.clone()), "taskCreated"),
            (BoardEvent::TaskUpdated(change.clone()), "taskUpdated"),
            (BoardEvent::TaskDeleted(change.clone()), "taskDeleted"),
            (BoardEvent::NewComment(change.clone()), "newComment"),
        ] {
            let msg: LiveMessage = event.into();
            let json = serde_json::to_value(&msg).unwrap();
            assert_eq!(json["event"], name);
            assert!(json["data"]["taskId"].is_string());
        }
    }

    #[test]
    fn notice_payload_serializes_with_expanded_sender() {
        let sender = UserSummary {
            id: Uuid::new_v4(),
            name: "ada".into(),
            avatar_url: None,
        };
        let record = Notification {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            sender_id: sender.id,
            kind: NotificationKind::TaskAssigned,
            message: "ada assigned you to \"ship it\"".into(),
            entity_id: Some(Uuid::new_v4()),
            entity_kind: Some(EntityKind::Task),
            is_read: false,
            created_at: Utc::now(),
        };
        let payload = NoticePayload::from_record(record, sender.clone());
        let json = serde_json::to_value(LiveMessage::NewNotification(payload)).unwrap();
        assert_eq!(json["event"], "newNotification");
        assert_eq!(json["data"]["sender"]["name"], "ada");
        assert_eq!(json["data"]["kind"], "task_assigned");
        assert_eq!(json["data"]["isRead"], false);
    }
}
