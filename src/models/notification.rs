use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed set of events a notification can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum NotificationKind {
    TaskAssigned,
    TaskStatus,
    TaskUpdated,
    CommentAdded,
    Mentioned,
    AddedToWorkspace,
}

/// Which table `entity_id` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum EntityKind {
    Task,
    Comment,
    Project,
    Workspace,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub recipient_id: Uuid,
    pub sender_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub entity_id: Option<Uuid>,
    pub entity_kind: Option<EntityKind>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// One notification joined with its sender for feed display.
#[derive(Debug, Serialize, sqlx::FromRow, Clone)]
pub struct NotificationFeedRow {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub recipient_id: Uuid,
    pub sender_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub entity_id: Option<Uuid>,
    pub entity_kind: Option<EntityKind>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub sender_name: String,
    pub sender_avatar_url: Option<String>,
}

/// Everything a cohort of notifications shares except the recipient.
/// The dispatcher fills in sender and recipients; one draft produces
/// one batch insert.
#[derive(Debug, Clone)]
pub struct NoticeDraft {
    pub workspace_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
    pub entity_id: Option<Uuid>,
    pub entity_kind: Option<EntityKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&NotificationKind::TaskAssigned).unwrap();
        assert_eq!(json, "\"task_assigned\"");
        let json = serde_json::to_string(&NotificationKind::AddedToWorkspace).unwrap();
        assert_eq!(json, "\"added_to_workspace\"");
    }

    #[test]
    fn entity_kind_serializes_lowercase() {
        let json = serde_json::to_string(&EntityKind::Task).unwrap();
        assert_eq!(json, "\"task\"");
    }
}
