use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::CurrentUser;
use crate::errors::AppError;
use crate::fanout::{BoardChange, BoardEvent, NoticePayload};
use crate::models::notification::{EntityKind, NotificationKind, NoticeDraft};
use crate::models::task::{Comment, Task, TaskStatus};
use crate::models::workspace::{Project, UserSummary, Workspace, WorkspaceMember};
use crate::store::postgres::{NewTask, TaskChanges};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct FeedParams {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct NotificationFeed {
    pub notifications: Vec<NoticePayload>,
    pub unread: i64,
}

#[derive(Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub assignees: Option<Vec<Uuid>>,
    pub watchers: Option<Vec<Uuid>>,
}

#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub assignees: Option<Vec<Uuid>>,
    pub watchers: Option<Vec<Uuid>>,
}

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub body: String,
    /// Users explicitly @-mentioned in the body, resolved client-side.
    pub mentions: Option<Vec<Uuid>>,
}

// ── Helpers ──────────────────────────────────────────────────

async fn require_member(
    state: &AppState,
    workspace_id: Uuid,
    user_id: Uuid,
) -> Result<(), AppError> {
    if state.db.is_member(workspace_id, user_id).await? {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "to do",
        TaskStatus::InProgress => "in progress",
        TaskStatus::Done => "done",
    }
}

fn board_change(task: &Task, comment_id: Option<Uuid>, actor_id: Uuid) -> BoardChange {
    BoardChange {
        workspace_id: task.workspace_id,
        project_id: task.project_id,
        task_id: task.id,
        comment_id,
        actor_id,
    }
}

// ── Notification Handlers ────────────────────────────────────

/// GET /api/v1/notifications — the caller's feed plus unread count
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<FeedParams>,
) -> Result<Json<NotificationFeed>, AppError> {
    let limit = params.limit.unwrap_or(state.config.feed_limit).clamp(1, 100);

    let rows = state.db.list_notifications(user.id, limit).await?;
    let unread = state.db.count_unread(user.id).await?;

    let notifications = rows
        .into_iter()
        .map(|r| NoticePayload {
            id: r.id,
            workspace_id: r.workspace_id,
            recipient_id: r.recipient_id,
            kind: r.kind,
            message: r.message,
            entity_id: r.entity_id,
            entity_kind: r.entity_kind,
            is_read: r.is_read,
            created_at: r.created_at,
            sender: UserSummary {
                id: r.sender_id,
                name: r.sender_name,
                avatar_url: r.sender_avatar_url,
            },
        })
        .collect();

    Ok(Json(NotificationFeed {
        notifications,
        unread,
    }))
}

/// GET /api/v1/notifications/unread — unread count only
pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.db.count_unread(user.id).await?;
    Ok(Json(json!({ "count": count })))
}

/// PUT /api/v1/notifications/:id/read — mark one read
///
/// Scoped to the caller; another user's notification is a 404.
pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let found = state.db.mark_read(id, user.id).await?;
    if !found {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({ "success": true })))
}

/// PUT /api/v1/notifications/read-all — mark all of the caller's read
pub async fn mark_all_notifications_read(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let updated = state.db.mark_all_read(user.id).await?;
    Ok(Json(json!({ "updated": updated })))
}

// ── Workspace Handlers ───────────────────────────────────────

/// POST /api/v1/workspaces — create a workspace, caller becomes owner
pub async fn create_workspace(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<CreateWorkspaceRequest>,
) -> Result<(StatusCode, Json<Workspace>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("workspace name must not be empty".into()));
    }

    let ws = state.db.create_workspace(payload.name.trim(), user.id).await?;
    Ok((StatusCode::CREATED, Json(ws)))
}

/// DELETE /api/v1/workspaces/:id — owner only; cascades everything,
/// notifications included
pub async fn delete_workspace(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let deleted = state.db.delete_workspace(id, user.id).await?;
    if !deleted {
        return Err(AppError::NotFound);
    }
    Ok(Json(json!({ "deleted": true })))
}

/// GET /api/v1/workspaces/:id/members — list members
pub async fn list_members(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<WorkspaceMember>>, AppError> {
    require_member(&state, id, user.id).await?;
    let members = state.db.list_members(id).await?;
    Ok(Json(members))
}

/// POST /api/v1/workspaces/:id/members — add a member
pub async fn add_member(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddMemberRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let ws = state.db.get_workspace(id).await?.ok_or(AppError::NotFound)?;
    require_member(&state, ws.id, user.id).await?;

    let added = state.db.add_member(ws.id, payload.user_id).await?;
    if added {
        state
            .fanout
            .notify(
                &user,
                &[payload.user_id],
                NoticeDraft {
                    workspace_id: ws.id,
                    kind: NotificationKind::AddedToWorkspace,
                    message: format!("{} added you to \"{}\"", user.name, ws.name),
                    entity_id: Some(ws.id),
                    entity_kind: Some(EntityKind::Workspace),
                },
            )
            .await;
    }

    Ok(Json(json!({ "added": added })))
}

/// POST /api/v1/workspaces/:id/projects — create a project
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::Validation("project name must not be empty".into()));
    }
    require_member(&state, id, user.id).await?;

    let project = state.db.create_project(id, payload.name.trim()).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

// ── Task Handlers ────────────────────────────────────────────

/// GET /api/v1/projects/:id/tasks
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Task>>, AppError> {
    let project = state.db.get_project(id).await?.ok_or(AppError::NotFound)?;
    require_member(&state, project.workspace_id, user.id).await?;

    let tasks = state.db.list_tasks(project.id).await?;
    Ok(Json(tasks))
}

/// POST /api/v1/projects/:id/tasks — create a task
///
/// Initial assignees are notified; every other workspace member gets a
/// board refresh.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    if payload.title.trim().is_empty() {
        return Err(AppError::Validation("task title must not be empty".into()));
    }
    let project = state.db.get_project(id).await?.ok_or(AppError::NotFound)?;
    require_member(&state, project.workspace_id, user.id).await?;

    let task = state
        .db
        .create_task(&NewTask {
            project_id: project.id,
            workspace_id: project.workspace_id,
            title: payload.title.trim().to_string(),
            description: payload.description,
            assignees: payload.assignees.unwrap_or_default(),
            watchers: payload.watchers.unwrap_or_default(),
            created_by: user.id,
        })
        .await?;

    state
        .fanout
        .notify(
            &user,
            &task.assignees,
            NoticeDraft {
                workspace_id: task.workspace_id,
                kind: NotificationKind::TaskAssigned,
                message: format!("{} assigned you to \"{}\"", user.name, task.title),
                entity_id: Some(task.id),
                entity_kind: Some(EntityKind::Task),
            },
        )
        .await;

    let members = state.db.list_member_ids(task.workspace_id).await?;
    state.fanout.broadcast(
        user.id,
        &members,
        BoardEvent::TaskCreated(board_change(&task, None, user.id)),
    );

    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /api/v1/tasks/:id
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    let task = state.db.get_task(id).await?.ok_or(AppError::NotFound)?;
    require_member(&state, task.workspace_id, user.id).await?;
    Ok(Json(task))
}

/// PATCH /api/v1/tasks/:id — partial update
///
/// Newly-added assignees are told they were assigned; the rest of the
/// audience (assignees + watchers) hears about a status change or, failing
/// that, a content change. One notification per user per mutation.
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTaskRequest>,
) -> Result<Json<Task>, AppError> {
    let prev = state.db.get_task(id).await?.ok_or(AppError::NotFound)?;
    require_member(&state, prev.workspace_id, user.id).await?;

    if let Some(ref title) = payload.title {
        if title.trim().is_empty() {
            return Err(AppError::Validation("task title must not be empty".into()));
        }
    }

    let changes = TaskChanges {
        title: payload.title.map(|t| t.trim().to_string()),
        description: payload.description,
        status: payload.status,
        assignees: payload.assignees,
        watchers: payload.watchers,
    };
    let content_changed = changes.title.is_some() || changes.description.is_some();

    let task = state
        .db
        .update_task(id, &changes)
        .await?
        .ok_or(AppError::NotFound)?;

    let newly_assigned: Vec<Uuid> = task
        .assignees
        .iter()
        .copied()
        .filter(|a| !prev.assignees.contains(a))
        .collect();

    if !newly_assigned.is_empty() {
        state
            .fanout
            .notify(
                &user,
                &newly_assigned,
                NoticeDraft {
                    workspace_id: task.workspace_id,
                    kind: NotificationKind::TaskAssigned,
                    message: format!("{} assigned you to \"{}\"", user.name, task.title),
                    entity_id: Some(task.id),
                    entity_kind: Some(EntityKind::Task),
                },
            )
            .await;
    }

    // Everyone already on the task, minus the just-assigned cohort.
    let audience: Vec<Uuid> = task
        .assignees
        .iter()
        .chain(task.watchers.iter())
        .copied()
        .filter(|u| !newly_assigned.contains(u))
        .collect();

    let status_changed = task.status != prev.status;
    if status_changed {
        state
            .fanout
            .notify(
                &user,
                &audience,
                NoticeDraft {
                    workspace_id: task.workspace_id,
                    kind: NotificationKind::TaskStatus,
                    message: format!(
                        "{} moved \"{}\" to {}",
                        user.name,
                        task.title,
                        status_label(task.status)
                    ),
                    entity_id: Some(task.id),
                    entity_kind: Some(EntityKind::Task),
                },
            )
            .await;
    } else if content_changed {
        state
            .fanout
            .notify(
                &user,
                &audience,
                NoticeDraft {
                    workspace_id: task.workspace_id,
                    kind: NotificationKind::TaskUpdated,
                    message: format!("{} updated \"{}\"", user.name, task.title),
                    entity_id: Some(task.id),
                    entity_kind: Some(EntityKind::Task),
                },
            )
            .await;
    }

    let members = state.db.list_member_ids(task.workspace_id).await?;
    state.fanout.broadcast(
        user.id,
        &members,
        BoardEvent::TaskUpdated(board_change(&task, None, user.id)),
    );

    Ok(Json(task))
}

/// DELETE /api/v1/tasks/:id — no persisted notification, board refresh only
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let task = state.db.get_task(id).await?.ok_or(AppError::NotFound)?;
    require_member(&state, task.workspace_id, user.id).await?;

    let deleted = state.db.delete_task(task.id).await?;
    if deleted {
        let members = state.db.list_member_ids(task.workspace_id).await?;
        state.fanout.broadcast(
            user.id,
            &members,
            BoardEvent::TaskDeleted(board_change(&task, None, user.id)),
        );
    }

    Ok(Json(json!({ "deleted": deleted })))
}

// ── Comment Handlers ─────────────────────────────────────────

/// GET /api/v1/tasks/:id/comments
pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Comment>>, AppError> {
    let task = state.db.get_task(id).await?.ok_or(AppError::NotFound)?;
    require_member(&state, task.workspace_id, user.id).await?;

    let comments = state.db.list_comments(task.id).await?;
    Ok(Json(comments))
}

/// POST /api/v1/tasks/:id/comments — comment on a task
///
/// Mentioned members are told they were mentioned; remaining assignees
/// and watchers get a plain comment notification.
pub async fn create_comment(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    if payload.body.trim().is_empty() {
        return Err(AppError::Validation("comment body must not be empty".into()));
    }
    let task = state.db.get_task(id).await?.ok_or(AppError::NotFound)?;
    require_member(&state, task.workspace_id, user.id).await?;

    let comment = state.db.insert_comment(task.id, user.id, &payload.body).await?;

    let members = state.db.list_member_ids(task.workspace_id).await?;

    // A mention of someone outside the workspace is dropped.
    let mentioned: Vec<Uuid> = payload
        .mentions
        .unwrap_or_default()
        .into_iter()
        .filter(|m| members.contains(m))
        .collect();

    if !mentioned.is_empty() {
        state
            .fanout
            .notify(
                &user,
                &mentioned,
                NoticeDraft {
                    workspace_id: task.workspace_id,
                    kind: NotificationKind::Mentioned,
                    message: format!(
                        "{} mentioned you in a comment on \"{}\"",
                        user.name, task.title
                    ),
                    entity_id: Some(comment.id),
                    entity_kind: Some(EntityKind::Comment),
                },
            )
            .await;
    }

    let audience: Vec<Uuid> = task
        .assignees
        .iter()
        .chain(task.watchers.iter())
        .copied()
        .filter(|u| !mentioned.contains(u))
        .collect();

    state
        .fanout
        .notify(
            &user,
            &audience,
            NoticeDraft {
                workspace_id: task.workspace_id,
                kind: NotificationKind::CommentAdded,
                message: format!("{} commented on \"{}\"", user.name, task.title),
                entity_id: Some(comment.id),
                entity_kind: Some(EntityKind::Comment),
            },
        )
        .await;

    state.fanout.broadcast(
        user.id,
        &members,
        BoardEvent::NewComment(board_change(&task, Some(comment.id), user.id)),
    );

    Ok((StatusCode::CREATED, Json(comment)))
}

// ── Watch Handlers ───────────────────────────────────────────

/// POST /api/v1/tasks/:id/watch
pub async fn watch_task(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let task = state.db.get_task(id).await?.ok_or(AppError::NotFound)?;
    require_member(&state, task.workspace_id, user.id).await?;

    state.db.add_watcher(task.id, user.id).await?;
    Ok(Json(json!({ "watching": true })))
}

/// DELETE /api/v1/tasks/:id/watch
pub async fn unwatch_task(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let task = state.db.get_task(id).await?.ok_or(AppError::NotFound)?;
    require_member(&state, task.workspace_id, user.id).await?;

    state.db.remove_watcher(task.id, user.id).await?;
    Ok(Json(json!({ "watching": false })))
}
