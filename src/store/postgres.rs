use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::notification::{Notification, NotificationFeedRow, NoticeDraft};
use crate::models::task::{Comment, Task, TaskStatus};
use crate::models::workspace::{Project, UserSummary, Workspace, WorkspaceMember};
use crate::store::NotificationStore;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- User Operations --

    pub async fn create_user(&self, name: &str, avatar_url: Option<&str>) -> anyhow::Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO users (name, avatar_url) VALUES ($1, $2) RETURNING id",
        )
        .bind(name)
        .bind(avatar_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_user(&self, id: Uuid) -> anyhow::Result<Option<UserSummary>> {
        let row = sqlx::query_as::<_, UserSummary>(
            "SELECT id, name, avatar_url FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // -- Session Operations --

    pub async fn insert_session(&self, token: &str, user_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO sessions (token, user_id) VALUES ($1, $2)")
            .bind(token)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Resolve a bearer session token to its user, touching last_used_at.
    pub async fn session_user(&self, token: &str) -> anyhow::Result<Option<UserSummary>> {
        let row = sqlx::query_as::<_, UserSummary>(
            r#"UPDATE sessions SET last_used_at = NOW()
               FROM users
               WHERE sessions.token = $1 AND users.id = sessions.user_id
               RETURNING users.id, users.name, users.avatar_url"#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // -- Workspace Operations --

    /// Create a workspace and seed its member table with the owner.
    pub async fn create_workspace(&self, name: &str, owner_id: Uuid) -> anyhow::Result<Workspace> {
        let mut tx = self.pool.begin().await?;
        let ws = sqlx::query_as::<_, Workspace>(
            r#"INSERT INTO workspaces (name, owner_id)
               VALUES ($1, $2)
               RETURNING id, name, owner_id, created_at"#,
        )
        .bind(name)
        .bind(owner_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO workspace_members (workspace_id, user_id, role) VALUES ($1, $2, 'owner')",
        )
        .bind(ws.id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ws)
    }

    pub async fn get_workspace(&self, id: Uuid) -> anyhow::Result<Option<Workspace>> {
        let row = sqlx::query_as::<_, Workspace>(
            "SELECT id, name, owner_id, created_at FROM workspaces WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Delete a workspace. Scoped to the owner; every child row
    /// (projects, tasks, comments, notifications, memberships) cascades.
    pub async fn delete_workspace(&self, id: Uuid, owner_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM workspaces WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Add a member. Returns false if the user was already a member.
    pub async fn add_member(&self, workspace_id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"INSERT INTO workspace_members (workspace_id, user_id, role)
               VALUES ($1, $2, 'member')
               ON CONFLICT (workspace_id, user_id) DO NOTHING"#,
        )
        .bind(workspace_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Membership check used by every mutation handler to enforce
    /// workspace isolation.
    pub async fn is_member(&self, workspace_id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM workspace_members WHERE workspace_id = $1 AND user_id = $2)",
        )
        .bind(workspace_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    pub async fn list_members(&self, workspace_id: Uuid) -> anyhow::Result<Vec<WorkspaceMember>> {
        let rows = sqlx::query_as::<_, WorkspaceMember>(
            "SELECT workspace_id, user_id, role, joined_at FROM workspace_members WHERE workspace_id = $1 ORDER BY joined_at ASC",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_member_ids(&self, workspace_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
        let rows = sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM workspace_members WHERE workspace_id = $1",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- Project Operations --

    pub async fn create_project(&self, workspace_id: Uuid, name: &str) -> anyhow::Result<Project> {
        let row = sqlx::query_as::<_, Project>(
            r#"INSERT INTO projects (workspace_id, name)
               VALUES ($1, $2)
               RETURNING id, workspace_id, name, created_at"#,
        )
        .bind(workspace_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_project(&self, id: Uuid) -> anyhow::Result<Option<Project>> {
        let row = sqlx::query_as::<_, Project>(
            "SELECT id, workspace_id, name, created_at FROM projects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // -- Task Operations --

    pub async fn create_task(&self, task: &NewTask) -> anyhow::Result<Task> {
        let row = sqlx::query_as::<_, Task>(
            r#"INSERT INTO tasks (project_id, workspace_id, title, description, assignees, watchers, created_by)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING id, project_id, workspace_id, title, description, status, assignees, watchers, created_by, created_at, updated_at"#,
        )
        .bind(task.project_id)
        .bind(task.workspace_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.assignees)
        .bind(&task.watchers)
        .bind(task.created_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_task(&self, id: Uuid) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query_as::<_, Task>(
            r#"SELECT id, project_id, workspace_id, title, description, status, assignees, watchers, created_by, created_at, updated_at
               FROM tasks WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_tasks(&self, project_id: Uuid) -> anyhow::Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, Task>(
            r#"SELECT id, project_id, workspace_id, title, description, status, assignees, watchers, created_by, created_at, updated_at
               FROM tasks WHERE project_id = $1 ORDER BY created_at ASC"#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Partial update. Absent fields keep their current value.
    /// Returns the updated row, or None if the task does not exist.
    pub async fn update_task(&self, id: Uuid, changes: &TaskChanges) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query_as::<_, Task>(
            r#"UPDATE tasks
               SET title = COALESCE($1, title),
                   description = COALESCE($2, description),
                   status = COALESCE($3, status),
                   assignees = COALESCE($4, assignees),
                   watchers = COALESCE($5, watchers),
                   updated_at = NOW()
               WHERE id = $6
               RETURNING id, project_id, workspace_id, title, description, status, assignees, watchers, created_by, created_at, updated_at"#,
        )
        .bind(&changes.title)
        .bind(&changes.description)
        .bind(changes.status)
        .bind(&changes.assignees)
        .bind(&changes.watchers)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn delete_task(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns false if the user was already watching.
    pub async fn add_watcher(&self, task_id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"UPDATE tasks SET watchers = array_append(watchers, $2), updated_at = NOW()
               WHERE id = $1 AND NOT ($2 = ANY(watchers))"#,
        )
        .bind(task_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_watcher(&self, task_id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"UPDATE tasks SET watchers = array_remove(watchers, $2), updated_at = NOW()
               WHERE id = $1 AND $2 = ANY(watchers)"#,
        )
        .bind(task_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Comment Operations --

    pub async fn insert_comment(
        &self,
        task_id: Uuid,
        author_id: Uuid,
        body: &str,
    ) -> anyhow::Result<Comment> {
        let row = sqlx::query_as::<_, Comment>(
            r#"INSERT INTO comments (task_id, author_id, body)
               VALUES ($1, $2, $3)
               RETURNING id, task_id, author_id, body, created_at"#,
        )
        .bind(task_id)
        .bind(author_id)
        .bind(body)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_comments(&self, task_id: Uuid) -> anyhow::Result<Vec<Comment>> {
        let rows = sqlx::query_as::<_, Comment>(
            "SELECT id, task_id, author_id, body, created_at FROM comments WHERE task_id = $1 ORDER BY created_at ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- Notification Operations --

    pub async fn list_notifications(
        &self,
        recipient_id: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<NotificationFeedRow>> {
        let rows = sqlx::query_as::<_, NotificationFeedRow>(
            r#"SELECT n.id, n.workspace_id, n.recipient_id, n.sender_id, n.kind, n.message,
                      n.entity_id, n.entity_kind, n.is_read, n.created_at,
                      u.name AS sender_name, u.avatar_url AS sender_avatar_url
               FROM notifications n
               JOIN users u ON u.id = n.sender_id
               WHERE n.recipient_id = $1
               ORDER BY n.created_at DESC
               LIMIT $2"#,
        )
        .bind(recipient_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_unread(&self, recipient_id: Uuid) -> anyhow::Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND is_read = false",
        )
        .bind(recipient_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Mark one notification read. Scoped to the recipient so a caller
    /// can never flip another user's record.
    pub async fn mark_read(&self, id: Uuid, recipient_id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = true WHERE id = $1 AND recipient_id = $2",
        )
        .bind(id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark every unread notification for the recipient read.
    /// Returns the number of records that transitioned.
    pub async fn mark_all_read(&self, recipient_id: Uuid) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = true WHERE recipient_id = $1 AND is_read = false",
        )
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    /// Insert a whole cohort in one statement so it is created
    /// atomically or not at all.
    async fn insert_notifications(
        &self,
        sender_id: Uuid,
        draft: &NoticeDraft,
        recipients: &[Uuid],
    ) -> anyhow::Result<Vec<Notification>> {
        if recipients.is_empty() {
            return Ok(vec![]);
        }
        let rows = sqlx::query_as::<_, Notification>(
            r#"INSERT INTO notifications (workspace_id, recipient_id, sender_id, kind, message, entity_id, entity_kind)
               SELECT $1, r.recipient, $2, $3, $4, $5, $6
               FROM UNNEST($7::uuid[]) AS r(recipient)
               RETURNING id, workspace_id, recipient_id, sender_id, kind, message, entity_id, entity_kind, is_read, created_at"#,
        )
        .bind(draft.workspace_id)
        .bind(sender_id)
        .bind(draft.kind)
        .bind(&draft.message)
        .bind(draft.entity_id)
        .bind(draft.entity_kind)
        .bind(recipients)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// -- Input structs --

pub struct NewTask {
    pub project_id: Uuid,
    pub workspace_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assignees: Vec<Uuid>,
    pub watchers: Vec<Uuid>,
    pub created_by: Uuid,
}

/// Field set for partial task updates. None = leave unchanged.
#[derive(Default)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub assignees: Option<Vec<Uuid>>,
    pub watchers: Option<Vec<Uuid>>,
}
