use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::models::workspace::UserSummary;
use crate::AppState;

pub mod handlers;

/// The authenticated caller, resolved once per request by `session_auth`.
#[derive(Clone)]
pub struct CurrentUser(pub UserSummary);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Build the API router.
/// All routes are relative — the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        // Notifications
        .route("/notifications", get(handlers::list_notifications))
        .route("/notifications/unread", get(handlers::unread_count))
        .route(
            "/notifications/:id/read",
            put(handlers::mark_notification_read),
        )
        .route(
            "/notifications/read-all",
            put(handlers::mark_all_notifications_read),
        )
        // Workspaces
        .route("/workspaces", post(handlers::create_workspace))
        .route("/workspaces/:id", delete(handlers::delete_workspace))
        .route(
            "/workspaces/:id/members",
            get(handlers::list_members).post(handlers::add_member),
        )
        .route("/workspaces/:id/projects", post(handlers::create_project))
        // Tasks
        .route(
            "/projects/:id/tasks",
            get(handlers::list_tasks).post(handlers::create_task),
        )
        .route(
            "/tasks/:id",
            get(handlers::get_task)
                .patch(handlers::update_task)
                .delete(handlers::delete_task),
        )
        .route(
            "/tasks/:id/comments",
            get(handlers::list_comments).post(handlers::create_comment),
        )
        .route(
            "/tasks/:id/watch",
            post(handlers::watch_task).delete(handlers::unwatch_task),
        )
        .layer(middleware::from_fn_with_state(state, session_auth))
        .layer(TraceLayer::new_for_http())
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: resolves `Authorization: Bearer <token>` to a user and
/// stashes it in request extensions. 401 if missing or unknown.
async fn session_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    let Some(token) = token else {
        tracing::warn!("api: missing bearer token");
        return Err(AppError::Unauthorized);
    };

    match state.db.session_user(&token).await? {
        Some(u) => {
            req.extensions_mut().insert(CurrentUser(u));
            Ok(next.run(req).await)
        }
        None => {
            tracing::warn!("api: unknown session token");
            Err(AppError::Unauthorized)
        }
    }
}
