pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::notification::{Notification, NoticeDraft};

/// The seam the fan-out dispatcher writes through.
/// Production: `PgStore`. Tests inject doubles to exercise the
/// swallowed-failure contract without a live database.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist one notification per recipient as a single batch.
    /// Implementations must make the cohort atomic: all records are
    /// created or none are.
    async fn insert_notifications(
        &self,
        sender_id: Uuid,
        draft: &NoticeDraft,
        recipients: &[Uuid],
    ) -> anyhow::Result<Vec<Notification>>;
}
