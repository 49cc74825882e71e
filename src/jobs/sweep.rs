//! Background job: evict dead live connections.
//!
//! A socket task unregisters its connection on clean close, but a task
//! that is killed mid-write leaves a closed channel behind in the
//! registry. The sweep drops those entries and keeps the connection
//! gauge honest.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::metrics::metrics;
use crate::presence::Presence;

/// Spawn the background sweep task. Call this once at startup.
pub fn spawn(presence: Arc<dyn Presence>) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let evicted = presence.sweep();
            metrics()
                .live_connections
                .set(presence.connection_count() as i64);
            if evicted > 0 {
                tracing::info!(evicted, "presence sweep evicted dead connections");
            }
        }
    });
}
