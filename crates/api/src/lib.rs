//! Vigie public API façade (in-process).
//!
//! This crate defines the stable trait frontends (CLI/GUI) depend on.
//! The in-proc implementation wraps the engine directly; a remote (RPC)
//! implementation can slot in behind the same trait later.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use vigie_engine::{Engine, NotificationsHandle, ReconcileSummary};

pub use vigie_core::{Notification, NotificationKind};
pub use vigie_engine::NotificationSnapshot;

/// API errors suitable for transport over RPC later.
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
pub enum VigieError {
    #[error("feed: {0}")]
    Feed(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type VigieResult<T> = Result<T, VigieError>;

/// Declarative notification surface consumed by frontends.
#[async_trait::async_trait]
pub trait VigieApi: Send + Sync {
    /// Current notification list, newest first, capped at 30.
    async fn notifications(&self) -> VigieResult<Vec<Notification>>;

    /// Count of notifications with `is_read == false`.
    async fn unread_count(&self) -> VigieResult<usize>;

    /// True if any unread notification still drives the pulsing badge.
    async fn has_new_notifications(&self) -> VigieResult<bool>;

    /// Acknowledge one notification by id. Idempotent.
    async fn mark_as_read(&self, notification_id: &str) -> VigieResult<()>;

    /// Acknowledge everything in one batch.
    async fn mark_all_as_read(&self) -> VigieResult<()>;

    /// Run one reconciliation pass now (panel open, pull-to-refresh).
    async fn refresh_notifications(&self) -> VigieResult<ReconcileSummary>;
}

// ----------------- In-process implementation -----------------

/// In-process implementation calling the engine directly.
pub struct InProcApi {
    engine: Arc<Engine>,
    handle: NotificationsHandle,
}

impl InProcApi {
    pub fn new(engine: Arc<Engine>) -> Self {
        let handle = engine.handle();
        Self { engine, handle }
    }

    /// Read-side handle for consumers that want epoch wakeups.
    pub fn handle(&self) -> NotificationsHandle {
        self.handle.clone()
    }
}

#[async_trait::async_trait]
impl VigieApi for InProcApi {
    async fn notifications(&self) -> VigieResult<Vec<Notification>> {
        Ok(self.handle.current().notifications.clone())
    }

    async fn unread_count(&self) -> VigieResult<usize> {
        Ok(self.handle.current().unread_count)
    }

    async fn has_new_notifications(&self) -> VigieResult<bool> {
        Ok(self.handle.current().has_new)
    }

    async fn mark_as_read(&self, notification_id: &str) -> VigieResult<()> {
        let t0 = Instant::now();
        let found = self.engine.mark_as_read(notification_id).await;
        info!(id = %notification_id, found, took_ms = %t0.elapsed().as_millis(), "api: mark_as_read");
        if found {
            Ok(())
        } else {
            Err(VigieError::NotFound(format!("notification {}", notification_id)))
        }
    }

    async fn mark_all_as_read(&self) -> VigieResult<()> {
        let t0 = Instant::now();
        self.engine.mark_all_as_read().await;
        info!(took_ms = %t0.elapsed().as_millis(), "api: mark_all_as_read");
        Ok(())
    }

    async fn refresh_notifications(&self) -> VigieResult<ReconcileSummary> {
        let t0 = Instant::now();
        let res = self.engine.refresh().await;
        match &res {
            Ok(s) => info!(
                synthesized = s.synthesized,
                upgraded = s.upgraded,
                took_ms = %t0.elapsed().as_millis(),
                "api: refresh ok"
            ),
            Err(e) => info!(error = %e, took_ms = %t0.elapsed().as_millis(), "api: refresh failed"),
        }
        res.map_err(|e| VigieError::Feed(e.to_string()))
    }
}

// ----------------- Mock implementation -----------------

/// Simple in-memory mock for consumer tests.
#[derive(Default)]
pub struct MockApi {
    pub notifications: std::sync::Mutex<Vec<Notification>>,
}

impl MockApi {
    pub fn new(notifications: Vec<Notification>) -> Self {
        Self { notifications: std::sync::Mutex::new(notifications) }
    }
}

#[async_trait::async_trait]
impl VigieApi for MockApi {
    async fn notifications(&self) -> VigieResult<Vec<Notification>> {
        Ok(self.notifications.lock().unwrap().clone())
    }

    async fn unread_count(&self) -> VigieResult<usize> {
        Ok(self.notifications.lock().unwrap().iter().filter(|n| !n.is_read).count())
    }

    async fn has_new_notifications(&self) -> VigieResult<bool> {
        Ok(self.notifications.lock().unwrap().iter().any(|n| !n.is_read && n.is_new))
    }

    async fn mark_as_read(&self, notification_id: &str) -> VigieResult<()> {
        let mut items = self.notifications.lock().unwrap();
        match items.iter_mut().find(|n| n.id == notification_id) {
            Some(n) => {
                n.mark_read();
                Ok(())
            }
            None => Err(VigieError::NotFound(format!("notification {}", notification_id))),
        }
    }

    async fn mark_all_as_read(&self) -> VigieResult<()> {
        for n in self.notifications.lock().unwrap().iter_mut() {
            n.mark_read();
        }
        Ok(())
    }

    async fn refresh_notifications(&self) -> VigieResult<ReconcileSummary> {
        Ok(ReconcileSummary::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigie_core::OrderRecord;
    use vigie_feed::StaticFeed;
    use vigie_persist::MemStore;

    fn order(id: &str, status: &str) -> OrderRecord {
        OrderRecord {
            id: id.into(),
            status_raw: status.into(),
            status_label: None,
            customer_name: None,
            order_number: None,
            location: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn inproc_surface_end_to_end() {
        let feed = Arc::new(StaticFeed::new(vec![order("1", "pending")]));
        let engine = Arc::new(Engine::new(feed, Arc::new(MemStore::new())));
        let api = InProcApi::new(engine);

        api.refresh_notifications().await.unwrap();
        assert_eq!(api.unread_count().await.unwrap(), 1);
        assert!(api.has_new_notifications().await.unwrap());

        let id = api.notifications().await.unwrap()[0].id.clone();
        api.mark_as_read(&id).await.unwrap();
        assert_eq!(api.unread_count().await.unwrap(), 0);
        assert!(!api.has_new_notifications().await.unwrap());

        assert!(matches!(
            api.mark_as_read("missing").await,
            Err(VigieError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn mock_tracks_read_state() {
        let rec = order("1", "pending");
        let n = Notification::arrival(&rec, rec.status_text(), Utc::now());
        let api = MockApi::new(vec![n.clone()]);
        assert_eq!(api.unread_count().await.unwrap(), 1);
        api.mark_as_read(&n.id).await.unwrap();
        assert_eq!(api.unread_count().await.unwrap(), 0);
    }
}
