#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::anyhow;
use vigie_core::{NotificationKind, OrderRecord};
use vigie_engine::{poll_period, spawn_poller, Engine};
use vigie_feed::{OrderFeed, StaticFeed};
use vigie_persist::{MemStore, Store};

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

struct FailingFeed;

#[async_trait::async_trait]
impl OrderFeed for FailingFeed {
    async fn fetch_orders(&self) -> anyhow::Result<Vec<OrderRecord>> {
        Err(anyhow!("backend unreachable"))
    }
}

#[tokio::test]
async fn refresh_publishes_snapshot_and_persists() {
    let feed = Arc::new(StaticFeed::new(vec![order("1", "pending")]));
    let store = Arc::new(MemStore::new());
    let engine = Engine::new(feed, store.clone());

    engine.refresh().await.unwrap();
    let snap = engine.handle().current();
    assert_eq!(snap.epoch, 1);
    assert_eq!(snap.notifications.len(), 1);
    assert_eq!(snap.unread_count, 1);
    assert!(snap.has_new);

    let persisted = store.load();
    assert_eq!(persisted.notifications.len(), 1);
    assert_eq!(persisted.last_statuses, vec![("1".to_string(), "En attente".to_string())]);
}

#[tokio::test]
async fn fetch_failure_leaves_previous_state_authoritative() {
    let feed = Arc::new(StaticFeed::new(vec![order("1", "pending")]));
    let store = Arc::new(MemStore::new());
    let engine = Engine::new(feed, store.clone());
    engine.refresh().await.unwrap();

    // Same store, broken feed: the pass aborts without touching anything.
    let broken = Engine::new(Arc::new(FailingFeed), store.clone());
    assert!(broken.refresh().await.is_err());
    let snap = broken.handle().current();
    assert_eq!(snap.notifications.len(), 1, "loaded state survives the failed pass");
    assert_eq!(store.load().notifications.len(), 1);
}

#[tokio::test]
async fn mark_as_read_is_idempotent_and_feeds_seen_set() {
    let feed = Arc::new(StaticFeed::new(vec![order("1", "pending")]));
    let store = Arc::new(MemStore::new());
    let engine = Engine::new(feed.clone(), store.clone());
    engine.refresh().await.unwrap();

    let id = engine.handle().current().notifications[0].id.clone();
    assert!(engine.mark_as_read(&id).await);
    assert!(engine.mark_as_read(&id).await, "second call is a no-op, not a failure");
    assert!(!engine.mark_as_read("nope").await);

    let snap = engine.handle().current();
    assert_eq!(snap.unread_count, 0);
    assert!(!snap.has_new);
    assert_eq!(store.load().seen, vec!["1".to_string()]);

    // Acknowledged order no longer counts as new on later passes.
    engine.refresh().await.unwrap();
    let snap = engine.handle().current();
    assert_eq!(snap.notifications.len(), 1);
    assert_eq!(snap.unread_count, 0);
}

#[tokio::test]
async fn mark_all_as_read_batches_both_structures() {
    let feed = Arc::new(StaticFeed::new(vec![
        order("1", "pending"),
        order("2", "preparing"),
        order("3", "delivered"),
    ]));
    let store = Arc::new(MemStore::new());
    let engine = Engine::new(feed, store.clone());
    engine.refresh().await.unwrap();
    assert_eq!(engine.handle().current().unread_count, 3);

    engine.mark_all_as_read().await;
    let snap = engine.handle().current();
    assert_eq!(snap.unread_count, 0);
    assert!(!snap.has_new);
    let persisted = store.load();
    assert_eq!(persisted.seen, vec!["1".to_string(), "2".to_string(), "3".to_string()]);
    assert!(persisted.notifications.iter().all(|n| n.is_read && !n.is_new));
}

#[tokio::test]
async fn acknowledged_delivered_order_stays_quiet() {
    let feed = Arc::new(StaticFeed::new(vec![order("1", "pending")]));
    let store = Arc::new(MemStore::new());
    let engine = Engine::new(feed.clone(), store);
    engine.refresh().await.unwrap();

    feed.set(vec![order("1", "delivered")]);
    engine.refresh().await.unwrap();
    let snap = engine.handle().current();
    assert_eq!(snap.notifications.len(), 1);
    assert_eq!(snap.notifications[0].kind, NotificationKind::Delivered);

    engine.mark_all_as_read().await;
    engine.refresh().await.unwrap();
    assert_eq!(engine.handle().current().unread_count, 0);
}

#[tokio::test(start_paused = true)]
async fn poller_runs_immediately_then_on_period_and_on_demand() {
    let feed = Arc::new(StaticFeed::new(vec![order("1", "pending")]));
    let engine = Arc::new(Engine::new(feed, Arc::new(MemStore::new())));
    let handle = engine.handle();

    let (refresh, task) = spawn_poller(Arc::clone(&engine), std::time::Duration::from_secs(30));
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert_eq!(handle.current().epoch, 1, "first pass fires immediately");

    tokio::time::sleep(std::time::Duration::from_secs(31)).await;
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert_eq!(handle.current().epoch, 2, "one pass per period");

    refresh.request();
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert_eq!(handle.current().epoch, 3, "manual request triggers an extra pass");

    drop(refresh);
    task.abort();
}

#[tokio::test]
async fn poll_period_defaults_to_thirty_seconds() {
    // Only meaningful when the env override is absent in the test run.
    if std::env::var("VIGIE_POLL_SECS").is_err() {
        assert_eq!(poll_period(), std::time::Duration::from_secs(30));
    }
}
