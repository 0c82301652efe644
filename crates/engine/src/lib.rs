//! Vigie engine: owns the notification state, runs reconciliation passes,
//! and publishes read-side snapshots.
//!
//! All mutation goes through one async mutex, so a manual refresh can never
//! interleave with a timer tick (the saves of two overlapping passes would
//! otherwise race, last writer winning). Readers never touch the mutex:
//! every mutation swaps a fresh snapshot into an `ArcSwap` and bumps an
//! epoch watch channel.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;
use chrono::Utc;
use metrics::counter;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use vigie_core::Notification;
use vigie_feed::OrderFeed;
use vigie_persist::Store;

pub mod reconcile;

pub use reconcile::{reconcile, EngineState, ReconcileSummary, MAX_NOTIFICATIONS};

/// Immutable view published to readers after every mutation.
#[derive(Debug, Clone, Default)]
pub struct NotificationSnapshot {
    pub epoch: u64,
    /// Newest first, at most [`MAX_NOTIFICATIONS`].
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    /// True while some unread notification should drive the pulsing badge.
    pub has_new: bool,
}

/// Read-side handle: current snapshot plus epoch subscription for wakeups.
#[derive(Clone)]
pub struct NotificationsHandle {
    snap: Arc<ArcSwap<NotificationSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
}

impl NotificationsHandle {
    pub fn current(&self) -> Arc<NotificationSnapshot> {
        self.snap.load_full()
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.epoch_rx.clone()
    }
}

pub struct Engine {
    feed: Arc<dyn OrderFeed>,
    store: Arc<dyn Store>,
    state: Mutex<EngineState>,
    snap: Arc<ArcSwap<NotificationSnapshot>>,
    epoch: AtomicU64,
    epoch_tx: watch::Sender<u64>,
    epoch_rx: watch::Receiver<u64>,
}

impl Engine {
    /// Load persisted state (tolerantly) and publish the initial snapshot.
    pub fn new(feed: Arc<dyn OrderFeed>, store: Arc<dyn Store>) -> Self {
        let state = EngineState::from_persisted(store.load());
        info!(
            notifications = state.notifications.len(),
            seen = state.seen.len(),
            statuses = state.last_statuses.len(),
            "engine state loaded"
        );
        let snap = Arc::new(ArcSwap::from_pointee(NotificationSnapshot {
            epoch: 0,
            notifications: state.notifications.clone(),
            unread_count: state.unread_count(),
            has_new: state.has_new(),
        }));
        let (epoch_tx, epoch_rx) = watch::channel(0u64);
        Self {
            feed,
            store,
            state: Mutex::new(state),
            snap,
            epoch: AtomicU64::new(0),
            epoch_tx,
            epoch_rx,
        }
    }

    pub fn handle(&self) -> NotificationsHandle {
        NotificationsHandle { snap: Arc::clone(&self.snap), epoch_rx: self.epoch_rx.clone() }
    }

    /// One reconciliation pass: fetch, diff, persist, publish.
    ///
    /// A fetch failure aborts the pass with the previous state left
    /// authoritative; the error is returned for the caller to log, never
    /// with state half-applied.
    pub async fn refresh(&self) -> Result<ReconcileSummary> {
        let mut st = self.state.lock().await;
        let orders = match self.feed.fetch_orders().await {
            Ok(o) => o,
            Err(e) => {
                counter!("engine_fetch_errors_total", 1u64);
                warn!(error = %e, "order feed fetch failed; keeping previous state");
                return Err(e);
            }
        };
        let summary = reconcile(&mut st, &orders, Utc::now());
        counter!("engine_reconcile_total", 1u64);
        if summary.synthesized > 0 || summary.upgraded > 0 {
            counter!("engine_events_total", (summary.synthesized + summary.upgraded) as u64);
        }
        log_save(self.store.save_notifications(&st.notifications), "notifications");
        log_save(self.store.save_statuses(&st.status_pairs()), "last_statuses");
        self.publish(&st);
        Ok(summary)
    }

    /// Acknowledge one notification. Idempotent; returns false for an
    /// unknown id.
    pub async fn mark_as_read(&self, notification_id: &str) -> bool {
        let mut st = self.state.lock().await;
        let Some(n) = st.notifications.iter_mut().find(|n| n.id == notification_id) else {
            debug!(id = notification_id, "mark_as_read: unknown notification");
            return false;
        };
        if n.is_read {
            return true;
        }
        n.mark_read();
        let order_id = n.order_id.clone();
        st.seen.insert(order_id);
        log_save(self.store.save_notifications(&st.notifications), "notifications");
        log_save(self.store.save_seen(&st.seen_ids()), "seen_orders");
        self.publish(&st);
        true
    }

    /// Acknowledge everything in one batch persist.
    pub async fn mark_all_as_read(&self) {
        let mut st = self.state.lock().await;
        let mut touched = false;
        let mut order_ids = Vec::new();
        for n in st.notifications.iter_mut() {
            if !n.is_read {
                n.mark_read();
                touched = true;
            }
            order_ids.push(n.order_id.clone());
        }
        if !touched {
            return;
        }
        st.seen.extend(order_ids);
        log_save(self.store.save_notifications(&st.notifications), "notifications");
        log_save(self.store.save_seen(&st.seen_ids()), "seen_orders");
        self.publish(&st);
    }

    fn publish(&self, st: &EngineState) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.snap.store(Arc::new(NotificationSnapshot {
            epoch,
            notifications: st.notifications.clone(),
            unread_count: st.unread_count(),
            has_new: st.has_new(),
        }));
        let _ = self.epoch_tx.send(epoch);
    }
}

// Storage faults degrade to "won't survive reload", never to a failed pass.
fn log_save(res: Result<()>, what: &str) {
    if let Err(e) = res {
        counter!("engine_persist_errors_total", 1u64);
        warn!(error = %e, what, "persist failed; in-memory state stays correct");
    }
}

/// Requests an out-of-band reconcile (e.g. the notification panel opened).
/// Coalesces: a request while one is already queued is a no-op.
#[derive(Clone)]
pub struct RefreshHandle {
    tx: mpsc::Sender<()>,
}

impl RefreshHandle {
    pub fn request(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Default polling period: 30s, overridable via `VIGIE_POLL_SECS`.
pub fn poll_period() -> std::time::Duration {
    let secs = std::env::var("VIGIE_POLL_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(30);
    std::time::Duration::from_secs(secs.max(1))
}

/// Spawn the polling driver: one pass immediately, then one per period,
/// plus any manually requested passes. Passes are serialized by the engine
/// mutex; a slow fetch simply delays the next trigger.
pub fn spawn_poller(
    engine: Arc<Engine>,
    period: std::time::Duration,
) -> (RefreshHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<()>(1);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = engine.refresh().await {
                        warn!(error = %e, "scheduled reconcile failed; will retry next tick");
                    }
                }
                maybe = rx.recv() => {
                    match maybe {
                        Some(()) => {
                            debug!("manual refresh requested");
                            if let Err(e) = engine.refresh().await {
                                warn!(error = %e, "manual reconcile failed");
                            }
                        }
                        None => {
                            debug!("refresh channel closed; stopping poller");
                            break;
                        }
                    }
                }
            }
        }
        info!("poller stopped");
    });
    (RefreshHandle { tx }, task)
}
