//! One reconciliation pass: diff a feed snapshot against engine state and
//! synthesize/upgrade/drop notifications.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;
use vigie_core::{classify, Notification, NotificationKind, OrderId, OrderRecord, StatusClass};
use vigie_persist::PersistedState;

/// Newest entries kept after each pass.
pub const MAX_NOTIFICATIONS: usize = 30;

/// The three persisted structures, owned by the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    /// Newest first, at most [`MAX_NOTIFICATIONS`].
    pub notifications: Vec<Notification>,
    /// Orders whose arrival notification the operator acknowledged. Monotone.
    pub seen: FxHashSet<OrderId>,
    /// Last observed status label per order. Replaced wholesale for orders
    /// present in a pass; entries for vanished orders are retained.
    pub last_statuses: FxHashMap<OrderId, String>,
}

impl EngineState {
    pub fn from_persisted(p: PersistedState) -> Self {
        let mut notifications = p.notifications;
        sort_newest_first(&mut notifications);
        Self {
            notifications,
            seen: p.seen.into_iter().collect(),
            last_statuses: p.last_statuses.into_iter().collect(),
        }
    }

    pub fn unread_count(&self) -> usize {
        self.notifications.iter().filter(|n| !n.is_read).count()
    }

    pub fn has_new(&self) -> bool {
        self.notifications.iter().any(|n| !n.is_read && n.is_new)
    }

    /// Wire layout of the statuses key: sorted `[order_id, label]` pairs.
    pub fn status_pairs(&self) -> Vec<(OrderId, String)> {
        let mut pairs: Vec<_> = self
            .last_statuses
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    pub fn seen_ids(&self) -> Vec<OrderId> {
        let mut ids: Vec<_> = self.seen.iter().cloned().collect();
        ids.sort();
        ids
    }
}

/// What one pass did, for logging and metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub synthesized: usize,
    pub upgraded: usize,
    /// Dropped because their order left the feed (includes a full clear).
    pub out_of_scope: usize,
    /// Dropped by the newest-30 truncation.
    pub truncated: usize,
    pub cleared: bool,
}

// Dedup key: NewOrder/Delivered share one slot per order, StatusChange one
// per distinct status value.
fn dedup_key(n: &Notification) -> (OrderId, Option<String>) {
    if n.kind.is_arrival_class() {
        (n.order_id.clone(), None)
    } else {
        (n.order_id.clone(), Some(n.status.clone()))
    }
}

fn sort_newest_first(items: &mut [Notification]) {
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
}

/// Apply one feed snapshot to `state`. Pure with respect to I/O: callers
/// persist afterwards.
pub fn reconcile(state: &mut EngineState, orders: &[OrderRecord], now: DateTime<Utc>) -> ReconcileSummary {
    let mut summary = ReconcileSummary::default();

    // Empty feed means no orders in scope for this operator: notifications
    // are scoped to visible orders, so the list clears. Seen set and status
    // map survive the scope loss.
    if orders.is_empty() {
        summary.cleared = true;
        summary.out_of_scope = state.notifications.len();
        state.notifications.clear();
        return summary;
    }

    // Snapshot prior statuses before this pass overwrites them. The updated
    // map keeps entries for orders that left the feed (unpruned on purpose,
    // see DESIGN.md) and replaces the value for every order present now.
    let prior = std::mem::take(&mut state.last_statuses);
    let mut updated: FxHashMap<OrderId, String> = prior.clone();

    // Carry forward only notifications whose order is still in the feed.
    let present: FxHashSet<&str> = orders.iter().map(|o| o.id.as_str()).collect();
    let before = state.notifications.len();
    let mut carried = std::mem::take(&mut state.notifications);
    carried.retain(|n| present.contains(n.order_id.as_str()));
    summary.out_of_scope = before - carried.len();

    let mut synthesized: Vec<Notification> = Vec::new();
    for order in orders {
        let label = order.status_text();
        let previous = prior.get(&order.id).cloned();
        updated.insert(order.id.clone(), label.clone());

        let is_new_order = !state.seen.contains(&order.id);
        let has_changed = !is_new_order && previous.as_deref().is_some_and(|p| p != label);
        let is_delivered = classify(&label) == StatusClass::Delivered;

        // Retroactive upgrade: an unread NewOrder for a now-delivered order
        // becomes Delivered in place, never a second notification.
        if is_delivered {
            if let Some(n) = carried
                .iter_mut()
                .find(|n| n.order_id == order.id && !n.is_read && n.kind == NotificationKind::NewOrder)
            {
                n.upgrade_to_delivered(order, label.clone(), now);
                summary.upgraded += 1;
            }
        }

        if is_new_order {
            let unread_arrival_exists = carried
                .iter()
                .any(|n| n.order_id == order.id && !n.is_read && n.kind.is_arrival_class());
            if !unread_arrival_exists {
                synthesized.push(Notification::arrival(order, label.clone(), now));
            }
        }

        if has_changed {
            let unread_same_status_exists = carried
                .iter()
                .any(|n| n.order_id == order.id && !n.is_read && n.status == label);
            if !unread_same_status_exists {
                let prev = previous.unwrap_or_default();
                synthesized.push(Notification::status_change(order, label.clone(), prev, now));
            }
        }
    }
    summary.synthesized = synthesized.len();

    // Merge; a newly synthesized entry wins its dedup slot.
    let mut by_key: FxHashMap<(OrderId, Option<String>), Notification> = FxHashMap::default();
    for n in carried {
        by_key.insert(dedup_key(&n), n);
    }
    for n in synthesized {
        by_key.insert(dedup_key(&n), n);
    }
    let mut merged: Vec<Notification> = by_key.into_values().collect();
    sort_newest_first(&mut merged);
    if merged.len() > MAX_NOTIFICATIONS {
        summary.truncated = merged.len() - MAX_NOTIFICATIONS;
        merged.truncate(MAX_NOTIFICATIONS);
    }

    debug!(
        kept = merged.len(),
        synthesized = summary.synthesized,
        upgraded = summary.upgraded,
        out_of_scope = summary.out_of_scope,
        "reconcile pass applied"
    );
    state.notifications = merged;
    state.last_statuses = updated;
    summary
}
